//! Main daemon loop.
//!
//! Single-threaded tick loop over the serial line: drain inbound bytes
//! into a frame accumulator, dispatch complete frames, and run the timed
//! jobs (temperature push, optional cartridge rescan, emulator exit
//! watch). One iteration failing never takes the loop down; the line may
//! come back.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::Config;
use crate::core::dispatch;
use crate::core::session::SessionState;
use crate::core::transport::{Result, SerialLink, Transport};
use crate::core::TERMINATOR;
use crate::system::System;

/// Poll interval of the main loop.
const TICK: Duration = Duration::from_millis(100);

/// Recurring work of the daemon, counted in ticks.
pub struct Scheduler {
    accumulator: Vec<u8>,
    temperature_ticks: u32,
    temperature_period: u32,
    scan_ticks: u32,
    scan_period: u32,
    scan_enabled: bool,
}

impl Scheduler {
    pub fn new(config: &Config) -> Self {
        Self {
            accumulator: Vec::new(),
            temperature_ticks: 0,
            temperature_period: ticks_for(config.temperature.period_secs),
            scan_ticks: 0,
            scan_period: ticks_for(config.cartridge_scan.period_secs),
            scan_enabled: config.cartridge_scan.enabled,
        }
    }

    /// Run forever. A failed iteration is logged and the next one runs
    /// on schedule.
    pub fn run<L: SerialLink>(
        mut self,
        transport: &mut Transport<L>,
        session: &mut SessionState,
        system: &dyn System,
    ) -> ! {
        loop {
            if let Err(e) = self.tick(transport, session, system) {
                error!("Loop iteration failed: {}", e);
            }
            thread::sleep(TICK);
        }
    }

    fn tick<L: SerialLink>(
        &mut self,
        transport: &mut Transport<L>,
        session: &mut SessionState,
        system: &dyn System,
    ) -> Result<()> {
        self.poll_serial(transport, session, system)?;
        self.tick_temperature(transport, system)?;
        self.tick_cartridge_scan(transport, session, system)?;
        session.check_emulator_exit(system);
        Ok(())
    }

    /// Collect inbound bytes and dispatch the first complete frame.
    ///
    /// The controller sends one command per button press and waits for
    /// the ack, so at most one frame is pending; bytes behind the
    /// terminator are residue from aborted exchanges and get dropped.
    fn poll_serial<L: SerialLink>(
        &mut self,
        transport: &mut Transport<L>,
        session: &mut SessionState,
        system: &dyn System,
    ) -> Result<()> {
        transport.read_available(&mut self.accumulator)?;
        let end = match self.accumulator.iter().position(|&b| b == TERMINATOR) {
            Some(end) => end,
            None => return Ok(()),
        };
        let frame = trim_frame(&self.accumulator[..end]).to_vec();
        self.accumulator.clear();
        transport.discard_input()?;
        if frame.is_empty() {
            return Ok(());
        }
        debug!("rx frame {:?}", String::from_utf8_lossy(&frame));
        dispatch::handle_frame(&frame, transport, session, system)
    }

    /// Push the CPU temperature once per period. The counter resets
    /// before the read, so a dead sensor is retried next period instead
    /// of every tick.
    fn tick_temperature<L: SerialLink>(
        &mut self,
        transport: &mut Transport<L>,
        system: &dyn System,
    ) -> Result<()> {
        if self.temperature_ticks > 0 {
            self.temperature_ticks -= 1;
            return Ok(());
        }
        self.temperature_ticks = self.temperature_period;
        match system.cpu_temperature() {
            Ok(celsius) => transport.push_temperature(celsius)?,
            Err(e) => warn!("temperature read failed: {}", e),
        }
        Ok(())
    }

    /// Re-read the slot once per period, when enabled. Keeps the session
    /// record fresh on controllers that do not push slot changes.
    fn tick_cartridge_scan<L: SerialLink>(
        &mut self,
        transport: &mut Transport<L>,
        session: &mut SessionState,
        system: &dyn System,
    ) -> Result<()> {
        if !self.scan_enabled {
            return Ok(());
        }
        if self.scan_ticks > 0 {
            self.scan_ticks -= 1;
            return Ok(());
        }
        self.scan_ticks = self.scan_period;
        session.scan_cartridge(transport, system)
    }
}

fn ticks_for(period_secs: u64) -> u32 {
    (period_secs * 1000 / TICK.as_millis() as u64) as u32
}

/// Strip leading and trailing ASCII whitespace from a raw frame.
fn trim_frame(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |last| last + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::encode_cartridge_payload;
    use crate::core::transport::loopback::Loopback;
    use crate::system::fake::FakeSystem;

    fn fixture() -> (Loopback, Transport<Loopback>, SessionState, FakeSystem) {
        let link = Loopback::new();
        let transport = link.transport();
        (link, transport, SessionState::new(), FakeSystem::new())
    }

    fn quiet_scheduler() -> Scheduler {
        // High counters so only the job under test fires.
        let mut scheduler = Scheduler::new(&Config::default());
        scheduler.temperature_ticks = u32::MAX;
        scheduler.scan_ticks = u32::MAX;
        scheduler
    }

    #[test]
    fn test_frame_assembled_across_ticks() {
        let (link, mut transport, mut session, system) = fixture();
        let mut scheduler = quiet_scheduler();

        link.push_inbound(b"P");
        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(system.power_offs(), 0);

        link.push_inbound(b"1\r");
        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(system.power_offs(), 1);
        assert!(link.sent_text().contains(&"OK\r".to_string()));
    }

    #[test]
    fn test_leading_noise_trimmed_from_frame() {
        let (link, mut transport, mut session, system) = fixture();
        let mut scheduler = quiet_scheduler();

        link.push_inbound(b"\nP1 \r");
        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(system.power_offs(), 1);
    }

    #[test]
    fn test_bytes_after_terminator_dropped() {
        let (link, mut transport, mut session, system) = fixture();
        let mut scheduler = quiet_scheduler();

        link.push_inbound(b"P1\rJUNK");
        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(system.power_offs(), 1);
        assert!(scheduler.accumulator.is_empty());
        assert_eq!(link.unread_len(), 0);
    }

    #[test]
    fn test_temperature_pushed_on_first_tick() {
        let (link, mut transport, mut session, system) = fixture();
        let mut scheduler = Scheduler::new(&Config::default());
        scheduler.scan_ticks = u32::MAX;

        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(link.sent_text(), vec!["T42\r".to_string()]);
        assert_eq!(scheduler.temperature_ticks, scheduler.temperature_period);

        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(link.sent_text().len(), 1);
    }

    #[test]
    fn test_temperature_failure_waits_full_period() {
        let (link, mut transport, mut session, system) = fixture();
        let mut config = Config::default();
        config.temperature.period_secs = 1;
        let mut scheduler = Scheduler::new(&config);
        scheduler.scan_ticks = u32::MAX;

        system.fail_temperature(true);
        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert!(link.sent_text().is_empty());

        system.fail_temperature(false);
        for _ in 0..scheduler.temperature_period {
            scheduler
                .tick(&mut transport, &mut session, &system)
                .unwrap();
        }
        assert!(link.sent_text().is_empty());
        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(link.sent_text(), vec!["T42\r".to_string()]);
    }

    #[test]
    fn test_cartridge_scan_disabled_by_default() {
        let (link, mut transport, mut session, system) = fixture();
        let mut scheduler = Scheduler::new(&Config::default());
        scheduler.temperature_ticks = u32::MAX;

        for _ in 0..100 {
            scheduler
                .tick(&mut transport, &mut session, &system)
                .unwrap();
        }
        assert!(link.sent_text().is_empty());
    }

    #[test]
    fn test_cartridge_scan_polls_when_enabled() {
        let (link, mut transport, mut session, system) = fixture();
        system.add_console("nes");
        system.add_rom("nes", "mario.nes");
        let payload = encode_cartridge_payload("nes", "mario.nes").unwrap();
        link.respond(b"Cr", format!("OK{}\r", payload).as_bytes());

        let mut config = Config::default();
        config.cartridge_scan.enabled = true;
        let mut scheduler = Scheduler::new(&config);
        scheduler.temperature_ticks = u32::MAX;

        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(link.sent_text(), vec!["Cr\r".to_string()]);
        assert!(session.cartridge().valid);
        assert_eq!(scheduler.scan_ticks, scheduler.scan_period);
    }

    #[test]
    fn test_tick_failure_is_recoverable() {
        let (link, mut transport, mut session, system) = fixture();
        let mut scheduler = quiet_scheduler();

        link.set_fail_poll(true);
        assert!(scheduler
            .tick(&mut transport, &mut session, &system)
            .is_err());

        link.set_fail_poll(false);
        assert!(scheduler
            .tick(&mut transport, &mut session, &system)
            .is_ok());
    }

    #[test]
    fn test_emulator_exit_watched_every_tick() {
        let (link, mut transport, mut session, system) = fixture();
        system.add_console("nes");
        system.add_rom("nes", "mario.nes");
        let payload = encode_cartridge_payload("nes", "mario.nes").unwrap();
        link.respond(b"Cr", format!("OK{}\r", payload).as_bytes());
        session.power_button(&mut transport, &system).unwrap();
        assert_eq!(session.cartridge().game, "mario.nes");

        let mut scheduler = quiet_scheduler();
        system.set_emulator_running(false);
        scheduler
            .tick(&mut transport, &mut session, &system)
            .unwrap();
        assert_eq!(system.frontend_launches(), 1);
    }
}
