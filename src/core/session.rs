//! Session state machine
//!
//! Tracks whether a game session is live and which cartridge mapping it
//! came from. The power button toggles between the two modes; cartridge
//! scans validate the reported console/game pair against the game library
//! before anything is launched.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::transport::{SerialLink, Transport, TransportError};
use crate::system::System;

/// Placeholder stored in the record when a field failed validation or no
/// cartridge is present.
pub const NO_CARTRIDGE: &str = "NONE";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Console {0:?} is not in the supported console list")]
    UnknownConsole(String),

    #[error("No game file at {0}")]
    MissingGame(PathBuf),
}

/// Host-side session mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    GameRunning,
}

/// What the currently inserted cartridge maps to. Rebuilt on every scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartridgeRecord {
    pub console: String,
    pub game: String,
    /// True only when the console passed the allow-list and the game file
    /// exists; launches require it.
    pub valid: bool,
    pub emulator_cmd: String,
    pub rom_path: PathBuf,
}

impl CartridgeRecord {
    fn none() -> Self {
        Self {
            console: NO_CARTRIDGE.to_string(),
            game: NO_CARTRIDGE.to_string(),
            valid: false,
            emulator_cmd: String::new(),
            rom_path: PathBuf::new(),
        }
    }
}

/// Owned session state: mode plus the last validated cartridge record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionState {
    mode: SessionMode,
    cartridge: CartridgeRecord,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            mode: SessionMode::Idle,
            cartridge: CartridgeRecord::none(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn cartridge(&self) -> &CartridgeRecord {
        &self.cartridge
    }

    /// Validate a reported console/game pair and rebuild the cartridge
    /// record from it.
    ///
    /// The console name is trimmed and lowercased before the allow-list
    /// check. A good console with a missing game file keeps the console
    /// name in the record for the logs; `valid` goes false either way.
    pub fn validate_cartridge(
        &mut self,
        console: &str,
        game: &str,
        system: &dyn System,
    ) -> Result<(), ValidationError> {
        let console = console.trim().to_lowercase();
        if !system.console_supported(&console) {
            self.cartridge = CartridgeRecord::none();
            return Err(ValidationError::UnknownConsole(console));
        }
        let rom_path = system.rom_path(&console, game);
        if !system.rom_exists(&console, game) {
            self.cartridge = CartridgeRecord {
                console,
                game: NO_CARTRIDGE.to_string(),
                valid: false,
                emulator_cmd: String::new(),
                rom_path: PathBuf::new(),
            };
            return Err(ValidationError::MissingGame(rom_path));
        }
        info!("cartridge maps to {:?} on {:?}", game, console);
        self.cartridge = CartridgeRecord {
            emulator_cmd: system.emulator_command(&console),
            console,
            game: game.to_string(),
            valid: true,
            rom_path,
        };
        Ok(())
    }

    /// Ask the controller what is in the slot and revalidate the record.
    pub fn scan_cartridge<L: SerialLink>(
        &mut self,
        transport: &mut Transport<L>,
        system: &dyn System,
    ) -> Result<(), TransportError> {
        let (console, game) = transport.read_cartridge()?;
        debug!("cartridge reports console {:?} game {:?}", console, game);
        if let Err(reason) = self.validate_cartridge(&console, &game, system) {
            debug!("no playable cartridge: {}", reason);
        }
        Ok(())
    }

    /// Momentary power press: from idle, rescan the slot and launch the
    /// inserted cartridge; from a running game, eject back to the
    /// front-end.
    pub fn power_button<L: SerialLink>(
        &mut self,
        transport: &mut Transport<L>,
        system: &dyn System,
    ) -> Result<(), TransportError> {
        debug!("power button pressed while {:?}", self.mode);
        match self.mode {
            SessionMode::Idle => {
                self.scan_cartridge(transport, system)?;
                if self.start_game(system) {
                    self.mode = SessionMode::GameRunning;
                }
            }
            SessionMode::GameRunning => {
                self.eject_game(system);
                self.mode = SessionMode::Idle;
            }
        }
        Ok(())
    }

    /// Notice a game that ended from inside the emulator (quit menu,
    /// crash) and fall back to idle with the front-end up.
    pub fn check_emulator_exit(&mut self, system: &dyn System) {
        if self.mode == SessionMode::GameRunning && !system.emulator_running() {
            info!("game exited on its own, back to idle");
            self.mode = SessionMode::Idle;
            if let Err(e) = system.launch_frontend() {
                warn!("front-end launch failed: {}", e);
            }
        }
    }

    fn start_game(&self, system: &dyn System) -> bool {
        if !self.cartridge.valid {
            info!("no valid cartridge inserted");
            return false;
        }
        info!(
            "starting {:?} on {:?}",
            self.cartridge.game, self.cartridge.console
        );
        // Nothing else may hold the display while the emulator comes up.
        system.stop_emulators_and_frontend();
        match system.launch_emulator(&self.cartridge.emulator_cmd, &self.cartridge.rom_path) {
            Ok(()) => true,
            Err(e) => {
                warn!("emulator launch failed: {}", e);
                false
            }
        }
    }

    fn eject_game(&self, system: &dyn System) {
        info!(
            "ejecting {:?} on {:?}",
            self.cartridge.game, self.cartridge.console
        );
        system.stop_emulators();
        if !system.frontend_running() {
            if let Err(e) = system.launch_frontend() {
                warn!("front-end launch failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::encode_cartridge_payload;
    use crate::core::transport::loopback::Loopback;
    use crate::system::fake::FakeSystem;

    fn nes_system() -> FakeSystem {
        let system = FakeSystem::new();
        system.add_console("nes");
        system.add_rom("nes", "mario.nes");
        system
    }

    fn scripted_cartridge(link: &Loopback, console: &str, game: &str) {
        let payload = encode_cartridge_payload(console, game).unwrap();
        link.respond(b"Cr", format!("OK{}\r", payload).as_bytes());
    }

    #[test]
    fn test_power_press_without_cartridge_stays_idle() {
        let link = Loopback::new();
        let mut transport = link.transport();
        let system = FakeSystem::new();
        let mut session = SessionState::new();
        link.respond(b"Cr", b"\r");
        session.power_button(&mut transport, &system).unwrap();
        assert_eq!(session.mode(), SessionMode::Idle);
        assert!(!session.cartridge().valid);
        assert_eq!(session.cartridge().console, NO_CARTRIDGE);
        assert_eq!(system.emulator_launches().len(), 0);
        assert_eq!(system.stops_all(), 0);
    }

    #[test]
    fn test_power_press_launches_valid_cartridge() {
        let link = Loopback::new();
        let mut transport = link.transport();
        let system = nes_system();
        let mut session = SessionState::new();
        scripted_cartridge(&link, "nes", "mario.nes");
        session.power_button(&mut transport, &system).unwrap();
        assert_eq!(session.mode(), SessionMode::GameRunning);
        assert!(session.cartridge().valid);
        assert_eq!(system.stops_all(), 1);
        assert_eq!(
            system.emulator_launches(),
            vec!["run nes /roms/nes/mario.nes"]
        );
    }

    #[test]
    fn test_second_press_ejects_without_rescan() {
        let link = Loopback::new();
        let mut transport = link.transport();
        let system = nes_system();
        let mut session = SessionState::new();
        scripted_cartridge(&link, "nes", "mario.nes");
        session.power_button(&mut transport, &system).unwrap();
        session.power_button(&mut transport, &system).unwrap();
        assert_eq!(session.mode(), SessionMode::Idle);
        assert_eq!(system.stops_emulators(), 1);
        assert_eq!(system.frontend_launches(), 1);
        // Only the first press read the cartridge.
        let scans = link
            .sent_text()
            .iter()
            .filter(|frame| frame.as_str() == "Cr\r")
            .count();
        assert_eq!(scans, 1);
    }

    #[test]
    fn test_eject_skips_frontend_when_already_up() {
        let link = Loopback::new();
        let mut transport = link.transport();
        let system = nes_system();
        let mut session = SessionState::new();
        scripted_cartridge(&link, "nes", "mario.nes");
        session.power_button(&mut transport, &system).unwrap();
        system.set_frontend_running(true);
        session.power_button(&mut transport, &system).unwrap();
        assert_eq!(session.mode(), SessionMode::Idle);
        assert_eq!(system.frontend_launches(), 0);
    }

    #[test]
    fn test_validate_normalizes_console_case() {
        let system = nes_system();
        let mut upper = SessionState::new();
        let mut lower = SessionState::new();
        upper
            .validate_cartridge(" NES ", "mario.nes", &system)
            .unwrap();
        lower
            .validate_cartridge("nes", "mario.nes", &system)
            .unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.cartridge().console, "nes");
    }

    #[test]
    fn test_validate_rejects_unknown_console() {
        let system = nes_system();
        let mut session = SessionState::new();
        let result = session.validate_cartridge("c128", "game.d64", &system);
        assert_eq!(
            result,
            Err(ValidationError::UnknownConsole("c128".to_string()))
        );
        assert_eq!(session.cartridge().console, NO_CARTRIDGE);
        assert!(!session.cartridge().valid);
    }

    #[test]
    fn test_validate_keeps_console_when_game_missing() {
        let system = nes_system();
        let mut session = SessionState::new();
        let result = session.validate_cartridge("nes", "zelda.nes", &system);
        assert!(matches!(result, Err(ValidationError::MissingGame(_))));
        assert_eq!(session.cartridge().console, "nes");
        assert_eq!(session.cartridge().game, NO_CARTRIDGE);
        assert!(!session.cartridge().valid);
    }

    #[test]
    fn test_launch_failure_keeps_idle() {
        let link = Loopback::new();
        let mut transport = link.transport();
        let system = nes_system();
        system.fail_launches();
        let mut session = SessionState::new();
        scripted_cartridge(&link, "nes", "mario.nes");
        session.power_button(&mut transport, &system).unwrap();
        assert_eq!(session.mode(), SessionMode::Idle);
    }

    #[test]
    fn test_emulator_exit_returns_to_idle() {
        let link = Loopback::new();
        let mut transport = link.transport();
        let system = nes_system();
        let mut session = SessionState::new();
        scripted_cartridge(&link, "nes", "mario.nes");
        session.power_button(&mut transport, &system).unwrap();

        // Still running: nothing changes.
        session.check_emulator_exit(&system);
        assert_eq!(session.mode(), SessionMode::GameRunning);

        system.set_emulator_running(false);
        session.check_emulator_exit(&system);
        assert_eq!(session.mode(), SessionMode::Idle);
        assert_eq!(system.frontend_launches(), 1);
    }
}
