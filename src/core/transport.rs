//! Serial transport
//!
//! Owns the byte channel to the controller and implements the framing
//! discipline on top of it: outbound commands are CR-terminated, responses
//! are collected a byte at a time until the terminator, the abort marker,
//! a hard deadline or an I/O fault. Typed request helpers cover every
//! outbound command the host issues.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::registry::{cart, Command};
use super::{ABORT, ACK, BAUD_RATE, MAX_CONSOLE_LEN, MAX_GAME_LEN, TERMINATOR};

/// Per-read slice the serial port blocks for; the response deadline is
/// enforced across slices.
const READ_SLICE: Duration = Duration::from_millis(50);

/// The controller needs a short settle window after every write before it
/// starts answering.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Hard deadline for one response frame.
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between init handshake attempts.
const INIT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Cartridge {field} exceeds {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("Controller returned a non-numeric status: {0:?}")]
    BadStatus(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Byte-level channel the transport drives. Production wraps a serial
/// port; tests substitute an in-memory loopback.
pub trait SerialLink {
    /// Bytes readable right now without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read one byte, waiting at most one read slice. `Ok(None)` means the
    /// slice elapsed with nothing to read.
    fn read_byte(&mut self) -> Result<Option<u8>>;

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Drop everything pending in the receive buffer.
    fn discard_input(&mut self) -> Result<()>;
}

/// Serial link at the controller's fixed line settings (19200 8N1).
pub struct SerialPortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialPortLink {
    /// Open `port_name` with the controller's line settings.
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(READ_SLICE)
            .open()
            .map_err(|source| TransportError::Open {
                port: port_name.to_string(),
                source,
            })?;
        Ok(Self { port })
    }
}

impl SerialLink for SerialPortLink {
    fn bytes_available(&mut self) -> Result<usize> {
        let count = self
            .port
            .bytes_to_read()
            .map_err(|e| TransportError::Io(e.into()))?;
        Ok(count as usize)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| TransportError::Io(e.into()))
    }
}

/// Framing and request/response layer over a [`SerialLink`].
pub struct Transport<L: SerialLink> {
    link: L,
    settle_delay: Duration,
    retry_delay: Duration,
    response_timeout: Duration,
    /// Controller firmware version, captured by the handshake.
    pub firmware_version: String,
    /// Controller hardware revision, captured by the handshake.
    pub hardware_version: String,
}

impl Transport<SerialPortLink> {
    /// Open the serial port and capture the controller version strings.
    pub fn connect(port_name: &str) -> Result<Self> {
        let mut transport = Transport::new(SerialPortLink::open(port_name)?);
        transport.handshake()?;
        Ok(transport)
    }
}

impl<L: SerialLink> Transport<L> {
    /// Wrap an already-open link. Delays start at the protocol defaults.
    pub fn new(link: L) -> Self {
        Self {
            link,
            settle_delay: SETTLE_DELAY,
            retry_delay: INIT_RETRY_DELAY,
            response_timeout: RESPONSE_TIMEOUT,
            firmware_version: String::new(),
            hardware_version: String::new(),
        }
    }

    /// Query the firmware and hardware versions. Each response carries a
    /// leading tag byte that is stripped before storing.
    pub fn handshake(&mut self) -> Result<()> {
        self.link.discard_input()?;
        let fw = self.request(&[Command::FirmwareVersion.id()])?;
        self.firmware_version = fw.get(1..).unwrap_or_default().to_string();
        let hw = self.request(&[Command::HardwareVersion.id()])?;
        self.hardware_version = hw.get(1..).unwrap_or_default().to_string();
        Ok(())
    }

    /// Init handshake. The controller must answer `OK` before the session
    /// starts; anything else logs and retries after a pause.
    pub fn initialize(&mut self) -> Result<()> {
        loop {
            let response = self.request(&[Command::Init.id()])?;
            if response == ACK {
                debug!("controller initialized");
                return Ok(());
            }
            warn!("waiting for controller, init answered {:?}", response);
            thread::sleep(self.retry_delay);
        }
    }

    /// Frame `bytes` with the terminator and write them out. Pending input
    /// is dropped first so the next read cannot see stale bytes, and the
    /// settle window is honored after the write.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("tx {:?}", String::from_utf8_lossy(bytes));
        self.link.discard_input()?;
        let mut framed = Vec::with_capacity(bytes.len() + 1);
        framed.extend_from_slice(bytes);
        framed.push(TERMINATOR);
        self.link.write_all(&framed)?;
        thread::sleep(self.settle_delay);
        Ok(())
    }

    /// Send a command and collect its response frame.
    pub fn request(&mut self, bytes: &[u8]) -> Result<String> {
        self.send(bytes)?;
        let timeout = self.response_timeout;
        Ok(self.read_response(timeout))
    }

    /// Read one response frame, best effort.
    ///
    /// Bytes accumulate until the terminator (excluded from the result),
    /// the abort marker, the deadline or a read fault. The last three end
    /// the read early and yield whatever was collected; read failures are
    /// logged, never propagated. Callers that care must validate content.
    pub fn read_response(&mut self, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut collected: Vec<u8> = Vec::new();
        loop {
            // A line that never goes idle still has to end at the deadline.
            if Instant::now() >= deadline {
                warn!("rx deadline passed after {} bytes", collected.len());
                break;
            }
            match self.link.read_byte() {
                Ok(Some(TERMINATOR)) => break,
                Ok(Some(ABORT)) => {
                    warn!("rx aborted by controller after {} bytes", collected.len());
                    break;
                }
                Ok(Some(byte)) => collected.push(byte),
                Ok(None) => {}
                Err(e) => {
                    warn!("rx failed after {} bytes: {}", collected.len(), e);
                    break;
                }
            }
        }
        let text = String::from_utf8_lossy(&collected).into_owned();
        debug!("rx {:?}", text);
        text
    }

    /// Drain whatever the controller has pushed, without blocking,
    /// appending to `buf`. Returns the number of bytes taken.
    pub fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let mut taken = 0;
        while self.link.bytes_available()? > 0 {
            match self.link.read_byte()? {
                Some(byte) => {
                    buf.push(byte);
                    taken += 1;
                }
                None => break,
            }
        }
        Ok(taken)
    }

    /// Drop pending input. Used after a dispatched frame so bytes queued
    /// behind it cannot be replayed as commands.
    pub fn discard_input(&mut self) -> Result<()> {
        self.link.discard_input()
    }

    /// Acknowledge an inbound command. Fire-and-forget.
    pub fn ack(&mut self) -> Result<()> {
        self.send(ACK.as_bytes())
    }

    /// Drive the controller's success/fail indicator.
    pub fn notify(&mut self, success: bool) -> Result<()> {
        let def = Command::Notify.definition();
        let sub = if success {
            def.subcommands[1]
        } else {
            def.subcommands[0]
        };
        self.request(&[def.id, sub]).map(|_| ())
    }

    /// Push a CPU temperature reading to the controller's display. The
    /// firmware expects whole degrees; the fraction is truncated.
    pub fn push_temperature(&mut self, celsius: f32) -> Result<()> {
        let mut command = vec![Command::Temperature.id()];
        command.extend_from_slice(format!("{}", celsius as i32).as_bytes());
        self.request(&command).map(|_| ())
    }

    /// Read the console and game names stored on the cartridge.
    ///
    /// A response without the ack prefix or the field separator (no
    /// cartridge, aborted read) yields two empty strings; validation is
    /// the session's job.
    pub fn read_cartridge(&mut self) -> Result<(String, String)> {
        let def = Command::Cartridge.definition();
        let response = self.request(&[def.id, def.subcommands[cart::READ]])?;
        let payload = match response.strip_prefix(ACK) {
            Some(payload) => payload,
            None => return Ok((String::new(), String::new())),
        };
        Ok(decode_cartridge_payload(payload).unwrap_or_default())
    }

    /// Store a console/game pair on the cartridge. Returns the numeric
    /// status reported by the controller; nonzero means success.
    pub fn write_cartridge(&mut self, console: &str, game: &str) -> Result<i32> {
        let def = Command::Cartridge.definition();
        let payload = encode_cartridge_payload(console, game)?;
        let mut command = vec![def.id, def.subcommands[cart::WRITE]];
        command.extend_from_slice(payload.as_bytes());
        let response = self.request(&command)?;
        parse_status(&response)
    }

    /// Blank the cartridge. Returns the controller's numeric status.
    pub fn erase_cartridge(&mut self) -> Result<i32> {
        let def = Command::Cartridge.definition();
        let response = self.request(&[def.id, def.subcommands[cart::ERASE]])?;
        parse_status(&response)
    }

    /// Query cartridge presence. Returns the controller's numeric status.
    pub fn cartridge_status(&mut self) -> Result<i32> {
        let def = Command::Cartridge.definition();
        let response = self.request(&[def.id, def.subcommands[cart::STATUS]])?;
        parse_status(&response)
    }
}

/// Build the fixed-width cartridge payload: console padded to 16 bytes,
/// game padded to 96, comma separated.
pub fn encode_cartridge_payload(console: &str, game: &str) -> Result<String> {
    if console.len() > MAX_CONSOLE_LEN {
        return Err(TransportError::FieldTooLong {
            field: "console",
            max: MAX_CONSOLE_LEN,
        });
    }
    if game.len() > MAX_GAME_LEN {
        return Err(TransportError::FieldTooLong {
            field: "game",
            max: MAX_GAME_LEN,
        });
    }
    // Pad by byte length, not character count; the cartridge layout is
    // fixed at the byte level and names are not always ASCII.
    let mut payload = String::with_capacity(MAX_CONSOLE_LEN + 1 + MAX_GAME_LEN);
    payload.push_str(console);
    while payload.len() < MAX_CONSOLE_LEN {
        payload.push(' ');
    }
    payload.push(',');
    payload.push_str(game);
    while payload.len() < MAX_CONSOLE_LEN + 1 + MAX_GAME_LEN {
        payload.push(' ');
    }
    Ok(payload)
}

/// Split a cartridge payload on the first comma and right-trim the
/// padding from both fields. `None` when the separator is missing.
pub fn decode_cartridge_payload(payload: &str) -> Option<(String, String)> {
    let (console, game) = payload.split_once(',')?;
    Some((console.trim_end().to_string(), game.trim_end().to_string()))
}

/// Extract the numeric status from an acked response (`OK<number>`).
fn parse_status(response: &str) -> Result<i32> {
    response
        .strip_prefix(ACK)
        .and_then(|rest| rest.trim().parse::<i32>().ok())
        .ok_or_else(|| TransportError::BadStatus(response.to_string()))
}

#[cfg(test)]
pub(crate) mod loopback {
    //! In-memory serial link for tests: writes are recorded, responses are
    //! scripted against the request bytes that should trigger them.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Inner {
        rx: VecDeque<u8>,
        script: VecDeque<(Vec<u8>, Vec<u8>)>,
        sent: Vec<Vec<u8>>,
        discards: usize,
        fail_when_drained: bool,
        fail_poll: bool,
    }

    /// Cloneable handle; all clones share the same buffers.
    #[derive(Clone, Default)]
    pub struct Loopback(Rc<RefCell<Inner>>);

    impl Loopback {
        pub fn new() -> Self {
            Self::default()
        }

        /// Transport over this link with all pacing delays collapsed.
        pub fn transport(&self) -> Transport<Loopback> {
            let mut transport = Transport::new(self.clone());
            transport.settle_delay = Duration::ZERO;
            transport.retry_delay = Duration::ZERO;
            transport.response_timeout = Duration::from_millis(20);
            transport
        }

        /// Queue `response` to become readable when a write starting with
        /// `expect` goes out.
        pub fn respond(&self, expect: &[u8], response: &[u8]) {
            self.0
                .borrow_mut()
                .script
                .push_back((expect.to_vec(), response.to_vec()));
        }

        /// Make bytes readable immediately, as if the controller pushed
        /// them unprompted.
        pub fn push_inbound(&self, bytes: &[u8]) {
            self.0.borrow_mut().rx.extend(bytes.iter().copied());
        }

        /// Every write issued so far, as text.
        pub fn sent_text(&self) -> Vec<String> {
            self.0
                .borrow()
                .sent
                .iter()
                .map(|frame| String::from_utf8_lossy(frame).into_owned())
                .collect()
        }

        pub fn discard_count(&self) -> usize {
            self.0.borrow().discards
        }

        pub fn unread_len(&self) -> usize {
            self.0.borrow().rx.len()
        }

        /// Reads fail once the receive buffer runs dry.
        pub fn fail_when_drained(&self) {
            self.0.borrow_mut().fail_when_drained = true;
        }

        /// Availability polls fail until cleared.
        pub fn set_fail_poll(&self, fail: bool) {
            self.0.borrow_mut().fail_poll = fail;
        }
    }

    impl SerialLink for Loopback {
        fn bytes_available(&mut self) -> Result<usize> {
            let inner = self.0.borrow();
            if inner.fail_poll {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "link down",
                )));
            }
            Ok(inner.rx.len())
        }

        fn read_byte(&mut self) -> Result<Option<u8>> {
            let mut inner = self.0.borrow_mut();
            match inner.rx.pop_front() {
                Some(byte) => Ok(Some(byte)),
                None if inner.fail_when_drained => Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "link down",
                ))),
                None => Ok(None),
            }
        }

        fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            let mut inner = self.0.borrow_mut();
            inner.sent.push(buf.to_vec());
            let matched = match inner.script.front() {
                Some((expect, _)) => buf.starts_with(expect),
                None => false,
            };
            if matched {
                if let Some((_, response)) = inner.script.pop_front() {
                    inner.rx.extend(response.iter().copied());
                }
            }
            Ok(())
        }

        fn discard_input(&mut self) -> Result<()> {
            let mut inner = self.0.borrow_mut();
            inner.discards += 1;
            inner.rx.clear();
            Ok(())
        }
    }
}
