//! Core protocol components.
//!
//! This module contains the controller-protocol logic, kept free of any
//! operating-system glue:
//!
//! - **registry**: the closed table of commands the controller speaks
//! - **transport**: serial framing, handshakes and typed controller requests
//! - **dispatch**: inbound frame validation and execution
//! - **session**: idle/game-running state and cartridge validation
//!
//! # Architecture
//!
//! ```text
//! Scheduler (poll loop)
//! ├── Transport (serial link, framing, controller requests)
//! ├── dispatch (frame -> registry lookup -> action)
//! └── SessionState
//!     ├── SessionMode (Idle | GameRunning)
//!     └── CartridgeRecord (validated console/game mapping)
//! ```

pub mod dispatch;
pub mod registry;
pub mod session;
pub mod transport;

/// Frame terminator. Every command and response ends with a carriage return.
pub const TERMINATOR: u8 = 0x0D;

/// Abort marker. The controller emits BELL to cut a response short.
pub const ABORT: u8 = 0x07;

/// Acknowledgement literal, framed like any other command.
pub const ACK: &str = "OK";

/// Fixed line speed of the controller UART.
pub const BAUD_RATE: u32 = 19_200;

/// Width of the console field in a cartridge payload.
pub const MAX_CONSOLE_LEN: usize = 16;

/// Width of the game field in a cartridge payload.
pub const MAX_GAME_LEN: usize = 96;
