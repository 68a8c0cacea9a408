//! Host system collaborators
//!
//! Everything the protocol core needs from the operating system, behind
//! one narrow trait so the core stays testable without hardware:
//!
//! - **os**: production implementation (process control, sysfs, sockets)
//! - **retropie**: platform tables and path conventions

pub mod os;
pub mod retropie;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExternalCallError {
    #[error("Failed to spawn {what}: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not parse {0}")]
    Parse(PathBuf),

    #[error("Network command failed: {0}")]
    Network(#[source] io::Error),
}

/// Operating-system services consumed by the session and dispatch logic.
///
/// Implementations must be safe to call repeatedly; every method is a
/// point-in-time action or query with no handshake between calls.
pub trait System {
    /// Whether `console` (already normalized) has a configured emulator.
    fn console_supported(&self, console: &str) -> bool;

    /// Whether the game file exists in the console's library directory.
    fn rom_exists(&self, console: &str, game: &str) -> bool;

    /// Full path of the game file, whether or not it exists.
    fn rom_path(&self, console: &str, game: &str) -> PathBuf;

    /// Launcher invocation prefix for `console`; the quoted game path is
    /// appended at spawn time.
    fn emulator_command(&self, console: &str) -> String;

    /// Console/game pair from the last-played record on disk.
    fn last_played(&self) -> Result<(String, String), ExternalCallError>;

    /// Stop every known emulator process; the front-end stays up.
    fn stop_emulators(&self);

    /// Stop emulators and the front-end both, clearing the display.
    fn stop_emulators_and_frontend(&self);

    /// Spawn the emulator for a validated cartridge.
    fn launch_emulator(&self, emulator_cmd: &str, rom_path: &Path)
        -> Result<(), ExternalCallError>;

    /// Spawn the front-end shell.
    fn launch_frontend(&self) -> Result<(), ExternalCallError>;

    /// Whether an emulator process is currently alive.
    fn emulator_running(&self) -> bool;

    /// Whether the front-end shell is currently alive.
    fn frontend_running(&self) -> bool;

    /// Soft-reset the running emulator over its network command channel.
    fn reset_emulator(&self) -> Result<(), ExternalCallError>;

    /// Power the machine down.
    fn power_off(&self) -> Result<(), ExternalCallError>;

    /// CPU temperature in degrees Celsius.
    fn cpu_temperature(&self) -> Result<f32, ExternalCallError>;
}
