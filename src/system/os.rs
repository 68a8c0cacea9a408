//! Production system glue
//!
//! Thin OS layer behind the [`System`](super::System) trait: /proc walks
//! for process control, sysfs for the CPU temperature, the RetroArch UDP
//! command socket for soft resets, and shell-outs for launching and
//! shutdown.

use std::fs;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use super::retropie;
use super::{ExternalCallError, System};
use crate::config::Config;

/// RetroArch network-command endpoint; the emulator must run with
/// `network_cmd_enable = true` for resets to land.
const RETROARCH_CMD_ADDR: &str = "127.0.0.1:55355";

/// Soft-reset command understood by the RetroArch network interface.
const RESET_COMMAND: &[u8] = b"RESET";

/// Thermal sysfs node carrying the SoC temperature in millidegrees.
const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// [`System`] implementation for the real machine.
pub struct OsSystem {
    rom_base: PathBuf,
    emulator_base: String,
    last_played_file: PathBuf,
}

impl OsSystem {
    pub fn new(config: &Config) -> Self {
        Self {
            rom_base: config.rom_base.clone(),
            emulator_base: config.emulator_base.clone(),
            last_played_file: config.last_played_file.clone(),
        }
    }

    /// (pid, comm) for everything /proc will show us.
    fn all_processes() -> Vec<(u32, String)> {
        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                warn!("/proc unavailable: {}", e);
                return Vec::new();
            }
        };
        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let pid = match entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            {
                Some(pid) => pid,
                None => continue,
            };
            let comm = fs::read_to_string(entry.path().join("comm")).unwrap_or_default();
            let comm = comm.trim().to_string();
            if !comm.is_empty() {
                processes.push((pid, comm));
            }
        }
        processes
    }

    /// Whether any other process's command line contains `needle`.
    fn cmdline_contains(needle: &str) -> bool {
        let own_pid = std::process::id();
        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        for entry in entries.flatten() {
            let pid = match entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            {
                Some(pid) => pid,
                None => continue,
            };
            if pid == own_pid {
                continue;
            }
            let raw = fs::read(entry.path().join("cmdline")).unwrap_or_default();
            if raw.is_empty() {
                continue;
            }
            let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
            if cmdline.contains(needle) {
                return true;
            }
        }
        false
    }

    /// Signal every process whose comm name is in `names`. The emulators
    /// run under another user, so the signal goes through sudo.
    fn signal_by_name(names: &[&str], signal: &str) {
        for (pid, comm) in Self::all_processes() {
            if names.contains(&comm.as_str()) {
                debug!("stopping {} (pid {})", comm, pid);
                let result = Command::new("sudo")
                    .args(["kill", signal, &pid.to_string()])
                    .status();
                if let Err(e) = result {
                    warn!("kill {} failed: {}", pid, e);
                }
            }
        }
    }

    /// Run `command_line` through the shell. The trailing `&` makes the
    /// shell exit immediately, leaving the real process reparented.
    fn spawn_shell(what: &'static str, command_line: &str) -> Result<(), ExternalCallError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .spawn()
            .map_err(|source| ExternalCallError::Spawn { what, source })?;
        let _ = child.wait();
        Ok(())
    }
}

impl System for OsSystem {
    fn console_supported(&self, console: &str) -> bool {
        retropie::is_supported_console(console)
    }

    fn rom_exists(&self, console: &str, game: &str) -> bool {
        self.rom_path(console, game).is_file()
    }

    fn rom_path(&self, console: &str, game: &str) -> PathBuf {
        retropie::game_path(&self.rom_base, console, game)
    }

    fn emulator_command(&self, console: &str) -> String {
        retropie::emulator_command(&self.emulator_base, console)
    }

    fn last_played(&self) -> Result<(String, String), ExternalCallError> {
        // The launcher hooks write the record as root.
        let path_arg = self.last_played_file.display().to_string();
        let _ = Command::new("sudo")
            .args(["chown", "pi", "-R", &path_arg])
            .status();
        let text =
            fs::read_to_string(&self.last_played_file).map_err(|source| {
                ExternalCallError::ReadFile {
                    path: self.last_played_file.clone(),
                    source,
                }
            })?;
        let line = text.lines().next().unwrap_or("").trim();
        let mut parts = line.rsplit('/');
        let game = parts.next().unwrap_or("").to_string();
        let console = parts.next().unwrap_or("").to_string();
        if console.is_empty() || game.is_empty() {
            return Err(ExternalCallError::Parse(self.last_played_file.clone()));
        }
        debug!("last played console={:?} game={:?}", console, game);
        Ok((console, game))
    }

    fn stop_emulators(&self) {
        Self::signal_by_name(retropie::EMULATOR_PROCESSES, "-15");
        Self::signal_by_name(retropie::HARD_KILL_PROCESSES, "-9");
    }

    fn stop_emulators_and_frontend(&self) {
        Self::signal_by_name(retropie::EMULATOR_PROCESSES, "-15");
        Self::signal_by_name(retropie::FRONTEND_PROCESSES, "-15");
        Self::signal_by_name(retropie::HARD_KILL_PROCESSES, "-9");
    }

    fn launch_emulator(
        &self,
        emulator_cmd: &str,
        rom_path: &Path,
    ) -> Result<(), ExternalCallError> {
        let command_line = format!("{}\"{}\" &", emulator_cmd, rom_path.display());
        debug!("launching emulator: {}", command_line);
        Self::spawn_shell("emulator", &command_line)?;
        // The front-end needs /dev/shm back under the pi user afterwards.
        let _ = Command::new("sudo")
            .args(["chown", "pi", "-R", "/dev/shm"])
            .status();
        Ok(())
    }

    fn launch_frontend(&self) -> Result<(), ExternalCallError> {
        debug!("launching front-end shell");
        Self::spawn_shell(
            "front-end",
            &format!("{} &", retropie::FRONTEND_COMMAND),
        )
    }

    fn emulator_running(&self) -> bool {
        Self::cmdline_contains(retropie::EMULATOR_WATCH_PROCESS)
    }

    fn frontend_running(&self) -> bool {
        Self::cmdline_contains(retropie::FRONTEND_PROCESS)
    }

    fn reset_emulator(&self) -> Result<(), ExternalCallError> {
        debug!("sending RESET to {}", RETROARCH_CMD_ADDR);
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(ExternalCallError::Network)?;
        socket
            .send_to(RESET_COMMAND, RETROARCH_CMD_ADDR)
            .map_err(ExternalCallError::Network)?;
        Ok(())
    }

    fn power_off(&self) -> Result<(), ExternalCallError> {
        info!("performing shutdown");
        Command::new("sudo")
            .args(["shutdown", "-h", "now"])
            .status()
            .map_err(|source| ExternalCallError::Spawn {
                what: "shutdown",
                source,
            })?;
        Ok(())
    }

    fn cpu_temperature(&self) -> Result<f32, ExternalCallError> {
        let raw = fs::read_to_string(THERMAL_ZONE).map_err(|source| {
            ExternalCallError::ReadFile {
                path: PathBuf::from(THERMAL_ZONE),
                source,
            }
        })?;
        let millidegrees: f32 = raw
            .trim()
            .parse()
            .map_err(|_| ExternalCallError::Parse(PathBuf::from(THERMAL_ZONE)))?;
        Ok(millidegrees / 1000.0)
    }
}
