//! Configuration for cartd.
//!
//! TOML configuration loaded from `~/.cartd/config.toml`:
//!
//! ```toml
//! # Serial device the controller is attached to
//! port = "/dev/ttyS0"
//!
//! # Game library root and launcher prefix
//! rom_base = "/home/pi/RetroPie/roms"
//! emulator_base = "/opt/retropie/supplementary/runcommand/runcommand.sh 0 _SYS_ "
//!
//! # Start the front-end shell at boot when no cartridge launches
//! start_frontend = false
//!
//! [temperature]
//! period_secs = 60
//!
//! [cartridge_scan]
//! enabled = false
//! period_secs = 5
//! ```
//!
//! A missing or unparseable file falls back to defaults. The command line
//! can override the port and the front-end flag on top of whatever loaded.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::system::retropie;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device the controller is attached to
    pub port: String,
    /// Root of the per-console game directories
    pub rom_base: PathBuf,
    /// Launcher prefix; console name and quoted game path get appended
    pub emulator_base: String,
    /// Last-played record written by the launcher hooks
    pub last_played_file: PathBuf,
    /// Daemon log file
    pub log_file: PathBuf,
    /// Start the front-end shell at boot when no cartridge launches
    pub start_frontend: bool,
    /// Periodic temperature push settings
    pub temperature: TemperatureConfig,
    /// Unattended cartridge rescan settings
    pub cartridge_scan: CartridgeScanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: "/dev/ttyS0".to_string(),
            rom_base: PathBuf::from(retropie::DEFAULT_ROM_BASE),
            emulator_base: retropie::DEFAULT_EMULATOR_BASE.to_string(),
            last_played_file: data_dir().join("romdetails.txt"),
            log_file: data_dir().join("cartd.log"),
            start_frontend: false,
            temperature: TemperatureConfig::default(),
            cartridge_scan: CartridgeScanConfig::default(),
        }
    }
}

/// Temperature push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub period_secs: u64,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self { period_secs: 60 }
    }
}

/// Cartridge rescan configuration. Off by default: the controller pushes
/// a command whenever the slot changes, polling is a fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CartridgeScanConfig {
    pub enabled: bool,
    pub period_secs: u64,
}

impl Default for CartridgeScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration, from `override_path` when given, otherwise from
    /// the default location.
    pub fn load(override_path: Option<&Path>) -> Self {
        let path = match override_path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::get_config_path(),
        };
        if let Some(path) = path {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }

    /// Write this configuration to the default location.
    pub fn save(&self) -> std::io::Result<PathBuf> {
        let path = data_dir().join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".cartd").join("config.toml"))
    }
}

/// Directory holding the config, log and cartridge records, created on
/// demand.
pub fn data_dir() -> PathBuf {
    let dir = match home_dir() {
        Some(home) => home.join(".cartd"),
        None => PathBuf::from(".cartd"),
    };
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    dir
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
