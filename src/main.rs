//! cartd - cartridge controller daemon for RetroPie game consoles
//!
//! cartd pairs a RetroPie host with the cartridge-slot microcontroller
//! over a serial line: insert a cartridge, press the console button, and
//! the matching emulator starts with the stored game; press it again and
//! the machine drops back to the front-end shell.
//!
//! # Features
//!
//! - **Cartridge launch**: power button scans the slot and boots the game
//! - **Eject to front-end**: second press stops the game, front-end returns
//! - **Last-played persist**: burn the most recent game back to the cartridge
//! - **Soft reset**: controller-triggered RetroArch reset over UDP
//! - **Power off**: clean shutdown from the console's power switch
//! - **Telemetry**: CPU temperature pushed to the controller display
//!
//! # Quick Start
//!
//! ```text
//! cartd                        # Serve /dev/ttyS0
//! cartd --port /dev/ttyUSB0    # Different serial device
//! cartd -e                     # Front-end up when no cartridge at boot
//! cartd --init-config          # Write ~/.cartd/config.toml and exit
//! ```
//!
//! # Controller commands
//!
//! | Id  | Action |
//! |-----|--------|
//! | C   | Cartridge read / write / erase / status |
//! | I   | Init handshake |
//! | L   | Success / fail indicator |
//! | R   | Soft reset or persist last-played |
//! | P   | Power button, power off |
//! | T   | Temperature request |
//! | v V | Firmware and hardware versions |

mod config;
mod core;
mod sched;
mod system;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::Config;
use crate::core::session::{SessionMode, SessionState};
use crate::core::transport::Transport;
use crate::sched::Scheduler;
use crate::system::os::OsSystem;
use crate::system::System;

#[derive(Parser)]
#[command(
    version,
    about = "Serial cartridge-controller daemon for RetroPie game consoles"
)]
struct Args {
    /// Serial device of the cartridge controller
    #[arg(long)]
    port: Option<String>,

    /// Bring up the front-end shell when no cartridge launches at boot
    #[arg(short = 'e', long = "frontend")]
    frontend: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file to use instead of ~/.cartd/config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write a default configuration file and exit
    #[arg(long)]
    init_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init_config {
        let path = Config::default()
            .save()
            .context("Failed to write configuration")?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref());
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.frontend {
        config.start_frontend = true;
    }

    init_logging(&config, args.verbose);
    info!(
        "cartd {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.port
    );

    let mut transport = Transport::connect(&config.port)
        .with_context(|| format!("Failed to open serial port {}", config.port))?;
    info!(
        "controller firmware {:?} hardware {:?}",
        transport.firmware_version, transport.hardware_version
    );
    transport
        .initialize()
        .context("Controller init handshake failed")?;

    let system = OsSystem::new(&config);
    let mut session = SessionState::new();

    // Boot behaves like a power press: an inserted cartridge starts
    // right away.
    session.power_button(&mut transport, &system)?;
    match session.mode() {
        SessionMode::GameRunning => {
            let record = session.cartridge();
            info!("cartridge game running: {}/{}", record.console, record.game);
        }
        SessionMode::Idle if config.start_frontend => {
            if let Err(e) = system.launch_frontend() {
                warn!("front-end launch failed: {}", e);
            }
        }
        SessionMode::Idle => debug!("no cartridge at boot, staying idle"),
    }

    let scheduler = Scheduler::new(&config);
    scheduler.run(&mut transport, &mut session, &system)
}

/// Stdout at info (debug with `-v`) plus a debug-level file sink. The
/// file sink is best effort: with no usable log file only stdout logs.
fn init_logging(config: &Config, verbose: bool) {
    let stdout_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_filter(stdout_level);

    if let Some(parent) = config.log_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file_layer = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .ok()
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG)
        });

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init();
}
