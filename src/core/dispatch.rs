//! Inbound frame dispatch
//!
//! Turns one complete frame from the controller into a host action. The
//! frame is structurally validated against the registry first (command
//! id, then subcommand byte); structured commands are acknowledged before
//! their effect runs, and anything that fails validation is logged and
//! dropped with no response on the wire.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::registry::{self, cart, Command};
use super::session::SessionState;
use super::transport::{decode_cartridge_payload, SerialLink, Transport, TransportError};
use crate::system::System;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown command id {0:?}")]
    UnknownCommand(char),

    #[error("Unknown {command} subcommand {subcommand:?}")]
    UnknownSubcommand {
        command: &'static str,
        subcommand: char,
    },

    #[error("Frame too short for {0}")]
    ShortFrame(&'static str),
}

/// Structurally valid controller request, ready to execute.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    ResetEmulator,
    PersistCartridge,
    PowerButton,
    PowerOff,
    CartridgeRead,
    CartridgeWrite(String),
    CartridgeErase,
    CartridgeStatus,
    /// Valid frame with no host-side effect; logged only.
    Ignored { name: &'static str, ack: bool },
}

impl Action {
    fn wants_ack(&self) -> bool {
        match self {
            Action::Ignored { ack, .. } => *ack,
            _ => true,
        }
    }
}

/// Dispatch one complete inbound frame (terminator already stripped).
///
/// Only transport write faults escalate to the caller; structural rejects
/// and effect failures end here with a log line.
pub fn handle_frame<L: SerialLink>(
    frame: &[u8],
    transport: &mut Transport<L>,
    session: &mut SessionState,
    system: &dyn System,
) -> Result<(), TransportError> {
    let action = match parse(frame) {
        Ok(action) => action,
        Err(reason) => {
            debug!(
                "dropping frame {:?}: {}",
                String::from_utf8_lossy(frame),
                reason
            );
            return Ok(());
        }
    };
    if action.wants_ack() {
        transport.ack()?;
    }
    run(action, transport, session, system)
}

/// Structural validation: command id, then subcommand, both against the
/// registry. The subcommand's position in its table selects the action.
fn parse(frame: &[u8]) -> Result<Action, ProtocolError> {
    let id = match frame.first() {
        Some(id) => *id,
        None => return Err(ProtocolError::ShortFrame("command id")),
    };
    let def = registry::definition_for(id).ok_or(ProtocolError::UnknownCommand(id as char))?;
    if def.subcommands.is_empty() {
        // Chatter the controller may echo back; nothing for the host to do.
        return Ok(Action::Ignored {
            name: def.name,
            ack: false,
        });
    }
    let sub = match frame.get(1) {
        Some(sub) => *sub,
        None => return Err(ProtocolError::ShortFrame(def.name)),
    };
    let index = def
        .subcommands
        .iter()
        .position(|&candidate| candidate == sub)
        .ok_or(ProtocolError::UnknownSubcommand {
            command: def.name,
            subcommand: sub as char,
        })?;
    Ok(match (def.command, index) {
        (Command::Reset, 0) => Action::ResetEmulator,
        (Command::Reset, _) => Action::PersistCartridge,
        // The deprecated shutdown id shares the power effects.
        (Command::Power | Command::Shutdown, 0) => Action::PowerButton,
        (Command::Power | Command::Shutdown, _) => Action::PowerOff,
        (Command::Cartridge, cart::READ) => Action::CartridgeRead,
        (Command::Cartridge, cart::WRITE) => {
            Action::CartridgeWrite(String::from_utf8_lossy(&frame[2..]).into_owned())
        }
        (Command::Cartridge, cart::ERASE) => Action::CartridgeErase,
        (Command::Cartridge, _) => Action::CartridgeStatus,
        (_, _) => Action::Ignored {
            name: def.name,
            ack: true,
        },
    })
}

fn run<L: SerialLink>(
    action: Action,
    transport: &mut Transport<L>,
    session: &mut SessionState,
    system: &dyn System,
) -> Result<(), TransportError> {
    match action {
        Action::ResetEmulator => {
            info!("soft reset requested");
            if let Err(e) = system.reset_emulator() {
                warn!("emulator reset failed: {}", e);
            }
            Ok(())
        }
        Action::PersistCartridge => persist_cartridge(transport, system),
        Action::PowerButton => session.power_button(transport, system),
        Action::PowerOff => {
            info!("controller requested power down");
            if let Err(e) = system.power_off() {
                warn!("power down failed: {}", e);
            }
            Ok(())
        }
        Action::CartridgeRead => session.scan_cartridge(transport, system),
        Action::CartridgeWrite(payload) => match decode_cartridge_payload(&payload) {
            Some((console, game)) => {
                log_status("cartridge write", transport.write_cartridge(&console, &game))
            }
            None => {
                warn!("cartridge write payload has no separator: {:?}", payload);
                Ok(())
            }
        },
        Action::CartridgeErase => log_status("cartridge erase", transport.erase_cartridge()),
        Action::CartridgeStatus => log_status("cartridge status", transport.cartridge_status()),
        Action::Ignored { name, .. } => {
            debug!("{} frame needs nothing from the host", name);
            Ok(())
        }
    }
}

/// Copy the last-played record onto the cartridge and flash the
/// indicator with the outcome. A nonzero write status means success.
fn persist_cartridge<L: SerialLink>(
    transport: &mut Transport<L>,
    system: &dyn System,
) -> Result<(), TransportError> {
    let (console, game) = match system.last_played() {
        Ok(pair) => pair,
        Err(e) => {
            warn!("last-played record unavailable: {}", e);
            return transport.notify(false);
        }
    };
    debug!("persisting last played {:?} on {:?}", game, console);
    match transport.write_cartridge(&console, &game) {
        Ok(status) => {
            info!("cartridge update status {}", status);
            transport.notify(status != 0)
        }
        Err(TransportError::Io(e)) => Err(TransportError::Io(e)),
        Err(e) => {
            warn!("cartridge update failed: {}", e);
            transport.notify(false)
        }
    }
}

/// Surface a numeric controller status in the log. A garbled status is
/// logged as well but never escalates.
fn log_status(
    operation: &str,
    result: Result<i32, TransportError>,
) -> Result<(), TransportError> {
    match result {
        Ok(status) => {
            info!("{} status {}", operation, status);
            Ok(())
        }
        Err(TransportError::BadStatus(raw)) => {
            warn!("{} returned garbage: {:?}", operation, raw);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
