//! Command registry
//!
//! The closed set of commands spoken on the serial link, keyed by their
//! single-byte wire ids. Subcommand tables are ordered: the position of a
//! subcommand byte selects the behavior at dispatch time.

/// Commands understood by the controller and the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Cartridge,
    Init,
    Notify,
    Reset,
    Power,
    /// Deprecated alias of [`Command::Power`]. Old controller firmware
    /// still emits it, so it stays dispatchable.
    Shutdown,
    Temperature,
    FirmwareVersion,
    HardwareVersion,
}

/// One registry row: human name, wire id, ordered subcommand bytes.
#[derive(Clone, Copy, Debug)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub id: u8,
    pub subcommands: &'static [u8],
    pub command: Command,
}

/// Cartridge subcommand positions, in table order.
pub mod cart {
    pub const READ: usize = 0;
    pub const WRITE: usize = 1;
    pub const ERASE: usize = 2;
    pub const STATUS: usize = 3;
}

const CARTRIDGE: CommandDefinition = CommandDefinition {
    name: "cartridge",
    id: b'C',
    subcommands: &[b'r', b'w', b'e', b's'],
    command: Command::Cartridge,
};

const INIT: CommandDefinition = CommandDefinition {
    name: "init",
    id: b'I',
    subcommands: &[],
    command: Command::Init,
};

const NOTIFY: CommandDefinition = CommandDefinition {
    name: "notify",
    id: b'L',
    subcommands: &[b'0', b'1'],
    command: Command::Notify,
};

const RESET: CommandDefinition = CommandDefinition {
    name: "reset",
    id: b'R',
    subcommands: &[b'0', b'1'],
    command: Command::Reset,
};

const POWER: CommandDefinition = CommandDefinition {
    name: "power",
    id: b'P',
    subcommands: &[b'0', b'1'],
    command: Command::Power,
};

// Same subcommand table as power; the effect is shared at dispatch.
const SHUTDOWN: CommandDefinition = CommandDefinition {
    name: "shutdown",
    id: b'S',
    subcommands: &[b'0', b'1'],
    command: Command::Shutdown,
};

const TEMPERATURE: CommandDefinition = CommandDefinition {
    name: "temperature",
    id: b'T',
    subcommands: &[],
    command: Command::Temperature,
};

const FIRMWARE_VERSION: CommandDefinition = CommandDefinition {
    name: "firmware_version",
    id: b'v',
    subcommands: &[],
    command: Command::FirmwareVersion,
};

const HARDWARE_VERSION: CommandDefinition = CommandDefinition {
    name: "hardware_version",
    id: b'V',
    subcommands: &[],
    command: Command::HardwareVersion,
};

/// Every command the protocol knows. Ids are case-sensitive.
pub static REGISTRY: [CommandDefinition; 9] = [
    CARTRIDGE,
    INIT,
    NOTIFY,
    RESET,
    POWER,
    SHUTDOWN,
    TEMPERATURE,
    FIRMWARE_VERSION,
    HARDWARE_VERSION,
];

/// Look up a registry row by wire id.
pub fn definition_for(id: u8) -> Option<&'static CommandDefinition> {
    REGISTRY.iter().find(|def| def.id == id)
}

/// Subcommand table for a wire id; empty when the id is unknown or the
/// command takes no subcommand.
#[allow(dead_code)]
pub fn subcommands_for(id: u8) -> &'static [u8] {
    definition_for(id).map(|def| def.subcommands).unwrap_or(&[])
}

impl Command {
    /// Registry row for this command.
    pub fn definition(self) -> &'static CommandDefinition {
        match self {
            Command::Cartridge => &CARTRIDGE,
            Command::Init => &INIT,
            Command::Notify => &NOTIFY,
            Command::Reset => &RESET,
            Command::Power => &POWER,
            Command::Shutdown => &SHUTDOWN,
            Command::Temperature => &TEMPERATURE,
            Command::FirmwareVersion => &FIRMWARE_VERSION,
            Command::HardwareVersion => &HARDWARE_VERSION,
        }
    }

    /// Wire id for outbound encoding.
    pub fn id(self) -> u8 {
        self.definition().id
    }
}
