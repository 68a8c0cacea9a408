//! RetroPie platform tables
//!
//! Console allow-list, process names for the emulator and front-end
//! binaries, and the path conventions the runcommand launcher expects.

use std::path::{Path, PathBuf};

/// Consoles with a configured emulator. Cartridge console fields are
/// matched against this list after normalization.
pub const CONSOLES: &[&str] = &[
    "amiga",
    "amstradcpc",
    "apple2",
    "arcade",
    "atari800",
    "atari2600",
    "atari5200",
    "atari7800",
    "atarilynx",
    "atarist",
    "c64",
    "coco",
    "dragon32",
    "dreamcast",
    "fba",
    "fds",
    "gamegear",
    "gb",
    "gba",
    "gbc",
    "intellivision",
    "macintosh",
    "mame-advmame",
    "mame-libretro",
    "mame-mame4all",
    "mastersystem",
    "megadrive",
    "msx",
    "n64",
    "neogeo",
    "nes",
    "ngp",
    "ngpc",
    "pc",
    "ports",
    "psp",
    "psx",
    "scummvm",
    "sega32x",
    "segacd",
    "sg-1000",
    "snes",
    "vectrex",
    "videopac",
    "wonderswan",
    "wonderswancolor",
    "zmachine",
    "zxspectrum",
];

/// Emulator binaries that may hold the display. Matched against the
/// process comm name, which the kernel truncates to 15 characters.
pub const EMULATOR_PROCESSES: &[&str] = &[
    "retroarch",
    "ags",
    "uae4all2",
    "uae4arm",
    "capricerpi",
    "linapple",
    "hatari",
    "stella",
    "atari800",
    "xroar",
    "vice",
    "daphne",
    "reicast",
    "pifba",
    "osmose",
    "gpsp",
    "jzintv",
    "basiliskll",
    "mame",
    "advmame",
    "dgen",
    "openmsx",
    "mupen64plus",
    "gngeo",
    "dosbox",
    "ppsspp",
    "simcoupe",
    "scummvm",
    "snes9x",
    "pisnes",
    "frotz",
    "fbzx",
    "fuse",
    "gemrb",
    "cgenesis",
    "zdoom",
    "eduke32",
    "lincity",
    "love",
    "alephone",
    "micropolis",
    "openbor",
    "openttd",
    "opentyrian",
    "cannonball",
    "tyrquake",
    "ioquake3",
    "residualvm",
    "xrick",
    "sdlpop",
    "uqm",
    "stratagus",
    "wolf4sdl",
    "solarus",
];

/// Front-end shell process names, full and comm-truncated.
pub const FRONTEND_PROCESSES: &[&str] = &["emulationstation", "emulationstatio"];

/// Kodi ignores SIGTERM; it gets SIGKILL on every sweep.
pub const HARD_KILL_PROCESSES: &[&str] = &["kodi", "kodi.bin"];

/// Name searched in command lines to detect a live game session.
pub const EMULATOR_WATCH_PROCESS: &str = "retroarch";

/// Name searched in command lines to detect the front-end shell.
pub const FRONTEND_PROCESS: &str = "emulationstation";

/// Command used to bring the front-end shell up.
pub const FRONTEND_COMMAND: &str = "emulationstation";

/// Default root of the per-console game directories.
pub const DEFAULT_ROM_BASE: &str = "/home/pi/RetroPie/roms";

/// Default runcommand launcher prefix. The trailing space is part of the
/// contract: console name and quoted game path get appended verbatim.
pub const DEFAULT_EMULATOR_BASE: &str = "/opt/retropie/supplementary/runcommand/runcommand.sh 0 _SYS_ ";

/// Whether a normalized console name has a configured emulator.
pub fn is_supported_console(console: &str) -> bool {
    CONSOLES.contains(&console)
}

/// `<rom_base>/<console>/<game>`
pub fn game_path(rom_base: &Path, console: &str, game: &str) -> PathBuf {
    rom_base.join(console).join(game)
}

/// Launcher invocation prefix for `console`, ending in the space the
/// game path is appended after.
pub fn emulator_command(emulator_base: &str, console: &str) -> String {
    format!("{}{} ", emulator_base, console)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_lookup_is_case_sensitive() {
        assert!(is_supported_console("nes"));
        assert!(is_supported_console("sg-1000"));
        assert!(!is_supported_console("NES"));
        assert!(!is_supported_console("c128"));
    }

    #[test]
    fn test_game_path_layout() {
        let path = game_path(Path::new("/home/pi/RetroPie/roms"), "snes", "smw.sfc");
        assert_eq!(path, PathBuf::from("/home/pi/RetroPie/roms/snes/smw.sfc"));
    }

    #[test]
    fn test_emulator_command_keeps_trailing_space() {
        let cmd = emulator_command(DEFAULT_EMULATOR_BASE, "nes");
        assert!(cmd.ends_with("_SYS_ nes "));
    }

    #[test]
    fn test_frontend_not_in_emulator_list() {
        for name in FRONTEND_PROCESSES {
            assert!(!EMULATOR_PROCESSES.contains(name));
        }
    }
}
