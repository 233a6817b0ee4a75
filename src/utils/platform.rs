//! Platform facts used by the updater.
//!
//! Which executable header a native binary carries, where per-user data
//! lives, and how user-supplied paths are expanded. Anything that differs
//! between Windows, macOS and Linux is decided here so the rest of the
//! crate can stay platform-neutral.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Directory name used under the platform data and config directories.
pub const APP_DIR_NAME: &str = "pdfren-updater";

/// Checks if the current platform is Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Leading bytes of a native executable on the current platform.
///
/// PE images start with `MZ`, ELF images with `\x7fELF`. Mach-O has several
/// magics; the 64-bit little-endian one is what current toolchains emit.
#[must_use]
pub const fn executable_magic() -> &'static [u8] {
    if cfg!(windows) {
        b"MZ"
    } else if cfg!(target_os = "macos") {
        &[0xcf, 0xfa, 0xed, 0xfe]
    } else {
        b"\x7fELF"
    }
}

/// Whether `header` starts like a native executable for this platform.
///
/// Fat (universal) Mach-O binaries are accepted on macOS as well.
pub fn has_executable_magic(header: &[u8]) -> bool {
    if header.starts_with(executable_magic()) {
        return true;
    }
    cfg!(target_os = "macos") && header.starts_with(&[0xca, 0xfe, 0xba, 0xbe])
}

/// Expands `~` and environment variables in a user-supplied path.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path)
        .with_context(|| format!("Failed to expand path: {path}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Per-user data directory for backups, staging and state files.
pub fn get_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir().map(|p| p.join(APP_DIR_NAME)).ok_or_else(|| {
        let platform_help = if is_windows() {
            "On Windows: Check that the LOCALAPPDATA environment variable is set"
        } else if cfg!(target_os = "macos") {
            "On macOS: Check that the HOME environment variable is set"
        } else {
            "On Linux: Check that the XDG_DATA_HOME or HOME environment variable is set"
        };
        anyhow::anyhow!("Could not determine data directory.\n\n{platform_help}")
    })
}

/// Per-user config directory holding the settings file.
pub fn get_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR_NAME))
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}
