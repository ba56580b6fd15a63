//! Error definitions for device connection and settings

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of the device API
///
/// Read failures after a connection is established are not represented here:
/// they end the reader task and show up as closed channels.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device node could not be opened
    #[error("Failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Device index 0 was requested; indices are 1-based
    #[error("Device index must be 1 or greater")]
    InvalidIndex,

    /// No button with this number was reported during calibration
    #[error("Unknown button number: {0}")]
    UnknownButton(u8),

    /// No hat (or hat axis) with this number was reported during calibration
    #[error("Unknown hat number: {0}")]
    UnknownHat(u8),

    /// The event router has already been taken from this handle
    #[error("Event router already taken")]
    RouterTaken,

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Errors while loading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The platform has no per-user configuration directory
    #[error("No configuration directory available")]
    NoConfigDir,
}
