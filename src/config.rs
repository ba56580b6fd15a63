//! Settings loaded from `settings.toml`
//!
//! Missing file means defaults; a malformed file is an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::SettingsError;

const APP_DIR: &str = "joyroute";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// 1-based joystick number, `/dev/input/js0` is device 1
    pub device_index: u8,
    pub device_path_prefix: String,
    /// Buffer size of receivers created by the `on_*` helpers
    pub subscriber_capacity: usize,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_index: 1,
            device_path_prefix: "/dev/input/js".to_string(),
            subscriber_capacity: 32,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// `<config dir>/joyroute/settings.toml`
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Loads from the default location, falling back to defaults
    pub fn load_default() -> Result<Self, SettingsError> {
        Self::load(&Self::default_path()?)
    }

    /// Like [`Settings::load_default`], but a platform without a config
    /// directory gets defaults instead of an error
    pub fn load_or_default() -> Result<Self, SettingsError> {
        Self::load_resolved(Self::default_path())
    }

    fn load_resolved(path: Result<PathBuf, SettingsError>) -> Result<Self, SettingsError> {
        match path {
            Ok(path) => Self::load(&path),
            Err(SettingsError::NoConfigDir) => {
                warn!("No configuration directory, using default settings");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let settings = toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn subscriber_capacity(&self) -> usize {
        self.subscriber_capacity.max(1)
    }
}
