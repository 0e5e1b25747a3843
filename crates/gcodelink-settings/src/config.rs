//! Configuration file handling
//!
//! Supports JSON and TOML files; the format is chosen by extension. Missing
//! keys take their defaults, so a file only needs the values it changes.
//! Unknown keys and sections are ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, SettingsError, SettingsResult};

/// Directory name under the platform config directory
pub const CONFIG_DIR_NAME: &str = "gcodelink";

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Controller tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Maximum unacknowledged commands on the device
    pub queue_capacity: usize,
    /// Status queries per second
    pub status_poll_hz: f64,
    /// Dispatch loop period in milliseconds
    pub dispatch_tick_ms: u64,
    /// Bound for pseudo-command waits in milliseconds
    pub wait_timeout_ms: u64,
    /// Homing attempts before giving up
    pub homing_attempts: u32,
    /// Bound for one homing cycle in milliseconds
    pub homing_timeout_ms: u64,
    /// Commands retained in history
    pub history_limit: usize,
    /// Directory holding `<name>.g` macro files
    pub macro_dir: PathBuf,
    /// Poll the device for status reports
    pub status_polling: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            status_poll_hz: 10.0,
            dispatch_tick_ms: 100,
            wait_timeout_ms: 60_000,
            homing_attempts: 3,
            homing_timeout_ms: 60_000,
            history_limit: 1000,
            macro_dir: PathBuf::from("./macros"),
            status_polling: true,
        }
    }
}

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string()).into()),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Controller tuning
    pub controller: ControllerSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform default location, e.g. `~/.config/gcodelink/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                SettingsError::ConfigDirectory("no config directory on this platform".to_string())
            })
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path)?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load config from `path`, or defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;

        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let controller = &self.controller;
        if controller.queue_capacity == 0 {
            return Err(SettingsError::invalid("controller.queue_capacity", "must be > 0"));
        }

        if !(controller.status_poll_hz > 0.0 && controller.status_poll_hz.is_finite()) {
            return Err(SettingsError::invalid(
                "controller.status_poll_hz",
                "must be a positive number",
            ));
        }

        if controller.dispatch_tick_ms == 0 {
            return Err(SettingsError::invalid("controller.dispatch_tick_ms", "must be > 0"));
        }

        if controller.homing_attempts == 0 {
            return Err(SettingsError::invalid("controller.homing_attempts", "must be > 0"));
        }

        Ok(())
    }
}
