//! GCodeLink Settings Crate
//!
//! Loads, validates and saves the application configuration.

pub mod config;
pub mod error;

pub use config::{Config, ControllerSettings};
pub use error::{ConfigError, SettingsError, SettingsResult};
