//! # GCodeLink
//!
//! Host-side command scheduler and G-code preprocessor for GRBL-style CNC
//! controllers.
//!
//! ## Architecture
//!
//! GCodeLink is organized as a workspace with multiple crates:
//!
//! 1. **gcodelink-core** - Error taxonomy, machine state, event bus
//! 2. **gcodelink-gcode** - Tokenizer, modal groups, token transformer pipeline
//! 3. **gcodelink-communication** - Command trackers, programs, GRBL controller
//! 4. **gcodelink-settings** - Configuration files
//! 5. **gcodelink** - Binary that preprocesses a program and prints it

use std::time::Duration;

pub use gcodelink_communication::{
    CommandStage, CommandTracker, Controller, ControllerConfig, MachineInfo, NoOpTransport,
    Program, ProgramKind, Transport,
};
pub use gcodelink_core::{
    event_bus, AppEvent, CommandError, ConnectionError, ControllerError, Error, MachineState,
    Result,
};
pub use gcodelink_gcode::{tokens_to_lines, GcodeProcessor, Token, TokenTransformer};
pub use gcodelink_settings::{Config, ControllerSettings, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Map file settings onto the controller's runtime configuration
pub fn controller_config(settings: &ControllerSettings) -> ControllerConfig {
    ControllerConfig {
        queue_capacity: settings.queue_capacity,
        status_poll_hz: settings.status_poll_hz,
        dispatch_tick: Duration::from_millis(settings.dispatch_tick_ms),
        wait_timeout: Duration::from_millis(settings.wait_timeout_ms),
        homing_attempts: settings.homing_attempts,
        homing_timeout: Duration::from_millis(settings.homing_timeout_ms),
        history_limit: settings.history_limit,
        macro_dir: settings.macro_dir.clone(),
        status_polling: settings.status_polling,
    }
}

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Pretty console output on stderr
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
