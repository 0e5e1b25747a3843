//! Error handling for GCodeLink
//!
//! Provides the error taxonomy shared by every layer:
//! - Command errors (a single tracked command failed or was misused)
//! - Controller errors (scheduler level failures)
//! - Connection errors (transport failures)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Command error type
///
/// Every variant except `InvalidTransition` is local to one command and never
/// halts the controller. `InvalidTransition` signals a queueing bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// A wait exceeded its bound
    #[error("Command '{command}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The command text that was being waited on.
        command: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The device rejected the command with `error:N`
    #[error("Device error {code}: {description}")]
    Protocol {
        /// The numeric error code reported by the device.
        code: u32,
        /// Human readable description of the code.
        description: String,
    },

    /// A `[name]` placeholder has no registered accessor
    #[error("Runtime variable '{name}' not found")]
    UnresolvedVariable {
        /// The placeholder name.
        name: String,
    },

    /// A `%name` pseudo-command has no registered handler
    #[error("Custom command '{name}' not found")]
    UnknownPseudoCommand {
        /// The pseudo-command name without its marker.
        name: String,
    },

    /// An operation was attempted in an incompatible stage
    #[error("Cannot {operation} a command in the {stage} stage")]
    InvalidTransition {
        /// The attempted operation.
        operation: &'static str,
        /// The stage the command was in.
        stage: String,
    },

    /// A pseudo-command handler failed
    #[error("Custom command failed: {message}")]
    Handler {
        /// The failure message.
        message: String,
    },

    /// A command this one reads results from did not complete
    #[error("Command '{command}' did not complete: {reason}")]
    DependencyFailed {
        /// The command that was depended on.
        command: String,
        /// Why it did not complete.
        reason: String,
    },

    /// The line could not be written to the transport
    #[error("Failed to send command: {reason}")]
    SendFailed {
        /// The transport's failure message.
        reason: String,
    },
}

/// Controller error type
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// Controller operation timed out
    #[error("Controller operation timed out after {timeout_ms}ms: {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// A program is running and cannot be replaced
    #[error("Cannot load a program while another is running")]
    ProgramRunning,

    /// No program has been loaded
    #[error("No program loaded")]
    NoProgram,

    /// Homing cycle failed after retries
    #[error("Homing failed after {attempts} attempts: {reason}")]
    HomingFailed {
        /// Number of attempts made.
        attempts: u32,
        /// The last failure reason.
        reason: String,
    },

    /// Generic controller error
    #[error("Controller error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Connection error type
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// The transport is closed
    #[error("Transport closed")]
    Closed,

    /// Writing to the transport failed
    #[error("Failed to write to transport: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },
}

/// Main error type for GCodeLink
#[derive(Error, Debug)]
pub enum Error {
    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Command(CommandError::Timeout { .. })
                | Error::Controller(ControllerError::Timeout { .. })
        )
    }

    /// Check if this is a command error
    pub fn is_command_error(&self) -> bool {
        matches!(self, Error::Command(_))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
