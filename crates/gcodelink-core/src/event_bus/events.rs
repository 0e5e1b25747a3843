//! Event type definitions for the event bus.
//!
//! Events are lifecycle notices for observers. Nothing in the scheduler
//! depends on them being delivered.

use serde::{Deserialize, Serialize};

use crate::data::MachineState;

/// Root event enum for all application events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// Transport connection events
    Connection(ConnectionEvent),
    /// Machine state and status
    Machine(MachineEvent),
    /// Communication layer events
    Communication(CommunicationEvent),
    /// Command lifecycle events
    Command(CommandEvent),
    /// Program lifecycle events
    Program(ProgramEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Machine(_) => EventCategory::Machine,
            AppEvent::Communication(_) => EventCategory::Communication,
            AppEvent::Command(_) => EventCategory::Command,
            AppEvent::Program(_) => EventCategory::Program,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Machine(e) => e.description(),
            AppEvent::Communication(e) => e.description(),
            AppEvent::Command(e) => e.description(),
            AppEvent::Program(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Transport connection events.
    Connection,
    /// Machine state and status events.
    Machine,
    /// Communication layer events.
    Communication,
    /// Command lifecycle events.
    Command,
    /// Program lifecycle events.
    Program,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Machine => write!(f, "Machine"),
            EventCategory::Communication => write!(f, "Communication"),
            EventCategory::Command => write!(f, "Command"),
            EventCategory::Program => write!(f, "Program"),
        }
    }
}

/// Connection-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Controller worker threads started.
    Started,
    /// Controller shut down and will send nothing further.
    Disconnected {
        /// Why the controller stopped.
        reason: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Started => "Controller started".to_string(),
            ConnectionEvent::Disconnected { reason } => format!("Disconnected: {}", reason),
        }
    }
}

/// Machine state events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MachineEvent {
    /// The discrete machine state changed.
    StateChanged {
        /// Previous state.
        old: MachineState,
        /// New state.
        new: MachineState,
    },
    /// A probe report was received.
    ProbeReported {
        /// Probed X, Y, Z.
        position: [f64; 3],
        /// Whether the probe made contact.
        success: bool,
    },
}

impl MachineEvent {
    fn description(&self) -> String {
        match self {
            MachineEvent::StateChanged { old, new } => format!("State: {} -> {}", old, new),
            MachineEvent::ProbeReported { position, success } => format!(
                "Probe {}: {:.3},{:.3},{:.3}",
                if *success { "hit" } else { "miss" },
                position[0],
                position[1],
                position[2]
            ),
        }
    }
}

/// Communication layer events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommunicationEvent {
    /// Data sent to device.
    DataSent {
        /// The data that was transmitted.
        data: String,
    },
    /// Data received from device.
    DataReceived {
        /// The data that was received.
        data: String,
    },
}

impl CommunicationEvent {
    fn description(&self) -> String {
        match self {
            CommunicationEvent::DataSent { data } => format!("TX: {}", truncate(data).trim()),
            CommunicationEvent::DataReceived { data } => {
                format!("RX: {}", truncate(data).trim())
            }
        }
    }
}

/// Command lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandEvent {
    /// A command completed successfully.
    Completed {
        /// The command text.
        command: String,
        /// Time between submission and completion in milliseconds.
        elapsed_ms: u64,
    },
    /// A command failed.
    Failed {
        /// The command text.
        command: String,
        /// The failure message.
        error: String,
    },
}

impl CommandEvent {
    fn description(&self) -> String {
        match self {
            CommandEvent::Completed {
                command,
                elapsed_ms,
            } => format!("Completed '{}' in {}ms", command, elapsed_ms),
            CommandEvent::Failed { command, error } => format!("Failed '{}': {}", command, error),
        }
    }
}

/// Program lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgramEvent {
    /// A program was loaded and preprocessed.
    Loaded {
        /// Program name.
        name: String,
        /// Number of device-ready lines.
        lines: usize,
    },
    /// A program's commands were moved into the backlog.
    Queued {
        /// Program name.
        name: String,
    },
    /// A program's unsent commands were pulled back out of the backlog.
    Withdrawn {
        /// Program name.
        name: String,
        /// Number of commands pulled back.
        count: usize,
    },
}

impl ProgramEvent {
    fn description(&self) -> String {
        match self {
            ProgramEvent::Loaded { name, lines } => format!("Loaded '{}' ({} lines)", name, lines),
            ProgramEvent::Queued { name } => format!("Queued '{}'", name),
            ProgramEvent::Withdrawn { name, count } => {
                format!("Withdrew {} commands of '{}'", count, name)
            }
        }
    }
}

fn truncate(data: &str) -> &str {
    match data.char_indices().nth(50) {
        Some((idx, _)) => &data[..idx],
        None => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        let event = AppEvent::Command(CommandEvent::Completed {
            command: "G0 X0".to_string(),
            elapsed_ms: 12,
        });
        assert_eq!(event.category(), EventCategory::Command);
        assert_eq!(event.description(), "Completed 'G0 X0' in 12ms");
    }

    #[test]
    fn test_long_data_is_truncated() {
        let data = "G1 X1 ".repeat(20);
        let event = AppEvent::Communication(CommunicationEvent::DataSent { data });
        assert!(event.description().len() <= "TX: ".len() + 50);
    }
}
