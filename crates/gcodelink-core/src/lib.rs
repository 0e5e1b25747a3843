//! # GCodeLink Core
//!
//! Types shared by every GCodeLink crate: the error taxonomy, the discrete
//! machine state and the lifecycle event bus.

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::MachineState;

pub use error::{CommandError, ConnectionError, ControllerError, Error, Result};

// Re-export event bus for convenience
pub use event_bus::{
    event_bus, AppEvent, CommandEvent, CommunicationEvent, ConnectionEvent, EventBus,
    EventBusConfig, EventCategory, EventFilter, MachineEvent, ProgramEvent, SubscriptionId,
};
