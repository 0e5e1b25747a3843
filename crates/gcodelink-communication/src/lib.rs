//! # GCodeLink Communication
//!
//! Flow-controlled streaming of G-code to GRBL-style controllers.
//!
//! A [`Controller`] owns three command queues (backlog, in-flight window,
//! history), a [`MachineInfo`] status model and a registry of pseudo-command
//! handlers. Lines are written through a [`Transport`]; lines read from the
//! device are fed back with [`Controller::handle_line`].

pub mod command;
pub mod communication;
pub mod firmware;
pub mod machine_info;

pub use command::{
    CommandStage, CommandTracker, Program, ProgramKind, TrackerCallback, TrackerInfo,
};
pub use communication::{CommandQueues, NoOpTransport, QueueStats, Transport};
pub use firmware::grbl::{
    decode_alarm, decode_error, Controller, ControllerConfig, DeviceMessage, ProbeReport,
    PseudoCommandHandler, PseudoCommandRegistry, StatusParser, StatusReport,
};
pub use machine_info::{MachineInfo, StatusUpdate, VariableAccessor};
