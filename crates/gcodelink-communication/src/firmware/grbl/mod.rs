//! GRBL protocol support
//!
//! - `controller`: the streaming controller
//! - `pseudo`: `%name` command handlers
//! - `response_parser`: inbound line classification
//! - `status_parser`: status and probe reports
//! - `error_decoder`: `error:N` and `ALARM:N` descriptions

pub mod controller;
pub mod error_decoder;
pub mod pseudo;
pub mod response_parser;
pub mod status_parser;

pub use controller::{
    Controller, ControllerConfig, HOME_COMMAND, STATUS_QUERY, UNLOCK_COMMAND,
};
pub use error_decoder::{decode_alarm, decode_error, format_alarm, format_error};
pub use pseudo::{PseudoCommandHandler, PseudoCommandRegistry};
pub use response_parser::DeviceMessage;
pub use status_parser::{ProbeReport, StatusParser, StatusReport};
