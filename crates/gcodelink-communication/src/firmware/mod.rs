//! Firmware implementations
//!
//! Only GRBL and GRBL-compatible controllers are supported.

pub mod grbl;

pub use grbl::{Controller, ControllerConfig, DeviceMessage, PseudoCommandRegistry};
