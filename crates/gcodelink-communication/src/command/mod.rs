//! Command trackers and programs

pub mod program;
pub mod tracker;

pub use program::{Program, ProgramKind};
pub use tracker::{CommandStage, CommandTracker, TrackerCallback, TrackerInfo};
