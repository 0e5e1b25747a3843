//! Machine data types shared between the scheduler and the status model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete machine state as reported by the firmware
///
/// Decoded from the leading token of a `<...>` status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MachineState {
    /// Idle, ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold active
    Hold,
    /// Jogging
    Jog,
    /// Alarm lock (requires homing or unlock)
    Alarm,
    /// Safety door open
    Door,
    /// Check (dry-run) mode
    Check,
    /// Homing cycle in progress
    Home,
    /// Sleep mode
    Sleep,
    /// No report received yet, or an unrecognized state name
    #[default]
    Unknown,
}

impl MachineState {
    /// Decode a state name, ignoring case and any `:n` sub-state suffix
    pub fn decode(s: &str) -> Self {
        let name = s.split(':').next().unwrap_or("").trim();
        match name.to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "run" => Self::Run,
            "hold" => Self::Hold,
            "jog" => Self::Jog,
            "alarm" => Self::Alarm,
            "door" => Self::Door,
            "check" => Self::Check,
            "home" => Self::Home,
            "sleep" => Self::Sleep,
            _ => Self::Unknown,
        }
    }

    /// Check if the machine is idle
    pub fn is_idle(&self) -> bool {
        *self == Self::Idle
    }

    /// Get the firmware spelling of this state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Home => "Home",
            Self::Sleep => "Sleep",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(MachineState::decode("Idle"), MachineState::Idle);
        assert_eq!(MachineState::decode("RUN"), MachineState::Run);
        assert_eq!(MachineState::decode("Hold:0"), MachineState::Hold);
        assert_eq!(MachineState::decode("Door:1"), MachineState::Door);
        assert_eq!(MachineState::decode("Bogus"), MachineState::Unknown);
        assert_eq!(MachineState::decode(""), MachineState::Unknown);
    }

    #[test]
    fn test_default_is_unknown() {
        assert_eq!(MachineState::default(), MachineState::Unknown);
        assert!(!MachineState::default().is_idle());
    }
}
