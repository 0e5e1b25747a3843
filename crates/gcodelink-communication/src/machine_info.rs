//! Machine status model
//!
//! Holds the latest discrete state, raw status fields and probe result, plus
//! the registry of runtime variables that `[name]` placeholders resolve
//! against.

use std::collections::{BTreeMap, HashMap};

use gcodelink_core::{CommandError, MachineState};

use crate::firmware::grbl::{ProbeReport, StatusReport};

/// Accessor computing a runtime variable from the current status
pub type VariableAccessor = fn(&MachineInfo) -> f64;

/// What changed when a report was applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusUpdate {
    /// Report applied; the state did not change
    Unchanged,
    /// The discrete state changed
    StateChanged {
        /// Previous state
        old: MachineState,
        /// New state
        new: MachineState,
    },
}

/// Latest known machine status
#[derive(Clone)]
pub struct MachineInfo {
    state: MachineState,
    fields: HashMap<String, Vec<f64>>,
    probe: [f64; 3],
    probe_success: bool,
    variables: BTreeMap<String, VariableAccessor>,
}

impl MachineInfo {
    /// Create a status model with the built-in runtime variables
    ///
    /// `posx`, `posy`, `posz` read the last probe result; `mposx`, `mposy`,
    /// `mposz` read the reported machine position.
    pub fn new() -> Self {
        let mut info = Self {
            state: MachineState::Unknown,
            fields: HashMap::new(),
            probe: [0.0; 3],
            probe_success: false,
            variables: BTreeMap::new(),
        };

        info.register_variable("posx", |m| m.probe[0]);
        info.register_variable("posy", |m| m.probe[1]);
        info.register_variable("posz", |m| m.probe[2]);
        info.register_variable("mposx", |m| m.position()[0]);
        info.register_variable("mposy", |m| m.position()[1]);
        info.register_variable("mposz", |m| m.position()[2]);

        info
    }

    /// Register or replace a runtime variable
    pub fn register_variable(&mut self, name: impl Into<String>, accessor: VariableAccessor) {
        self.variables.insert(name.into(), accessor);
    }

    /// Names of all registered runtime variables
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Resolve a runtime variable by exact name
    pub fn get_var(&self, name: &str) -> Result<f64, CommandError> {
        self.variables
            .get(name)
            .map(|accessor| accessor(self))
            .ok_or_else(|| CommandError::UnresolvedVariable {
                name: name.to_string(),
            })
    }

    /// Current discrete state
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Whether the machine last reported Idle
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Raw numeric status field
    pub fn field(&self, tag: &str) -> Option<&[f64]> {
        self.fields.get(tag).map(Vec::as_slice)
    }

    /// Machine position from `MPos`, falling back to `WPos`
    pub fn position(&self) -> [f64; 3] {
        let values = self.field("MPos").or_else(|| self.field("WPos"));
        let mut position = [0.0; 3];
        if let Some(values) = values {
            for (slot, value) in position.iter_mut().zip(values) {
                *slot = *value;
            }
        }
        position
    }

    /// Last probe position
    pub fn probe(&self) -> [f64; 3] {
        self.probe
    }

    /// Whether the last probe made contact
    pub fn probe_succeeded(&self) -> bool {
        self.probe_success
    }

    /// Apply a status report
    ///
    /// Fields present in the report replace earlier values; fields absent
    /// from it keep their last value, since GRBL only sends some of them
    /// periodically.
    pub fn apply_status(&mut self, report: &StatusReport) -> StatusUpdate {
        for (tag, values) in &report.fields {
            self.fields.insert(tag.clone(), values.clone());
        }

        let old = self.state;
        self.state = report.state;
        if old != report.state {
            tracing::debug!("Machine state {} -> {}", old, report.state);
            StatusUpdate::StateChanged {
                old,
                new: report.state,
            }
        } else {
            StatusUpdate::Unchanged
        }
    }

    /// Apply a probe report
    pub fn apply_probe(&mut self, probe: &ProbeReport) {
        self.probe = probe.position;
        self.probe_success = probe.success;
        tracing::info!(
            "Probe {}: {:.3}, {:.3}, {:.3}",
            if probe.success { "contact" } else { "no contact" },
            probe.position[0],
            probe.position[1],
            probe.position[2]
        );
    }
}

impl Default for MachineInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MachineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineInfo")
            .field("state", &self.state)
            .field("fields", &self.fields)
            .field("probe", &self.probe)
            .field("probe_success", &self.probe_success)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .finish()
    }
}
