//! GRBL status and probe report parsing
//!
//! Status reports look like `<Idle|MPos:0.000,0.000,0.000|FS:0,0>`: a state
//! name (optionally with a `:n` sub-state) followed by `|`-separated
//! `TAG:v1,v2,...` fields. Probe reports look like `[PRB:1.0,2.0,-3.5:1]`.

use std::collections::HashMap;

use gcodelink_core::MachineState;
use serde::{Deserialize, Serialize};

/// Parsed `<...>` status report
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    /// Decoded machine state
    pub state: MachineState,
    /// State name as reported, sub-state included
    pub raw_state: String,
    /// Numeric fields by tag (`MPos`, `WPos`, `FS`, `Bf`, `WCO`, ...)
    pub fields: HashMap<String, Vec<f64>>,
}

impl StatusReport {
    /// Numeric values of a field
    pub fn field(&self, tag: &str) -> Option<&[f64]> {
        self.fields.get(tag).map(Vec::as_slice)
    }
}

/// Parsed `[PRB:...]` probe report
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Probed X, Y, Z in machine coordinates
    pub position: [f64; 3],
    /// Whether the probe made contact
    pub success: bool,
}

/// Stateless parser for GRBL report lines
pub struct StatusParser;

impl StatusParser {
    /// Parse a `<...>` status report
    ///
    /// Fields whose values are not all numeric (`Pn:XYZ`, `A:SFM`) are
    /// skipped.
    pub fn parse_status(line: &str) -> Option<StatusReport> {
        let body = line.trim().strip_prefix('<')?.strip_suffix('>')?;
        let mut parts = body.split('|');

        let raw_state = parts.next()?.trim().to_string();
        let mut report = StatusReport {
            state: MachineState::decode(&raw_state),
            raw_state,
            fields: HashMap::new(),
        };

        for part in parts {
            let Some((tag, values)) = part.split_once(':') else {
                tracing::debug!("Skipping status field without value: {}", part);
                continue;
            };
            match parse_values(values) {
                Some(values) => {
                    report.fields.insert(tag.trim().to_string(), values);
                }
                None => tracing::debug!("Skipping non-numeric status field: {}", part),
            }
        }

        Some(report)
    }

    /// Parse a `[PRB:x,y,z:flag]` probe report
    ///
    /// A missing success flag is read as success. Other bracketed messages
    /// return `None`.
    pub fn parse_probe(line: &str) -> Option<ProbeReport> {
        let body = line.trim().strip_prefix('[')?.strip_suffix(']')?;
        let mut parts = body.split(':');

        if parts.next()? != "PRB" {
            return None;
        }

        let values = parse_values(parts.next()?)?;
        if values.len() < 3 {
            return None;
        }

        let success = parts.next().map(|flag| flag.trim() == "1").unwrap_or(true);

        Some(ProbeReport {
            position: [values[0], values[1], values[2]],
            success,
        })
    }
}

fn parse_values(values: &str) -> Option<Vec<f64>> {
    values
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect()
}
