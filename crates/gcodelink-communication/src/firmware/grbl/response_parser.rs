//! GRBL Response Parser
//!
//! Classifies inbound lines into acknowledgements, errors, alarms, status
//! and probe reports. Anything else is passed through as a message.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error_decoder::{format_alarm, format_error};
use super::status_parser::{ProbeReport, StatusParser, StatusReport};

/// A line received from the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceMessage {
    /// `ok`
    Ok,
    /// `error:N`
    Error(u32),
    /// `ALARM:N`
    Alarm(u32),
    /// `<...>` status report
    Status(StatusReport),
    /// `[PRB:...]` probe report
    Probe(ProbeReport),
    /// Banner, `[MSG:...]`, settings output or anything else
    Message(String),
}

impl DeviceMessage {
    /// Classify one line; blank lines yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if line.eq_ignore_ascii_case("ok") {
            return Some(Self::Ok);
        }

        // Still an acknowledgement when the code is unreadable, or the window desyncs
        if let Some(code) = strip_prefix_ignore_case(line, "error:") {
            let code = code.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("Unreadable error code in {:?}", line);
                0
            });
            return Some(Self::Error(code));
        }

        if let Some(code) = strip_prefix_ignore_case(line, "alarm:") {
            if let Ok(code) = code.trim().parse() {
                return Some(Self::Alarm(code));
            }
        }

        if line.starts_with('<') {
            if let Some(report) = StatusParser::parse_status(line) {
                return Some(Self::Status(report));
            }
        }

        if line.starts_with("[PRB:") {
            if let Some(probe) = StatusParser::parse_probe(line) {
                return Some(Self::Probe(probe));
            }
        }

        Some(Self::Message(line.to_string()))
    }

    /// Whether this line acknowledges the oldest in-flight command
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self, Self::Ok | Self::Error(_))
    }
}

impl fmt::Display for DeviceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "{}", format_error(*code)),
            Self::Alarm(code) => write!(f, "{}", format_alarm(*code)),
            Self::Status(report) => write!(f, "status:{}", report.raw_state),
            Self::Probe(probe) => write!(
                f,
                "probe:{:.3},{:.3},{:.3}:{}",
                probe.position[0],
                probe.position[1],
                probe.position[2],
                u8::from(probe.success)
            ),
            Self::Message(msg) => write!(f, "message:{}", msg),
        }
    }
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &line[prefix.len()..])
}
