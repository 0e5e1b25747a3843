//! Modal group classification
//!
//! Codes in the same modal group are mutually exclusive on a single line, so
//! the re-linearizer uses this table to decide where lines must be split.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::token::{PSEUDO_MARKER, SYSTEM_MARKER};

/// Kind of code a token represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeCategory {
    /// `G` codes
    GCode,
    /// `M` codes
    MCode,
    /// `%name` pseudo-commands
    Custom,
    /// `$...` firmware system commands
    System,
}

/// Modal group a code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModalGroup {
    Motion,
    PlaneSelection,
    DistanceMode,
    IjkDistanceMode,
    FeedrateMode,
    Units,
    CutterRadiusCompensation,
    ToolLengthOffset,
    ReturnMode,
    CoordinateSystem,
    PathControl,
    SpindleSpeed,
    LatheDiameter,
    Stopping,
    SpindleControl,
    CoolantControl,
    FeedSpeedOverride,
    ToolChange,
    /// Codes that act once and hold no mode (`G4`, `G92`, ...)
    NonModal,
    /// Pseudo-commands
    Custom,
    /// System commands
    System,
}

impl fmt::Display for ModalGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Motion => "motion",
            Self::PlaneSelection => "plane_selection",
            Self::DistanceMode => "distance_mode",
            Self::IjkDistanceMode => "ijk_distance_mode",
            Self::FeedrateMode => "feedrate_mode",
            Self::Units => "units",
            Self::CutterRadiusCompensation => "cutter_radius_compensation",
            Self::ToolLengthOffset => "tool_length_offset",
            Self::ReturnMode => "return_mode",
            Self::CoordinateSystem => "coordinate_system",
            Self::PathControl => "path_control",
            Self::SpindleSpeed => "spindle_speed",
            Self::LatheDiameter => "lathe_diameter",
            Self::Stopping => "stopping",
            Self::SpindleControl => "spindle_control",
            Self::CoolantControl => "coolant_control",
            Self::FeedSpeedOverride => "feed_speed_override",
            Self::ToolChange => "tool_change",
            Self::NonModal => "nonmodal",
            Self::Custom => "custom",
            Self::System => "system",
        };
        f.write_str(name)
    }
}

/// Result of classifying a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub category: CodeCategory,
    pub group: ModalGroup,
}

impl Classification {
    const fn new(category: CodeCategory, group: ModalGroup) -> Self {
        Self { category, group }
    }

    /// Whether two tokens of this class conflict on one line
    pub fn is_modal(&self) -> bool {
        !matches!(self.group, ModalGroup::NonModal)
    }

    /// Whether tokens of this class must sit on a line of their own
    pub fn needs_own_line(&self) -> bool {
        matches!(self.category, CodeCategory::Custom | CodeCategory::System)
    }
}

const MODAL_CODES: &[(CodeCategory, ModalGroup, &[&str])] = &[
    (
        CodeCategory::GCode,
        ModalGroup::Motion,
        &[
            "G0", "G1", "G2", "G3", "G33", "G38.*", "G73", "G76", "G80", "G81", "G82", "G83",
            "G84", "G85", "G86", "G87", "G88", "G89",
        ],
    ),
    (
        CodeCategory::GCode,
        ModalGroup::PlaneSelection,
        &["G17", "G18", "G19", "G17.1", "G17.2", "G17.3"],
    ),
    (CodeCategory::GCode, ModalGroup::DistanceMode, &["G90", "G91"]),
    (CodeCategory::GCode, ModalGroup::IjkDistanceMode, &["G90.1", "G91.1"]),
    (CodeCategory::GCode, ModalGroup::FeedrateMode, &["G93", "G94"]),
    (CodeCategory::GCode, ModalGroup::Units, &["G20", "G21"]),
    (
        CodeCategory::GCode,
        ModalGroup::CutterRadiusCompensation,
        &["G40", "G41", "G42", "G41.1", "G42.1"],
    ),
    (
        CodeCategory::GCode,
        ModalGroup::ToolLengthOffset,
        &["G43", "G43.1", "G49"],
    ),
    (CodeCategory::GCode, ModalGroup::ReturnMode, &["G98", "G99"]),
    (
        CodeCategory::GCode,
        ModalGroup::CoordinateSystem,
        &[
            "G54", "G55", "G56", "G57", "G58", "G59", "G59.1", "G59.2", "G59.3",
        ],
    ),
    (CodeCategory::GCode, ModalGroup::PathControl, &["G61", "G61.1", "G64"]),
    (CodeCategory::GCode, ModalGroup::SpindleSpeed, &["G96", "G97"]),
    (CodeCategory::GCode, ModalGroup::LatheDiameter, &["G7", "G8"]),
    (
        CodeCategory::GCode,
        ModalGroup::NonModal,
        &[
            "G4", "G10", "G28", "G28.1", "G30", "G30.1", "G53", "G92", "G92.1", "G92.2", "G92.3",
        ],
    ),
    (
        CodeCategory::MCode,
        ModalGroup::Stopping,
        &["M0", "M1", "M2", "M30", "M60"],
    ),
    (CodeCategory::MCode, ModalGroup::SpindleControl, &["M3", "M4", "M5"]),
    (CodeCategory::MCode, ModalGroup::CoolantControl, &["M7", "M8", "M9"]),
    (CodeCategory::MCode, ModalGroup::FeedSpeedOverride, &["M48", "M49"]),
    (CodeCategory::MCode, ModalGroup::ToolChange, &["M6"]),
];

struct Entry {
    class: Classification,
    pattern: Regex,
}

/// Lookup table from (letter, major number) to candidate classifications
///
/// Each candidate keeps an exact pattern so that `G17` and `G17.1` share a
/// bucket but still classify independently.
pub struct ModalGroupTable {
    entries: HashMap<(char, u32), Vec<Entry>>,
}

impl ModalGroupTable {
    fn build() -> Self {
        let mut entries: HashMap<(char, u32), Vec<Entry>> = HashMap::new();

        for (category, group, codes) in MODAL_CODES {
            for code in codes.iter() {
                let Some((key, pattern)) = code_pattern(code) else {
                    tracing::error!("Malformed modal code in table: {}", code);
                    continue;
                };
                let pattern = Regex::new(&pattern).expect("invalid regex pattern");
                entries.entry(key).or_default().push(Entry {
                    class: Classification::new(*category, *group),
                    pattern,
                });
            }
        }

        Self { entries }
    }

    /// The shared table, built on first use
    pub fn global() -> &'static Self {
        static TABLE: OnceLock<ModalGroupTable> = OnceLock::new();
        TABLE.get_or_init(Self::build)
    }

    /// Classify a token's text
    ///
    /// Matching ignores case and leading zeros. Words that are not in the
    /// table (axis words, feeds, unknown codes) yield `None`.
    pub fn classify(&self, token: &str) -> Option<Classification> {
        if token.starts_with(PSEUDO_MARKER) {
            return Some(Classification::new(CodeCategory::Custom, ModalGroup::Custom));
        }
        if token.starts_with(SYSTEM_MARKER) {
            return Some(Classification::new(CodeCategory::System, ModalGroup::System));
        }

        let upper = token.trim().to_ascii_uppercase();
        let mut chars = upper.chars();
        let letter = chars.next()?;
        let major: u32 = chars.as_str().split('.').next()?.parse().ok()?;

        self.entries
            .get(&(letter, major))?
            .iter()
            .find(|entry| entry.pattern.is_match(&upper))
            .map(|entry| entry.class)
    }
}

/// Classify a token's text against the shared table
pub fn classify(token: &str) -> Option<Classification> {
    ModalGroupTable::global().classify(token)
}

/// Build the lookup key and exact pattern for a table code
///
/// `G38.*` matches any `G38.n`; `G1` matches `G1`, `G01`, `G001`.
fn code_pattern(code: &str) -> Option<((char, u32), String)> {
    let mut chars = code.chars();
    let letter = chars.next()?;
    let number = chars.as_str();
    let (major, minor) = match number.split_once('.') {
        Some((major, minor)) => (major, Some(minor)),
        None => (number, None),
    };
    let key = (letter, major.parse().ok()?);

    let major_pattern = match major.trim_start_matches('0') {
        "" => "0+".to_string(),
        digits => format!("0*{}", digits),
    };
    let pattern = match minor {
        Some("*") => format!(r"^{}{}\.\d+$", letter, major_pattern),
        Some(minor) => format!(r"^{}{}\.{}$", letter, major_pattern, regex::escape(minor)),
        None => format!("^{}{}$", letter, major_pattern),
    };

    Some((key, pattern))
}
