//! G-code tokens and their annotations

use std::collections::HashSet;
use std::fmt;

/// Marker that starts a pseudo-command token
pub const PSEUDO_MARKER: char = '%';

/// Marker that starts a firmware system command line
pub const SYSTEM_MARKER: char = '$';

/// Identity of a registered transformer, assigned by the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformerId(pub usize);

/// Annotations carried alongside a token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenMeta {
    /// Source line text with comments removed
    pub source_line: String,
    /// Zero-based index of the source line in the program
    pub line_index: usize,
    /// Comments extracted from the source line
    pub comments: Vec<String>,
    /// Transformers that already produced or rewrote this token
    pub visited: HashSet<TransformerId>,
}

/// A single G-code word, pseudo-command or system command
///
/// Words are a letter followed by a numeric or `[bracketed]` argument
/// (`G1`, `X-10.5`, `Z[posz]`). Pseudo-commands are `%name` and never reach
/// the device. System commands are whole `$...` lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token text as it will be sent
    pub text: String,
    /// Annotations
    pub meta: TokenMeta,
}

impl Token {
    /// Create a token with empty annotations
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            meta: TokenMeta::default(),
        }
    }

    /// Create a `%name` pseudo-command token
    pub fn pseudo(name: &str) -> Self {
        Self::new(format!("{}{}", PSEUDO_MARKER, name))
    }

    /// Leading letter, uppercased
    pub fn letter(&self) -> Option<char> {
        self.text.chars().next().map(|c| c.to_ascii_uppercase())
    }

    /// Text following the leading letter
    pub fn argument(&self) -> &str {
        let mut chars = self.text.chars();
        chars.next();
        chars.as_str()
    }

    /// Integer part of a numeric argument (`G38.2` gives 38, `G01` gives 1)
    pub fn major(&self) -> Option<u32> {
        self.argument().split('.').next()?.parse().ok()
    }

    /// Whether this is a `%name` pseudo-command
    pub fn is_pseudo(&self) -> bool {
        self.text.starts_with(PSEUDO_MARKER)
    }

    /// Pseudo-command name without its marker
    pub fn pseudo_name(&self) -> Option<&str> {
        self.text.strip_prefix(PSEUDO_MARKER)
    }

    /// Whether this is the pseudo-command `%name`
    pub fn is_pseudo_named(&self, name: &str) -> bool {
        self.pseudo_name() == Some(name)
    }

    /// Whether this is a `$...` system command
    pub fn is_system(&self) -> bool {
        self.text.starts_with(SYSTEM_MARKER)
    }

    /// Whether this is a G or M instruction word
    pub fn is_instruction(&self) -> bool {
        matches!(self.letter(), Some('G') | Some('M'))
    }

    /// Whether this is an argument word (axis, feed, parameter)
    pub fn is_argument(&self) -> bool {
        !self.is_pseudo() && !self.is_system() && !self.is_instruction()
    }

    /// Whether this is a `G38.x` probing move
    pub fn is_probe(&self) -> bool {
        self.letter() == Some('G') && self.major() == Some(38)
    }

    /// Whether this is an `M0` program stop (`M00` included, `M0.1` not)
    pub fn is_program_stop(&self) -> bool {
        self.letter() == Some('M') && self.argument().parse::<u32>() == Ok(0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq<&str> for Token {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}
