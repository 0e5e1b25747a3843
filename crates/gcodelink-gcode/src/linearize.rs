//! Re-linearization of token lines into device-ready lines

use std::collections::HashSet;

use crate::modal::{classify, Classification};
use crate::token::Token;

/// Join one source line's tokens back into one or more output lines
///
/// A line never carries two codes of the same modal group, so a repeat
/// starts a new line. Pseudo-commands and system commands always stand
/// alone. Non-modal codes and argument words never force a break.
pub fn tokens_to_lines(tokens: &[Token]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut occupied: HashSet<Classification> = HashSet::new();

    let mut flush = |current: &mut Vec<&str>, occupied: &mut HashSet<Classification>| {
        if !current.is_empty() {
            lines.push(current.join(" "));
            current.clear();
        }
        occupied.clear();
    };

    for token in tokens {
        let class = classify(&token.text);

        match class {
            Some(class) if class.needs_own_line() => {
                flush(&mut current, &mut occupied);
                current.push(&token.text);
                flush(&mut current, &mut occupied);
            }
            Some(class) if class.is_modal() => {
                if occupied.contains(&class) {
                    flush(&mut current, &mut occupied);
                }
                occupied.insert(class);
                current.push(&token.text);
            }
            _ => current.push(&token.text),
        }
    }
    flush(&mut current, &mut occupied);

    lines
}
