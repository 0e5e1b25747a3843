//! Built-in token transformers

use crate::pipeline::{TokenStream, TokenTransformer};
use crate::token::Token;

/// Pseudo-command that waits for the machine to report Idle
pub const WAIT_FOR_IDLE: &str = "wait_for_idle";

/// Pseudo-command that waits for the last dispatched command to finish
pub const WAIT_FOR_LAST_COMMAND: &str = "wait_for_last_command";

/// Brackets a program stop with synchronization waits
///
/// `M0` becomes `%wait_for_idle M0 %wait_for_last_command`, so the host does
/// not keep streaming while the machine sits at the stop. A stop that is
/// already bracketed is left alone.
#[derive(Debug, Clone, Default)]
pub struct ProgramStopTransformer;

impl ProgramStopTransformer {
    /// Create a new program stop transformer
    pub fn new() -> Self {
        Self
    }
}

impl TokenTransformer for ProgramStopTransformer {
    fn name(&self) -> &str {
        "program_stop"
    }

    fn can_transform(&mut self, stream: &TokenStream) -> usize {
        if !stream.current().is_some_and(Token::is_program_stop) {
            return 0;
        }

        let bracketed = stream
            .peek(-1)
            .is_some_and(|t| t.is_pseudo_named(WAIT_FOR_IDLE))
            && stream
                .peek(1)
                .is_some_and(|t| t.is_pseudo_named(WAIT_FOR_LAST_COMMAND));

        usize::from(!bracketed)
    }

    fn process(&mut self, tokens: Vec<Token>, _stream: &TokenStream) -> Vec<Token> {
        let mut output = Vec::with_capacity(tokens.len() + 2);
        output.push(Token::pseudo(WAIT_FOR_IDLE));
        output.extend(tokens);
        output.push(Token::pseudo(WAIT_FOR_LAST_COMMAND));
        output
    }
}

/// Holds back streaming after a probe until the probe has finished
///
/// Anything after a `G38.x` may reference the probed position through a
/// runtime variable, so the probe is followed by `%wait_for_last_command`.
/// In a run of consecutive probes only the last one gets the wait.
#[derive(Debug, Clone, Default)]
pub struct ProbeWaitTransformer;

impl ProbeWaitTransformer {
    /// Create a new probe wait transformer
    pub fn new() -> Self {
        Self
    }
}

impl TokenTransformer for ProbeWaitTransformer {
    fn name(&self) -> &str {
        "probe_wait"
    }

    fn can_transform(&mut self, stream: &TokenStream) -> usize {
        if !stream.current().is_some_and(Token::is_probe) {
            return 0;
        }
        let (probe_line, _) = stream.position();

        // The probe word plus its own arguments
        let consumed = 1 + stream
            .iter_from(1)
            .take_while(|(line, token)| *line == probe_line && token.is_argument())
            .count();

        for (_, token) in stream.iter_from(1) {
            if token.is_pseudo_named(WAIT_FOR_LAST_COMMAND) || token.is_probe() {
                return 0;
            }
            if token.is_argument() || token.is_pseudo() {
                continue;
            }
            break;
        }

        consumed
    }

    fn process(&mut self, mut tokens: Vec<Token>, _stream: &TokenStream) -> Vec<Token> {
        tokens.push(Token::pseudo(WAIT_FOR_LAST_COMMAND));
        tokens
    }
}
