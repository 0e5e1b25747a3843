//! Token transformer pipeline
//!
//! A program is tokenized into a [`TokenStream`] and walked left to right.
//! At each position the registered transformers are offered the stream in
//! registration order; the first one that claims tokens rewrites them in
//! place and matching restarts at the same position.

use crate::linearize::tokens_to_lines;
use crate::parser::tokenize;
use crate::processors::{ProbeWaitTransformer, ProgramStopTransformer};
use crate::token::{Token, TransformerId};

/// Rewrites allowed at a single position before the pipeline moves on
pub const DEFAULT_REWRITE_LIMIT: usize = 64;

/// Trait for token rewriting stages
///
/// `can_transform` inspects the stream at its cursor and returns how many
/// tokens, starting at the cursor, the transformer wants to replace. Zero
/// declines. The pipeline then hands those tokens to `process` and splices
/// the result back in.
pub trait TokenTransformer: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Number of tokens to consume at the cursor, or zero
    fn can_transform(&mut self, stream: &TokenStream) -> usize;

    /// Produce the replacement for the consumed tokens
    fn process(&mut self, tokens: Vec<Token>, stream: &TokenStream) -> Vec<Token>;

    /// Called for every token the cursor passes without a rewrite
    fn observe(&mut self, _token: &Token) {}

    /// Clear any state kept between tokens
    fn reset(&mut self) {}
}

/// The whole program's tokens with a cursor
///
/// Positions are (line, column) pairs. Offsets passed to [`seek`](Self::seek)
/// and [`peek`](Self::peek) count tokens and cross line boundaries in both
/// directions, skipping lines left empty by a rewrite.
#[derive(Debug, Clone, Default)]
pub struct TokenStream {
    lines: Vec<Vec<Token>>,
    line: usize,
    pos: usize,
}

impl TokenStream {
    /// Create a stream with the cursor on the first token
    pub fn new(lines: Vec<Vec<Token>>) -> Self {
        Self {
            lines,
            line: 0,
            pos: 0,
        }
    }

    /// Token lines
    pub fn lines(&self) -> &[Vec<Token>] {
        &self.lines
    }

    /// Cursor position as (line, column)
    pub fn position(&self) -> (usize, usize) {
        (self.line, self.pos)
    }

    /// Token under the cursor
    pub fn current(&self) -> Option<&Token> {
        self.lines.get(self.line)?.get(self.pos)
    }

    fn get(&self, (line, pos): (usize, usize)) -> Option<&Token> {
        self.lines.get(line)?.get(pos)
    }

    fn next_position(&self, (mut line, mut pos): (usize, usize)) -> Option<(usize, usize)> {
        pos += 1;
        while line < self.lines.len() {
            if pos < self.lines[line].len() {
                return Some((line, pos));
            }
            line += 1;
            pos = 0;
        }
        None
    }

    fn prev_position(&self, (mut line, pos): (usize, usize)) -> Option<(usize, usize)> {
        if pos > 0 {
            return Some((line, pos - 1));
        }
        while line > 0 {
            line -= 1;
            if let Some(last) = self.lines[line].len().checked_sub(1) {
                return Some((line, last));
            }
        }
        None
    }

    /// Position `offset` tokens away from the cursor
    ///
    /// Returns `None` when the offset runs off either end of the program.
    pub fn seek(&self, offset: isize) -> Option<(usize, usize)> {
        let mut at = (self.line, self.pos);
        self.get(at)?;

        for _ in 0..offset.unsigned_abs() {
            at = if offset > 0 {
                self.next_position(at)?
            } else {
                self.prev_position(at)?
            };
        }
        Some(at)
    }

    /// Token `offset` tokens away from the cursor
    pub fn peek(&self, offset: isize) -> Option<&Token> {
        self.seek(offset).and_then(|at| self.get(at))
    }

    /// Tokens from `offset` to the end of the program, with their line index
    pub fn iter_from(&self, offset: isize) -> impl Iterator<Item = (usize, &Token)> + '_ {
        let mut next = self.seek(offset);
        std::iter::from_fn(move || {
            let at = next?;
            next = self.next_position(at);
            self.get(at).map(|token| (at.0, token))
        })
    }
}

/// Runs the transformer pipeline over whole programs
pub struct GcodeProcessor {
    transformers: Vec<Box<dyn TokenTransformer>>,
    stream: TokenStream,
    rewrite_limit: usize,
}

impl GcodeProcessor {
    /// Create a processor with no transformers
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
            stream: TokenStream::default(),
            rewrite_limit: DEFAULT_REWRITE_LIMIT,
        }
    }

    /// Create a processor with the built-in transformers
    ///
    /// Program stops are bracketed with idle and completion waits, then
    /// probe runs are followed by a completion wait.
    pub fn with_default_transformers() -> Self {
        let mut processor = Self::new();
        processor
            .register(Box::new(ProgramStopTransformer::new()))
            .register(Box::new(ProbeWaitTransformer::new()));
        processor
    }

    /// Append a transformer; earlier registrations get first refusal
    pub fn register(&mut self, transformer: Box<dyn TokenTransformer>) -> &mut Self {
        tracing::debug!("Registered token transformer: {}", transformer.name());
        self.transformers.push(transformer);
        self
    }

    /// Number of registered transformers
    pub fn transformer_count(&self) -> usize {
        self.transformers.len()
    }

    /// Change the per-position rewrite limit
    pub fn set_rewrite_limit(&mut self, limit: usize) {
        self.rewrite_limit = limit.max(1);
    }

    /// Drop the current stream and reset every transformer
    pub fn reset(&mut self) {
        self.stream = TokenStream::default();
        for transformer in &mut self.transformers {
            transformer.reset();
        }
    }

    /// Tokenize and transform a program, leaving the result in the stream
    pub fn process_lines<S: AsRef<str>>(&mut self, lines: &[S]) {
        self.stream = TokenStream::new(tokenize(lines));

        let Self {
            transformers,
            stream,
            rewrite_limit,
        } = self;

        let mut rewrites = 0usize;
        while stream.line < stream.lines.len() {
            if stream.pos >= stream.lines[stream.line].len() {
                stream.line += 1;
                stream.pos = 0;
                rewrites = 0;
                continue;
            }

            if rewrites < *rewrite_limit && apply_first(transformers, stream) {
                rewrites += 1;
                continue;
            }

            if rewrites >= *rewrite_limit {
                if let Some(token) = stream.current() {
                    tracing::warn!(
                        "Rewrite limit of {} reached at line {} token '{}', moving on",
                        rewrite_limit,
                        token.meta.line_index,
                        token
                    );
                }
            }

            if let Some(token) = stream.current() {
                for transformer in transformers.iter_mut() {
                    transformer.observe(token);
                }
            }
            stream.pos += 1;
            rewrites = 0;
        }
    }

    /// The transformed stream
    pub fn stream(&self) -> &TokenStream {
        &self.stream
    }

    /// Re-linearize the transformed stream into device-ready lines
    pub fn lines(&self) -> Vec<String> {
        self.stream
            .lines
            .iter()
            .flat_map(|tokens| tokens_to_lines(tokens))
            .collect()
    }

    /// Reset, transform and re-linearize a program in one pass
    pub fn preprocess<S: AsRef<str>>(&mut self, lines: &[S]) -> Vec<String> {
        self.reset();
        self.process_lines(lines);
        self.lines()
    }
}

impl Default for GcodeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GcodeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.transformers.iter().map(|t| t.name()).collect();
        f.debug_struct("GcodeProcessor")
            .field("transformers", &names)
            .field("rewrite_limit", &self.rewrite_limit)
            .finish()
    }
}

/// Offer the cursor to each transformer not yet recorded on the current
/// token; apply the first that claims tokens
fn apply_first(transformers: &mut [Box<dyn TokenTransformer>], stream: &mut TokenStream) -> bool {
    let Some(visited) = stream.current().map(|t| t.meta.visited.clone()) else {
        return false;
    };

    for (index, transformer) in transformers.iter_mut().enumerate() {
        let id = TransformerId(index);
        if visited.contains(&id) {
            continue;
        }

        let count = transformer.can_transform(stream);
        if count == 0 {
            continue;
        }

        let (line, pos) = (stream.line, stream.pos);
        let end = (pos + count).min(stream.lines[line].len());
        let consumed: Vec<Token> = stream.lines[line].drain(pos..end).collect();
        let origin = consumed.first().map(|t| t.meta.clone()).unwrap_or_default();

        tracing::trace!(
            "{} rewrote {} token(s) at line {}",
            transformer.name(),
            consumed.len(),
            origin.line_index
        );

        let mut output = transformer.process(consumed, stream);
        for token in &mut output {
            if token.meta.source_line.is_empty() {
                token.meta.source_line = origin.source_line.clone();
                token.meta.line_index = origin.line_index;
            }
            token.meta.visited.insert(id);
        }

        stream.lines[line].splice(pos..pos, output);
        return true;
    }

    false
}
