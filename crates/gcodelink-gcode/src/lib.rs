//! # GCodeLink G-code
//!
//! Preprocessing for G-code programs before they are streamed: tokenizing,
//! modal group classification, the token transformer pipeline and
//! re-linearization into device-ready lines.

pub mod linearize;
pub mod modal;
pub mod parser;
pub mod pipeline;
pub mod processors;
pub mod token;

pub use linearize::tokens_to_lines;
pub use modal::{classify, Classification, CodeCategory, ModalGroup, ModalGroupTable};
pub use parser::{extract_comments, tokenize, tokenize_line};
pub use pipeline::{GcodeProcessor, TokenStream, TokenTransformer, DEFAULT_REWRITE_LIMIT};
pub use processors::{
    ProbeWaitTransformer, ProgramStopTransformer, WAIT_FOR_IDLE, WAIT_FOR_LAST_COMMAND,
};
pub use token::{Token, TokenMeta, TransformerId, PSEUDO_MARKER, SYSTEM_MARKER};
