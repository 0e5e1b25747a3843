//! Line tokenizer

use regex::Regex;
use std::sync::OnceLock;

use crate::token::{Token, TokenMeta, SYSTEM_MARKER};

fn word_regex() -> &'static Regex {
    static WORD_REGEX: OnceLock<Regex> = OnceLock::new();
    WORD_REGEX.get_or_init(|| {
        Regex::new(r"(%[A-Za-z_]\w*)|([^\d\s%\[\]])\s*([-+]?[\d.]+|\[[^\]]*\])")
            .expect("invalid regex pattern")
    })
}

fn inline_comment_regex() -> &'static Regex {
    static COMMENT_REGEX: OnceLock<Regex> = OnceLock::new();
    COMMENT_REGEX.get_or_init(|| Regex::new(r"\((.*?)\)").expect("invalid regex pattern"))
}

/// Split a raw line into code and comments
///
/// A line starting with `;` is entirely comment. Parenthesized comments are
/// removed wherever they appear, and anything after a `;` is a trailing
/// comment.
pub fn extract_comments(line: &str) -> (String, Vec<String>) {
    let line = line.trim();
    if let Some(comment) = line.strip_prefix(';') {
        return (String::new(), vec![comment.trim().to_string()]);
    }

    let mut comments: Vec<String> = inline_comment_regex()
        .captures_iter(line)
        .map(|c| c[1].trim().to_string())
        .collect();
    let stripped = inline_comment_regex().replace_all(line, " ");

    let code = match stripped.split_once(';') {
        Some((code, trailing)) => {
            comments.push(trailing.trim().to_string());
            code.to_string()
        }
        None => stripped.into_owned(),
    };

    (code.trim().to_string(), comments)
}

/// Tokenize one source line
///
/// Whitespace between a letter and its argument is dropped (`G 1` becomes
/// `G1`). A line starting with `$` becomes a single system token.
pub fn tokenize_line(line: &str, line_index: usize) -> Vec<Token> {
    let (code, comments) = extract_comments(line);
    if code.is_empty() {
        return Vec::new();
    }

    let meta = TokenMeta {
        source_line: code.clone(),
        line_index,
        comments,
        ..Default::default()
    };

    if code.starts_with(SYSTEM_MARKER) {
        return vec![Token {
            text: code,
            meta,
        }];
    }

    word_regex()
        .captures_iter(&code)
        .map(|caps| {
            let text = match caps.get(1) {
                Some(pseudo) => pseudo.as_str().to_string(),
                None => format!("{}{}", &caps[2], &caps[3]),
            };
            Token {
                text,
                meta: meta.clone(),
            }
        })
        .collect()
}

/// Tokenize a whole program, one token list per non-empty line
pub fn tokenize<S: AsRef<str>>(lines: &[S]) -> Vec<Vec<Token>> {
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| tokenize_line(line.as_ref(), index))
        .filter(|tokens| !tokens.is_empty())
        .collect()
}
