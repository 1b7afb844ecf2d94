//! Inline tool-call token parsing.
//!
//! Completions are untrusted free text. A unit asks for a capability by
//! embedding a token of the form
//!
//! ```text
//! [TOOL_CALL:<name>:<args>]
//! ```
//!
//! where `<name>` contains neither `:` nor `]` and `<args>` contains no `]`.
//! Anything that does not match is plain text. Matched text is only ever
//! split into strings; it is never evaluated.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tools::base_tool::ToolArguments;

static TOOL_CALL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[TOOL_CALL:([^:\]]+):([^\]]+)\]").unwrap());

// ---------------------------------------------------------------------------
// ToolCall
// ---------------------------------------------------------------------------

/// One well-formed call token found in a completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Capability name, trimmed.
    pub name: String,
    /// Argument text, trimmed.
    pub raw_args: String,
    /// The full token as it appeared in the text.
    pub matched: String,
    /// Byte range of `matched` in the source text.
    #[serde(skip)]
    pub span: Range<usize>,
}

impl ToolCall {
    /// Whether the arguments use the `key=value` form.
    pub fn has_pairs(&self) -> bool {
        self.raw_args.contains('=')
    }

    /// Arguments, storing a bare string under `default_key`.
    pub fn arguments(&self, default_key: &str) -> ToolArguments {
        parse_arguments(&self.raw_args, default_key)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Every call token in `text`, left to right, non-overlapping.
///
/// Tokens whose name or arguments are blank after trimming are treated as
/// plain text.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    TOOL_CALL_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim();
            let raw_args = caps.get(2)?.as_str().trim();
            if name.is_empty() || raw_args.is_empty() {
                return None;
            }
            Some(ToolCall {
                name: name.to_string(),
                raw_args: raw_args.to_string(),
                matched: whole.as_str().to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// `text` with every call token in `calls` removed, trimmed.
pub fn strip_tool_calls(text: &str, calls: &[ToolCall]) -> String {
    let mut clean = String::with_capacity(text.len());
    let mut cursor = 0;
    for call in calls {
        if call.span.start < cursor || call.span.end > text.len() {
            continue;
        }
        clean.push_str(&text[cursor..call.span.start]);
        cursor = call.span.end;
    }
    clean.push_str(&text[cursor..]);
    clean.trim().to_string()
}

/// Split an argument string into a map.
///
/// With `=` present: split on `,`, keep pieces containing `=`, split each
/// on its first `=` and trim both sides. Otherwise the trimmed string is
/// the single value under `default_key`.
pub fn parse_arguments(raw: &str, default_key: &str) -> ToolArguments {
    let mut args = ToolArguments::new();
    if raw.contains('=') {
        for piece in raw.split(',') {
            if let Some((key, value)) = piece.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    args.insert(key.to_string(), value.trim().to_string());
                }
            }
        }
    } else {
        args.insert(default_key.to_string(), raw.trim().to_string());
    }
    args
}
