//! Response Model
//!
//! The result of one read cycle against a game server: the text as it came
//! off the wire, its normalized form, and whether the cycle ended on a
//! prompt.

use serde::{Deserialize, Serialize};

use crate::terminal::output::normalize;

/// Immutable result of one read cycle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Response {
    /// Decoded text as received, escape sequences included
    pub raw: String,
    /// Text with escape sequences and control characters removed
    pub clean: String,
    /// Non-empty logical lines of the reply body
    ///
    /// When a prompt was detected the final line is the prompt and is moved
    /// to [`Response::prompt`] instead.
    pub lines: Vec<String>,
    /// The prompt line that ended the cycle, if one was detected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Whether the cycle ended because the prompt (or awaited pattern) was seen
    pub prompt_detected: bool,
}

impl Response {
    /// Build a response for a command or read cycle
    pub fn new(raw: String, prompt_detected: bool) -> Self {
        let normalized = normalize(&raw);
        let mut lines = normalized.lines;
        let prompt = if prompt_detected {
            lines.pop().map(|line| line.trim().to_string())
        } else {
            None
        };

        Self {
            raw,
            clean: normalized.clean,
            lines,
            prompt,
            prompt_detected,
        }
    }

    /// Build a response for a pattern wait
    ///
    /// `matched` is reported as `prompt_detected`; no line is split off.
    pub fn pattern_match(raw: String, matched: bool) -> Self {
        let normalized = normalize(&raw);
        Self {
            raw,
            clean: normalized.clean,
            lines: normalized.lines,
            prompt: None,
            prompt_detected: matched,
        }
    }

    /// A response with no output
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether nothing at all was received
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Substring test against the clean text
    pub fn contains(&self, needle: &str) -> bool {
        self.clean.contains(needle)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.clean)
    }
}
