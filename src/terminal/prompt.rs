//! Prompt Detection Logic
//!
//! Decides whether buffered server output ends in a prompt, which is the
//! only signal a line-oriented game server gives that it has finished
//! answering a command.
//!
//! Detection is an ordered chain of strategies. The first one that fires
//! wins:
//!
//! 1. regex patterns, tested against the tail of the clean text
//! 2. end characters, tested against the last non-whitespace character
//! 3. a custom predicate over the whole clean text

use crate::error::Result;
use crate::models::{CustomPromptFn, PromptConfig};
use regex::Regex;
use std::fmt;

/// How much trailing text the regex strategy looks at
pub const PROMPT_TAIL_BYTES: usize = 1024;

/// One way of recognising a prompt
#[derive(Clone)]
pub enum PromptStrategy {
    /// Regex matched against the tail window
    Pattern(Regex),
    /// Last visible character is one of these
    EndChars(Vec<char>),
    /// Caller-supplied predicate
    Custom(CustomPromptFn),
}

impl PromptStrategy {
    fn matches(&self, clean: &str) -> bool {
        match self {
            PromptStrategy::Pattern(regex) => regex.is_match(tail(clean, PROMPT_TAIL_BYTES)),
            PromptStrategy::EndChars(chars) => last_visible_char(clean)
                .map(|c| chars.contains(&c))
                .unwrap_or(false),
            PromptStrategy::Custom(predicate) => predicate(clean),
        }
    }
}

impl fmt::Debug for PromptStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptStrategy::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            PromptStrategy::EndChars(chars) => f.debug_tuple("EndChars").field(chars).finish(),
            PromptStrategy::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Prompt detector built from a [`PromptConfig`]
#[derive(Debug, Clone, Default)]
pub struct PromptDetector {
    strategies: Vec<PromptStrategy>,
}

impl PromptDetector {
    /// Compile a detector; fails on the first invalid pattern
    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        let mut strategies = Vec::with_capacity(config.patterns.len() + 2);

        for pattern in &config.patterns {
            strategies.push(PromptStrategy::Pattern(Regex::new(pattern)?));
        }

        let end_chars: Vec<char> = config.end_chars.chars().collect();
        if !end_chars.is_empty() {
            strategies.push(PromptStrategy::EndChars(end_chars));
        }

        if let Some(custom) = &config.custom {
            strategies.push(PromptStrategy::Custom(custom.clone()));
        }

        Ok(Self { strategies })
    }

    /// Add a regex ahead of the end-char and custom strategies
    pub fn add_custom_pattern(&mut self, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern)?;
        let position = self
            .strategies
            .iter()
            .position(|s| !matches!(s, PromptStrategy::Pattern(_)))
            .unwrap_or(self.strategies.len());
        self.strategies.insert(position, PromptStrategy::Pattern(regex));
        Ok(())
    }

    /// Whether the clean text ends in a prompt
    ///
    /// Empty or whitespace-only text is never a prompt.
    pub fn is_prompt(&self, clean: &str) -> bool {
        if clean.trim().is_empty() {
            return false;
        }
        self.strategies.iter().any(|s| s.matches(clean))
    }

    /// The strategy chain, in evaluation order
    pub fn strategies(&self) -> &[PromptStrategy] {
        &self.strategies
    }
}

/// Last character that is not whitespace
pub fn last_visible_char(text: &str) -> Option<char> {
    text.trim_end().chars().next_back()
}

/// At most `max_bytes` from the end of `text`, on a char boundary
pub fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
