//! Trigger Engine
//!
//! Pattern → command rules evaluated against every piece of server output a
//! session receives, independently of whatever foreground command is
//! waiting for its prompt. Matching only queues commands; the session sends
//! them once the read cycle that saw the match has finished.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Name of the built-in auto-repeat trigger
pub const REPEAT_TRIGGER: &str = "repeat";

/// Cue used by the repeat trigger when none is given
pub const DEFAULT_REPEAT_PATTERN: &str = "You have recovered balance";

/// Serializable view of a trigger for status and listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub name: String,
    pub pattern: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    #[serde(default)]
    pub fire_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<DateTime<Utc>>,
}

/// A single pattern → command rule
#[derive(Debug, Clone)]
pub struct Trigger {
    name: String,
    pattern: Regex,
    command: String,
    cooldown: Option<Duration>,
    last_fired: Option<Instant>,
    last_fired_at: Option<DateTime<Utc>>,
    fire_count: u64,
}

impl Trigger {
    /// Compile a trigger; the pattern is case-insensitive
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        command: impl Into<String>,
        cooldown: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            pattern: RegexBuilder::new(pattern).case_insensitive(true).build()?,
            command: command.into(),
            cooldown,
            last_fired: None,
            last_fired_at: None,
            fire_count: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Fire if the pattern matches and the cooldown has elapsed
    fn check(&mut self, text: &str, now: Instant) -> Option<String> {
        if !self.pattern.is_match(text) {
            return None;
        }
        if let (Some(cooldown), Some(last)) = (self.cooldown, self.last_fired) {
            if now.saturating_duration_since(last) < cooldown {
                debug!("Trigger '{}' matched but is cooling down", self.name);
                return None;
            }
        }
        self.last_fired = Some(now);
        self.last_fired_at = Some(Utc::now());
        self.fire_count += 1;
        Some(self.command.clone())
    }

    pub fn info(&self) -> TriggerInfo {
        TriggerInfo {
            name: self.name.clone(),
            pattern: self.pattern.as_str().to_string(),
            command: self.command.clone(),
            cooldown_ms: self.cooldown.map(|c| c.as_millis() as u64),
            fire_count: self.fire_count,
            last_fired: self.last_fired_at,
        }
    }
}

/// Ordered set of named triggers plus the optional repeat trigger
#[derive(Debug, Clone)]
pub struct TriggerEngine {
    triggers: Vec<Trigger>,
    repeat: Option<Trigger>,
    repeat_pattern: String,
}

impl TriggerEngine {
    /// Engine whose repeat trigger defaults to `repeat_pattern`
    pub fn new(repeat_pattern: impl Into<String>) -> Self {
        Self {
            triggers: Vec::new(),
            repeat: None,
            repeat_pattern: repeat_pattern.into(),
        }
    }

    /// Add a trigger, replacing any existing trigger with the same name
    pub fn add(
        &mut self,
        name: &str,
        pattern: &str,
        command: &str,
        cooldown: Option<Duration>,
    ) -> Result<()> {
        if name == REPEAT_TRIGGER {
            return Err(Error::ReservedTriggerName {
                name: name.to_string(),
            });
        }

        let trigger = Trigger::new(name, pattern, command, cooldown)?;
        match self.triggers.iter_mut().find(|t| t.name == name) {
            Some(existing) => *existing = trigger,
            None => self.triggers.push(trigger),
        }
        Ok(())
    }

    /// Remove a trigger by name; `repeat` removes the repeat trigger
    pub fn remove(&mut self, name: &str) -> Result<()> {
        if name == REPEAT_TRIGGER && self.repeat.take().is_some() {
            return Ok(());
        }
        let before = self.triggers.len();
        self.triggers.retain(|t| t.name != name);
        if self.triggers.len() == before {
            return Err(Error::TriggerNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Drop all named triggers; the repeat trigger is left alone
    pub fn clear(&mut self) {
        self.triggers.clear();
    }

    /// Set or replace the repeat trigger
    ///
    /// `off` or an empty command removes it. Returns whether a repeat
    /// trigger is active afterwards.
    pub fn set_repeat(&mut self, command: &str, pattern: Option<&str>) -> Result<bool> {
        let command = command.trim();
        if command.is_empty() || command.eq_ignore_ascii_case("off") {
            self.repeat = None;
            return Ok(false);
        }

        let pattern = pattern.unwrap_or(&self.repeat_pattern);
        self.repeat = Some(Trigger::new(REPEAT_TRIGGER, pattern, command, None)?);
        Ok(true)
    }

    /// Named triggers in insertion order
    pub fn list(&self) -> Vec<TriggerInfo> {
        self.triggers.iter().map(Trigger::info).collect()
    }

    pub fn repeat(&self) -> Option<TriggerInfo> {
        self.repeat.as_ref().map(Trigger::info)
    }

    /// Number of active triggers, repeat included
    pub fn len(&self) -> usize {
        self.triggers.len() + usize::from(self.repeat.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test newly received clean text and return the commands to send
    pub fn scan(&mut self, text: &str, now: Instant) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut fired = Vec::new();
        for trigger in self.repeat.iter_mut().chain(self.triggers.iter_mut()) {
            if let Some(command) = trigger.check(text, now) {
                info!("Trigger '{}' fired: {}", trigger.name, command);
                fired.push(command);
            }
        }
        fired
    }
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_PATTERN)
    }
}
