//! Session Configuration Model
//!
//! Everything a session needs to know before it opens a socket: where to
//! connect, the scripted login, and how to tell that the server is waiting
//! for input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Programmatic prompt predicate over clean text
pub type CustomPromptFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How to recognise that the server has stopped talking
#[derive(Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Regex patterns tested against the tail of the clean output
    #[serde(default = "PromptConfig::default_patterns")]
    pub patterns: Vec<String>,
    /// Characters that end a prompt when they are the last visible character
    #[serde(default = "PromptConfig::default_end_chars")]
    pub end_chars: String,
    /// Optional custom predicate (not serializable)
    #[serde(skip)]
    pub custom: Option<CustomPromptFn>,
}

impl PromptConfig {
    fn default_patterns() -> Vec<String> {
        vec![r">\s*$".to_string(), r":\s*$".to_string(), r"\]\s*$".to_string()]
    }

    fn default_end_chars() -> String {
        ">]:".to_string()
    }

    /// Only end-character detection, no regex patterns
    pub fn end_chars_only(end_chars: impl Into<String>) -> Self {
        Self {
            patterns: Vec::new(),
            end_chars: end_chars.into(),
            custom: None,
        }
    }

    /// Attach a custom predicate, evaluated after patterns and end chars
    pub fn with_custom<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(predicate));
        self
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            patterns: Self::default_patterns(),
            end_chars: Self::default_end_chars(),
            custom: None,
        }
    }
}

impl fmt::Debug for PromptConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptConfig")
            .field("patterns", &self.patterns)
            .field("end_chars", &self.end_chars)
            .field("custom", &self.custom.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One "wait for this, then send that" step of a login script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStep {
    /// Regex that must appear in the output before `send` is written
    pub expect: String,
    /// Reply text; a newline is appended when sent
    pub send: String,
}

impl LoginStep {
    pub fn new(expect: impl Into<String>, send: impl Into<String>) -> Self {
        Self {
            expect: expect.into(),
            send: send.into(),
        }
    }
}

/// Scripted login flow run right after the socket opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Steps, executed strictly in order
    #[serde(default)]
    pub steps: Vec<LoginStep>,
    /// Any match means the login succeeded
    #[serde(default = "LoginConfig::default_success_patterns")]
    pub success_patterns: Vec<String>,
    /// Any match means the login failed
    #[serde(default = "LoginConfig::default_failure_patterns")]
    pub failure_patterns: Vec<String>,
}

impl LoginConfig {
    /// Login script with the default success/failure patterns
    pub fn with_steps(steps: Vec<LoginStep>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    fn default_success_patterns() -> Vec<String> {
        vec![
            r">\s*$".to_string(),
            "Exits:".to_string(),
            "reconnected".to_string(),
        ]
    }

    fn default_failure_patterns() -> Vec<String> {
        vec![
            "[Ii]nvalid".to_string(),
            "[Ff]ailed".to_string(),
            "[Ii]ncorrect".to_string(),
        ]
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            success_patterns: Self::default_success_patterns(),
            failure_patterns: Self::default_failure_patterns(),
        }
    }
}

fn default_auto_reconnect() -> bool {
    true
}

/// Per-session connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Optional scripted login
    #[serde(default)]
    pub login: Option<LoginConfig>,
    /// Prompt detection settings
    #[serde(default)]
    pub prompt: PromptConfig,
    /// Reopen the socket on the next request after the connection drops
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
}

impl SessionConfig {
    /// Config with default prompt detection and no login
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            login: None,
            prompt: PromptConfig::default(),
            auto_reconnect: true,
        }
    }

    pub fn with_login(mut self, login: LoginConfig) -> Self {
        self.login = Some(login);
        self
    }

    pub fn with_prompt(mut self, prompt: PromptConfig) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// `host:port` for log messages
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Lifecycle of a session's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Socket open, login not yet run
    Connected,
    /// Running the login script
    LoggingIn,
    /// Accepting commands
    Ready,
}

impl ConnectionState {
    /// Whether a socket is (or is being) held
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::LoggingIn => "logging_in",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}
