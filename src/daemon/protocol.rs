//! Control Protocol
//!
//! Newline-delimited JSON over the daemon's Unix socket. Each line is one
//! [`Request`] tagged by `command`; the daemon answers each with exactly one
//! [`Reply`] line tagged by `reply`. A connection may carry any number of
//! request/reply pairs.
//!
//! ```text
//! {"command":"send","session":"p1","text":"look","fast":true}
//! {"reply":"response","session":"p1","response":{"raw":"...","clean":"...","lines":[...],"prompt":">","prompt_detected":true}}
//! ```

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SESSION;
use crate::error::{Error, ErrorKind, Result};
use crate::models::{ConnectionState, LoginConfig, PromptConfig, Response};
use crate::session::SessionStatus;
use crate::terminal::triggers::TriggerInfo;

/// Largest request line the daemon accepts
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

/// A control request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    /// Create the session if needed and connect it
    Connect {
        #[serde(default = "default_session")]
        session: String,
        host: String,
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        login: Option<LoginConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<PromptConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_reconnect: Option<bool>,
    },
    /// Send a command and wait for the prompt
    Send {
        #[serde(default = "default_session")]
        session: String,
        text: String,
        #[serde(default)]
        fast: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Send several commands in order
    Batch {
        #[serde(default = "default_session")]
        session: String,
        commands: Vec<String>,
        #[serde(default)]
        fast: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Write text verbatim, no wait
    Raw {
        #[serde(default = "default_session")]
        session: String,
        data: String,
    },
    /// Drain pending output
    Read {
        #[serde(default = "default_session")]
        session: String,
    },
    /// Wait briefly for output to arrive
    Peek {
        #[serde(default = "default_session")]
        session: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_ms: Option<u64>,
    },
    /// Wait for a pattern without sending anything
    Wait {
        #[serde(default = "default_session")]
        session: String,
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// One session, or all when `session` is absent
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    TriggerAdd {
        #[serde(default = "default_session")]
        session: String,
        /// Defaults to the pattern itself
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        pattern: String,
        #[serde(rename = "text", alias = "reaction")]
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cooldown_ms: Option<u64>,
    },
    TriggerRemove {
        #[serde(default = "default_session")]
        session: String,
        name: String,
    },
    TriggerClear {
        #[serde(default = "default_session")]
        session: String,
    },
    /// Set the repeat trigger; `off` disables it
    Repeat {
        #[serde(default = "default_session")]
        session: String,
        #[serde(rename = "text")]
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },
    Triggers {
        #[serde(default = "default_session")]
        session: String,
    },
    /// Close and forget a session
    Disconnect {
        #[serde(default = "default_session")]
        session: String,
    },
    /// Liveness probe
    Ping,
    /// Disconnect everything and exit
    Stop,
}

impl Request {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "connect",
            Request::Send { .. } => "send",
            Request::Batch { .. } => "batch",
            Request::Raw { .. } => "raw",
            Request::Read { .. } => "read",
            Request::Peek { .. } => "peek",
            Request::Wait { .. } => "wait",
            Request::Status { .. } => "status",
            Request::TriggerAdd { .. } => "trigger_add",
            Request::TriggerRemove { .. } => "trigger_remove",
            Request::TriggerClear { .. } => "trigger_clear",
            Request::Repeat { .. } => "repeat",
            Request::Triggers { .. } => "triggers",
            Request::Disconnect { .. } => "disconnect",
            Request::Ping => "ping",
            Request::Stop => "stop",
        }
    }
}

/// One command of a batch and what it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub command: String,
    pub response: Response,
}

/// The command a batch stopped at, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub command: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// A control reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    /// Request done, nothing to return
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Connected {
        session: String,
        state: ConnectionState,
        /// The session was already connected and left untouched
        reused: bool,
        /// Output received while connecting and logging in
        greeting: Response,
    },
    Response {
        session: String,
        response: Response,
    },
    /// Results of the commands that completed; `error` is set when the
    /// batch stopped early
    Batch {
        session: String,
        results: Vec<BatchItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<BatchFailure>,
    },
    Status {
        sessions: Vec<SessionStatus>,
    },
    Triggers {
        session: String,
        triggers: Vec<TriggerInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repeat: Option<TriggerInfo>,
    },
    Pong {
        version: String,
        sessions: usize,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok { message: None }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Reply::Ok {
            message: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }

    /// An error reply, or a batch that stopped before its last command
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Reply::Error { .. } | Reply::Batch { error: Some(_), .. }
        )
    }

    /// Turn an error reply back into an [`Error::Remote`]
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error { kind, message } => Err(Error::Remote { kind, message }),
            reply => Ok(reply),
        }
    }
}

impl From<Error> for Reply {
    fn from(err: Error) -> Self {
        Reply::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<Result<Reply>> for Reply {
    fn from(result: Result<Reply>) -> Self {
        result.unwrap_or_else(Reply::from)
    }
}

/// Serialize one message as a JSON line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one request line
pub fn decode_request(line: &str) -> Result<Request> {
    serde_json::from_str(line.trim()).map_err(|e| Error::protocol(format!("invalid request: {}", e)))
}

/// Parse one reply line
pub fn decode_reply(line: &str) -> Result<Reply> {
    serde_json::from_str(line.trim()).map_err(|e| Error::protocol(format!("invalid reply: {}", e)))
}
