//! Error types and Result aliases for mudprod

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result type alias for mudprod operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mudprod
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // === Connection errors ===
    /// TCP connect to the game server failed or timed out
    #[error("Failed to connect to {host}:{port}: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// Scripted login did not reach a success pattern
    #[error("Login failed for session '{session}': {reason}")]
    LoginFailed { session: String, reason: String },

    /// The server closed the socket or a read/write hit a broken pipe
    #[error("Connection lost for session '{session}'")]
    ConnectionLost { session: String },

    // === Registry errors ===
    /// No session registered under this name
    #[error("Unknown session: {name}")]
    UnknownSession { name: String },

    /// The `repeat` trigger name can only be set through the repeat command
    #[error("Trigger name '{name}' is reserved")]
    ReservedTriggerName { name: String },

    /// No trigger registered under this name
    #[error("Trigger not found: {name}")]
    TriggerNotFound { name: String },

    // === Protocol errors ===
    /// Malformed or unsupported control request
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// Error reported by the daemon on the other side of the control socket
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },

    /// Daemon is not listening on the control socket
    #[error("Daemon is not running (socket: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    /// Another daemon already owns the control socket
    #[error("Daemon already running (pid {pid})")]
    DaemonAlreadyRunning { pid: i32 },

    // === Configuration errors ===
    /// Failed to load configuration file
    #[error("Failed to load config from {path}: {reason}")]
    ConfigLoadFailed { path: PathBuf, reason: String },

    /// Configuration file not found
    #[error("Configuration file not found")]
    ConfigNotFound,

    /// Configuration validation failed
    #[error("Invalid configuration value for '{field}': {reason}")]
    ConfigValidationFailed { field: String, reason: String },

    /// Failed to serialize configuration
    #[error("Failed to serialize config as {format}: {reason}")]
    ConfigSerializationFailed { format: String, reason: String },

    /// Failed to parse configuration
    #[error("Failed to parse {format} config: {reason}")]
    ConfigParseFailed { format: String, reason: String },

    // === Wrapped errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Error category carried over the control socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectError,
    LoginFailed,
    ConnectionLost,
    UnknownSession,
    ProtocolError,
    InvalidPattern,
    Trigger,
    Config,
    Daemon,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConnectError => "connect_error",
            ErrorKind::LoginFailed => "login_failed",
            ErrorKind::ConnectionLost => "connection_lost",
            ErrorKind::UnknownSession => "unknown_session",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::InvalidPattern => "invalid_pattern",
            ErrorKind::Trigger => "trigger",
            ErrorKind::Config => "config",
            ErrorKind::Daemon => "daemon",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Project this error onto the wire taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectFailed { .. } => ErrorKind::ConnectError,
            Error::LoginFailed { .. } => ErrorKind::LoginFailed,
            Error::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Error::UnknownSession { .. } => ErrorKind::UnknownSession,
            Error::ReservedTriggerName { .. } | Error::TriggerNotFound { .. } => {
                ErrorKind::Trigger
            }
            Error::Protocol { .. } | Error::Serde(_) => ErrorKind::ProtocolError,
            Error::Remote { kind, .. } => *kind,
            Error::DaemonNotRunning { .. } | Error::DaemonAlreadyRunning { .. } => {
                ErrorKind::Daemon
            }
            Error::ConfigLoadFailed { .. }
            | Error::ConfigNotFound
            | Error::ConfigValidationFailed { .. }
            | Error::ConfigSerializationFailed { .. }
            | Error::ConfigParseFailed { .. }
            | Error::Toml(_) => ErrorKind::Config,
            Error::InvalidPattern(_) => ErrorKind::InvalidPattern,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for protocol errors
    pub fn protocol(reason: impl Into<String>) -> Self {
        Error::Protocol {
            reason: reason.into(),
        }
    }
}
