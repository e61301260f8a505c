//! mudprod - persistent MUD session engine
//!
//! Keeps line-oriented connections to text game servers alive inside a
//! local daemon so that short-lived, scripted invocations can drive them:
//! send a command and get back everything up to the next prompt, read or
//! peek at pending output, wait for a pattern, and react to output with
//! triggers.
//!
//! ## Module Organization
//!
//! ### Session engine
//!
//! - [`transport`] - Non-blocking TCP byte channel with bounded readiness waits
//! - [`terminal`] - Output normalization, prompt detection, login driver, triggers
//! - [`session`] - One named connection: read cycles, reconnects, the output buffer
//! - [`models`] - Responses and session configuration
//!
//! ### Daemon
//!
//! - [`daemon`] - Session registry, Unix socket server and client stub
//!
//! ### Support
//!
//! - [`config`] - Configuration loading, timeout presets, environment overrides
//! - [`mod@error`] - Error types and Result aliases
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use mudprod::{PromptConfig, Session, SessionConfig, SessionSettings};
//!
//! # async fn demo() -> mudprod::Result<()> {
//! let config = SessionConfig::new("localhost", 4000)
//!     .with_prompt(PromptConfig::end_chars_only(">"));
//! let mut session = Session::new("p1", config, SessionSettings::default())?;
//!
//! session.connect().await?;
//! let response = session.send_command("look", Duration::from_secs(5)).await?;
//! println!("{}", response.clean);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! One daemon process runs on a multi-threaded tokio runtime. Each client
//! connection is its own task; each session sits behind its own async
//! mutex, so requests for one session are serialized while different
//! sessions proceed concurrently. Timeouts are the only cancellation
//! mechanism, and running out of time is reported as data
//! (`prompt_detected == false`), never as an error.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod daemon;
pub mod error;
pub mod models;
pub mod session;
pub mod terminal;
pub mod transport;

// Re-exports for core functionality
pub use config::loader::ConfigLoader;
pub use config::Config;
pub use daemon::{DaemonClient, DaemonServer, Reply, Request, SessionRegistry};
pub use error::{Error, ErrorKind, Result};
pub use models::{
    ConnectionState, LoginConfig, LoginStep, PromptConfig, Response, SessionConfig,
};
pub use session::{BatchOutcome, Session, SessionSettings, SessionStatus};

// Version information
/// The current version of mudprod from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The package name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Load configuration from the default locations, falling back to defaults
///
/// A broken config file is reported and skipped rather than fatal, so a
/// daemon can always start.
pub fn load_config() -> Config {
    match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load configuration: {}. Using defaults", e);
            let mut config = Config::default();
            config::loader::apply_overrides(&mut config, |key| std::env::var(key).ok());
            config
        }
    }
}

/// Load configuration from an explicit file
pub fn load_config_from(path: &std::path::Path) -> Result<Config> {
    if !path.exists() {
        return Err(Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: "Configuration file does not exist".to_string(),
        });
    }
    let mut config = ConfigLoader::new().load_from_path(path)?;
    config::loader::apply_overrides(&mut config, |key| std::env::var(key).ok());
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

/// Human-oriented explanation of a startup failure
pub fn handle_startup_error(error: &Error) -> String {
    match error {
        Error::ConfigLoadFailed { path, reason } => format!(
            "Configuration Error: Failed to load config from '{}': {}\n\nTry:\n• Check configuration file syntax\n• Remove the file to use defaults",
            path.display(),
            reason
        ),
        Error::ConfigParseFailed { format, reason } => format!(
            "Configuration Error: Failed to parse {} config: {}",
            format, reason
        ),
        Error::ConfigValidationFailed { field, reason } => format!(
            "Configuration Error: Validation failed for '{}': {}",
            field, reason
        ),
        Error::DaemonAlreadyRunning { pid } => format!(
            "Daemon Error: a daemon is already running (pid {})\n\nTry:\n• mudprod stop",
            pid
        ),
        Error::DaemonNotRunning { socket } => format!(
            "Daemon Error: no daemon is listening on {}\n\nTry:\n• mudprod start",
            socket.display()
        ),
        Error::Io(err) => format!(
            "I/O Error: {}\n\nTry:\n• Check permissions on the socket and PID paths",
            err
        ),
        _ => format!("Error: {}", error),
    }
}
