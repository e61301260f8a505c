//! Configuration management for mudprod
//!
//! Daemon locations, timeout presets, reconnect policy and per-session
//! defaults. Loaded from TOML or JSON by [`loader::ConfigLoader`], then
//! overridden from the environment.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::PromptConfig;
use crate::terminal::triggers::DEFAULT_REPEAT_PATTERN;

/// Overrides the config file location
pub const ENV_CONFIG: &str = "MUDPROD_CONFIG";
/// Overrides `daemon.socket_path`
pub const ENV_SOCKET: &str = "MUDPROD_SOCKET";
/// Overrides `daemon.pid_path`
pub const ENV_PID: &str = "MUDPROD_PID";
/// Overrides `session.io_log_path`
pub const ENV_IO_LOG: &str = "MUDPROD_LOG";
/// Session name used by the CLI when none is given
pub const ENV_SESSION: &str = "MUDPROD_SESSION";

/// Session name used when none is given
pub const DEFAULT_SESSION: &str = "default";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Daemon process settings
    pub daemon: DaemonConfig,

    /// Wait budgets
    pub timeouts: TimeoutConfig,

    /// Reconnect behaviour after a dropped connection
    pub reconnect: ReconnectPolicy,

    /// Defaults applied to every session
    pub session: SessionDefaults,

    /// Prompt detection used when a connect request brings none
    pub prompt: PromptConfig,
}

/// Daemon process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// File holding the daemon's PID
    pub pid_path: PathBuf,

    /// Log file for a daemon started in the background
    pub log_path: PathBuf,

    /// Maximum concurrently served client connections
    pub max_connections: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/mudprod.sock"),
            pid_path: PathBuf::from("/tmp/mudprod.pid"),
            log_path: PathBuf::from("/tmp/mudprod_server.log"),
            max_connections: 64,
        }
    }
}

/// Wait budgets in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// `send --fast`
    pub fast_ms: u64,
    /// `send` without a preset
    pub default_ms: u64,
    /// Per command inside a batch
    pub batch_ms: u64,
    /// `peek` without an explicit wait
    pub peek_ms: u64,
    /// `wait` without an explicit timeout
    pub wait_ms: u64,
    /// Each login step, and the final verdict
    pub login_step_ms: u64,
    /// TCP connect
    pub connect_ms: u64,
    /// Settle time for the banner after connecting without a login
    pub banner_ms: u64,
    /// Upper bound on a single readiness wait inside a longer wait
    pub poll_slice_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fast_ms: 1000,
            default_ms: 5000,
            batch_ms: 2000,
            peek_ms: 100,
            wait_ms: 10000,
            login_step_ms: 10000,
            connect_ms: 10000,
            banner_ms: 500,
            poll_slice_ms: 50,
        }
    }
}

impl TimeoutConfig {
    /// Budget for one `send`: explicit value, else the fast or default preset
    pub fn command_budget(&self, fast: bool, timeout_ms: Option<u64>) -> Duration {
        let ms = timeout_ms.unwrap_or(if fast { self.fast_ms } else { self.default_ms });
        Duration::from_millis(ms)
    }

    /// Budget for each command of a batch
    pub fn batch_budget(&self, fast: bool, timeout_ms: Option<u64>) -> Duration {
        let ms = timeout_ms.unwrap_or(if fast { self.fast_ms } else { self.batch_ms });
        Duration::from_millis(ms)
    }

    pub fn peek(&self, wait_ms: Option<u64>) -> Duration {
        Duration::from_millis(wait_ms.unwrap_or(self.peek_ms))
    }

    pub fn wait(&self, timeout_ms: Option<u64>) -> Duration {
        Duration::from_millis(timeout_ms.unwrap_or(self.wait_ms))
    }

    pub fn login_step(&self) -> Duration {
        Duration::from_millis(self.login_step_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn banner(&self) -> Duration {
        Duration::from_millis(self.banner_ms)
    }

    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }
}

/// How a dropped session is brought back
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Connect attempts per request before giving up
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff_ms` before retrying
    pub backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Per-session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    /// Cap on unread output; the oldest text is dropped beyond this
    pub max_buffer_bytes: usize,

    /// Default for connect requests that do not say
    pub auto_reconnect: bool,

    /// Cue for the repeat trigger
    pub repeat_pattern: String,

    /// Append every byte sent and received here
    pub io_log_path: Option<PathBuf>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 1024 * 1024,
            auto_reconnect: true,
            repeat_pattern: DEFAULT_REPEAT_PATTERN.to_string(),
            io_log_path: None,
        }
    }
}
