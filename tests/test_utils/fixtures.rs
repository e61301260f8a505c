//! Test Fixtures
//!
//! Settings tuned for fast tests, and a daemon running on a throwaway socket.

use mudprod::config::Config;
use mudprod::daemon::{DaemonClient, DaemonServer};
use mudprod::{PromptConfig, Session, SessionConfig, SessionSettings};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Defaults with short waits
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.timeouts.banner_ms = 200;
    config.timeouts.login_step_ms = 2000;
    config.timeouts.connect_ms = 2000;
    config.reconnect.backoff_ms = 50;
    config.prompt = PromptConfig::end_chars_only(">");
    config
}

pub fn create_test_settings() -> SessionSettings {
    SessionSettings::from_config(&create_test_config())
}

/// Session against a local port with `>` as the only prompt cue
pub fn create_test_session(name: &str, port: u16) -> Session {
    let config = SessionConfig::new("127.0.0.1", port).with_prompt(PromptConfig::end_chars_only(">"));
    Session::new(name, config, create_test_settings()).unwrap()
}

/// A daemon serving a socket inside a temporary directory
pub struct TestDaemon {
    pub client: DaemonClient,
    pub config: Config,
    pub task: JoinHandle<mudprod::Result<()>>,
    _dir: TempDir,
}

impl TestDaemon {
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config();
        config.daemon.socket_path = dir.path().join("mudprod.sock");
        config.daemon.pid_path = dir.path().join("mudprod.pid");

        let server = DaemonServer::bind(&config).await.unwrap();
        let task = tokio::spawn(async move { server.run().await });

        Self {
            client: DaemonClient::from_config(&config),
            config,
            task,
            _dir: dir,
        }
    }
}
