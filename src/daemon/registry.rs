//! Session registry
//!
//! The daemon's map from session name to [`Session`]. Each session sits
//! behind its own async mutex so requests against one name are serialized
//! while different names proceed concurrently. Status reads go through the
//! session's watch channel and never wait on a busy session.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ConnectionState, LoginConfig, PromptConfig, Response, SessionConfig};
use crate::session::{Session, SessionSettings, SessionStatus};

/// A session shared between request handlers
pub type SharedSession = Arc<Mutex<Session>>;

struct SessionEntry {
    session: SharedSession,
    status: watch::Receiver<SessionStatus>,
}

/// Result of a connect request
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub state: ConnectionState,
    /// The session was already connected to the same target
    pub reused: bool,
    pub greeting: Response,
}

/// All live sessions of the daemon
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    settings: SessionSettings,
    default_prompt: PromptConfig,
    default_auto_reconnect: bool,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings: SessionSettings::from_config(config),
            default_prompt: config.prompt.clone(),
            default_auto_reconnect: config.session.auto_reconnect,
        }
    }

    /// Build a session config, filling the gaps from the daemon defaults
    pub fn session_config(
        &self,
        host: &str,
        port: u16,
        login: Option<LoginConfig>,
        prompt: Option<PromptConfig>,
        auto_reconnect: Option<bool>,
    ) -> SessionConfig {
        let mut config = SessionConfig::new(host, port)
            .with_prompt(prompt.unwrap_or_else(|| self.default_prompt.clone()))
            .with_auto_reconnect(auto_reconnect.unwrap_or(self.default_auto_reconnect));
        if let Some(login) = login {
            config = config.with_login(login);
        }
        config
    }

    /// Create the session if the name is new, then connect it
    ///
    /// A session already connected to the same host and port is left alone.
    /// A session that fails to connect stays registered, disconnected.
    pub async fn connect(&self, name: &str, config: SessionConfig) -> Result<ConnectOutcome> {
        loop {
            let (shared, created) = self.get_or_create(name, &config).await?;
            let mut session = shared.lock().await;

            // The entry may have been removed while we waited for the lock
            if !self.is_registered(name, &shared).await {
                debug!("Session '{}' was removed while waiting, retrying", name);
                continue;
            }

            if !created {
                if session.is_ready() {
                    let current = session.config();
                    if current.host == config.host && current.port == config.port {
                        debug!("Session '{}' already connected, reusing", name);
                        return Ok(ConnectOutcome {
                            state: session.state(),
                            reused: true,
                            greeting: Response::empty(),
                        });
                    }
                    info!(
                        "Session '{}' moving from {} to {}",
                        name,
                        current.address(),
                        config.address()
                    );
                    session.disconnect().await;
                }
                session.reconfigure(config.clone())?;
            }

            let greeting = session.connect().await?;
            return Ok(ConnectOutcome {
                state: session.state(),
                reused: false,
                greeting,
            });
        }
    }

    async fn get_or_create(&self, name: &str, config: &SessionConfig) -> Result<(SharedSession, bool)> {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(name) {
            return Ok((entry.session.clone(), false));
        }

        let session = Session::new(name, config.clone(), self.settings.clone())?;
        let status = session.subscribe();
        let shared = Arc::new(Mutex::new(session));
        sessions.insert(
            name.to_string(),
            SessionEntry {
                session: shared.clone(),
                status,
            },
        );
        info!("Session '{}' created for {}", name, config.address());
        Ok((shared, true))
    }

    /// The map still holds this very session under `name`
    async fn is_registered(&self, name: &str, shared: &SharedSession) -> bool {
        self.sessions
            .read()
            .await
            .get(name)
            .is_some_and(|entry| Arc::ptr_eq(&entry.session, shared))
    }

    /// Look up a session by name
    pub async fn get(&self, name: &str) -> Result<SharedSession> {
        self.sessions
            .read()
            .await
            .get(name)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| Error::UnknownSession {
                name: name.to_string(),
            })
    }

    /// Status of one session, or of every session sorted by name
    pub async fn status(&self, name: Option<&str>) -> Result<Vec<SessionStatus>> {
        let sessions = self.sessions.read().await;
        match name {
            Some(name) => {
                let entry = sessions.get(name).ok_or_else(|| Error::UnknownSession {
                    name: name.to_string(),
                })?;
                Ok(vec![entry.status.borrow().clone()])
            }
            None => {
                let mut all: Vec<SessionStatus> = sessions
                    .values()
                    .map(|entry| entry.status.borrow().clone())
                    .collect();
                all.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(all)
            }
        }
    }

    /// Close a session and forget it
    ///
    /// The entry leaves the map before the session lock is taken; a connect
    /// already waiting on that lock sees the removal and starts over.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(name)
            .ok_or_else(|| Error::UnknownSession {
                name: name.to_string(),
            })?;
        entry.session.lock().await.disconnect().await;
        info!("Session '{}' removed", name);
        Ok(())
    }

    /// Close and forget every session
    pub async fn close_all(&self) {
        let entries: Vec<(String, SessionEntry)> = self.sessions.write().await.drain().collect();
        if entries.is_empty() {
            return;
        }
        info!("Closing {} session(s)", entries.len());
        for (name, entry) in entries {
            entry.session.lock().await.disconnect().await;
            debug!("Session '{}' closed", name);
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Daemon-wide session settings
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}
