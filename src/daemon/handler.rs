//! Request dispatch
//!
//! Maps each control [`Request`] onto the registry and the named session,
//! applying the configured timeout presets. Every outcome, failures
//! included, becomes a [`Reply`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::daemon::protocol::{BatchFailure, BatchItem, Reply, Request};
use crate::daemon::registry::SessionRegistry;
use crate::error::Result;

/// Executes requests against the registry
#[derive(Clone)]
pub struct RequestHandler {
    registry: Arc<SessionRegistry>,
    timeouts: TimeoutConfig,
}

impl RequestHandler {
    pub fn new(registry: Arc<SessionRegistry>, timeouts: TimeoutConfig) -> Self {
        Self { registry, timeouts }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run one request; errors come back as [`Reply::Error`]
    pub async fn handle(&self, request: Request) -> Reply {
        let command = request.name();
        debug!("Dispatching {}", command);

        let result = self.dispatch(request).await;
        if let Err(e) = &result {
            debug!("{} failed: {}", command, e);
        }
        Reply::from(result)
    }

    async fn dispatch(&self, request: Request) -> Result<Reply> {
        match request {
            Request::Connect {
                session,
                host,
                port,
                login,
                prompt,
                auto_reconnect,
            } => {
                let config = self
                    .registry
                    .session_config(&host, port, login, prompt, auto_reconnect);
                let outcome = self.registry.connect(&session, config).await?;
                Ok(Reply::Connected {
                    session,
                    state: outcome.state,
                    reused: outcome.reused,
                    greeting: outcome.greeting,
                })
            }

            Request::Send {
                session,
                text,
                fast,
                timeout_ms,
            } => {
                let budget = self.timeouts.command_budget(fast, timeout_ms);
                let shared = self.registry.get(&session).await?;
                let response = shared.lock().await.send_command(&text, budget).await?;
                Ok(Reply::Response { session, response })
            }

            Request::Batch {
                session,
                commands,
                fast,
                timeout_ms,
            } => {
                let budget = self.timeouts.batch_budget(fast, timeout_ms);
                let shared = self.registry.get(&session).await?;
                let outcome = shared.lock().await.send_batch(&commands, budget).await;
                let error = match outcome.error {
                    // Nothing completed: a plain error reply
                    Some(e) if outcome.responses.is_empty() => return Err(e),
                    Some(e) => Some(BatchFailure {
                        command: commands
                            .get(outcome.responses.len())
                            .cloned()
                            .unwrap_or_default(),
                        kind: e.kind(),
                        message: e.to_string(),
                    }),
                    None => None,
                };
                let results = commands
                    .into_iter()
                    .zip(outcome.responses)
                    .map(|(command, response)| BatchItem { command, response })
                    .collect();
                Ok(Reply::Batch {
                    session,
                    results,
                    error,
                })
            }

            Request::Raw { session, data } => {
                let shared = self.registry.get(&session).await?;
                shared.lock().await.send_raw(&data).await?;
                Ok(Reply::ok())
            }

            Request::Read { session } => {
                let shared = self.registry.get(&session).await?;
                let response = shared.lock().await.read_available().await?;
                Ok(Reply::Response { session, response })
            }

            Request::Peek { session, wait_ms } => {
                let wait = self.timeouts.peek(wait_ms);
                let shared = self.registry.get(&session).await?;
                let response = shared.lock().await.peek(wait).await?;
                Ok(Reply::Response { session, response })
            }

            Request::Wait {
                session,
                pattern,
                timeout_ms,
            } => {
                let budget = self.timeouts.wait(timeout_ms);
                let shared = self.registry.get(&session).await?;
                let response = shared
                    .lock()
                    .await
                    .wait_for_pattern(&pattern, budget)
                    .await?;
                Ok(Reply::Response { session, response })
            }

            Request::Status { session } => Ok(Reply::Status {
                sessions: self.registry.status(session.as_deref()).await?,
            }),

            Request::TriggerAdd {
                session,
                name,
                pattern,
                command,
                cooldown_ms,
            } => {
                let name = name.unwrap_or_else(|| pattern.clone());
                let shared = self.registry.get(&session).await?;
                shared.lock().await.add_trigger(
                    &name,
                    &pattern,
                    &command,
                    cooldown_ms.map(Duration::from_millis),
                )?;
                Ok(Reply::message(format!("trigger '{}' set", name)))
            }

            Request::TriggerRemove { session, name } => {
                let shared = self.registry.get(&session).await?;
                shared.lock().await.remove_trigger(&name)?;
                Ok(Reply::message(format!("trigger '{}' removed", name)))
            }

            Request::TriggerClear { session } => {
                let shared = self.registry.get(&session).await?;
                shared.lock().await.clear_triggers();
                Ok(Reply::message("triggers cleared"))
            }

            Request::Repeat {
                session,
                command,
                pattern,
            } => {
                let shared = self.registry.get(&session).await?;
                let active = shared.lock().await.set_repeat(&command, pattern.as_deref())?;
                if active {
                    Ok(Reply::message(format!("repeat set to '{}'", command)))
                } else {
                    Ok(Reply::message("repeat off"))
                }
            }

            Request::Triggers { session } => {
                let shared = self.registry.get(&session).await?;
                let (triggers, repeat) = shared.lock().await.triggers();
                Ok(Reply::Triggers {
                    session,
                    triggers,
                    repeat,
                })
            }

            Request::Disconnect { session } => {
                self.registry.disconnect(&session).await?;
                Ok(Reply::message(format!("session '{}' disconnected", session)))
            }

            Request::Ping => Ok(Reply::Pong {
                version: crate::VERSION.to_string(),
                sessions: self.registry.len().await,
            }),

            // The server acts on stop once the acknowledgement is written
            Request::Stop => Ok(Reply::message("daemon stopping")),
        }
    }
}
