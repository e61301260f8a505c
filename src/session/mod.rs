//! Session
//!
//! One named, long-lived conversation with a game server. A session owns
//! the transport and everything that interprets its output: the decoder,
//! the accumulation buffer, the prompt detector, the login driver and the
//! trigger engine.
//!
//! ## Read cycles
//!
//! Every wait is a bounded loop of readiness polls of at most
//! `poll_slice_ms`. After each slice the new bytes are decoded, appended to
//! the buffer and scanned by the triggers, then the wait condition is
//! re-checked. A command's prompt is only looked for in output that arrived
//! after the command was written, so leftovers from earlier activity cannot
//! end the wait early; they are still returned with the response.
//!
//! Trigger reactions are queued during the cycle and written once the
//! cycle's response has been assembled.
//!
//! ## Connection loss
//!
//! A closed socket ends the current wait with
//! [`Error::ConnectionLost`]. Whatever was buffered stays readable. With
//! `auto_reconnect`, the next request reopens the socket (and logs in again)
//! before doing its own work; the failed request is never replayed.

pub mod buffer;
pub mod iolog;

pub use buffer::OutputBuffer;
pub use iolog::IoLog;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::{Config, ReconnectPolicy, TimeoutConfig};
use crate::error::{Error, Result};
use crate::models::{ConnectionState, LoginConfig, Response, SessionConfig};
use crate::terminal::login::{LoginAction, LoginMachine};
use crate::terminal::output::{clean_text, TextDecoder};
use crate::terminal::prompt::PromptDetector;
use crate::terminal::triggers::{TriggerEngine, TriggerInfo};
use crate::transport::{Readiness, Transport};

/// Upper bound on each readiness check of a non-blocking drain
const DRAIN_WAIT: Duration = Duration::from_millis(1);

/// Responses of a batch, which may have stopped early
#[derive(Debug)]
pub struct BatchOutcome {
    /// One response per completed command, in order
    pub responses: Vec<Response>,
    /// What stopped the batch before its last command
    pub error: Option<Error>,
}

/// Engine-wide knobs a session is created with
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub timeouts: TimeoutConfig,
    pub reconnect: ReconnectPolicy,
    pub max_buffer_bytes: usize,
    pub repeat_pattern: String,
    pub io_log_path: Option<PathBuf>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeouts: config.timeouts.clone(),
            reconnect: config.reconnect.clone(),
            max_buffer_bytes: config.session.max_buffer_bytes,
            repeat_pattern: config.session.repeat_pattern.clone(),
            io_log_path: config.session.io_log_path.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub state: ConnectionState,
    /// A login script ran and succeeded on the current connection
    pub logged_in: bool,
    pub auto_reconnect: bool,
    /// Unread output held by the session
    pub buffered_bytes: usize,
    /// Active triggers, repeat included
    pub triggers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// What a wait is waiting for
enum WaitFor<'a> {
    /// The prompt detector fires on output from `since` on
    Prompt { since: usize },
    /// The regex matches clean output from `since` on
    Pattern { regex: &'a Regex, since: usize },
}

/// A named connection to one game server
pub struct Session {
    name: String,
    config: SessionConfig,
    settings: SessionSettings,
    detector: PromptDetector,
    transport: Option<Transport>,
    decoder: TextDecoder,
    state: ConnectionState,
    buffer: OutputBuffer,
    triggers: TriggerEngine,
    /// Trigger commands waiting for the current read cycle to finish
    pending_fires: Vec<String>,
    io_log: Option<IoLog>,
    logged_in: bool,
    connected_since: Option<DateTime<Utc>>,
    status_tx: watch::Sender<SessionStatus>,
}

impl Session {
    /// Create a disconnected session; fails on invalid prompt or login patterns
    pub fn new(name: impl Into<String>, config: SessionConfig, settings: SessionSettings) -> Result<Self> {
        let name = name.into();
        let detector = Self::validate(&config)?;

        let initial = SessionStatus {
            name: name.clone(),
            host: config.host.clone(),
            port: config.port,
            state: ConnectionState::Disconnected,
            logged_in: false,
            auto_reconnect: config.auto_reconnect,
            buffered_bytes: 0,
            triggers: 0,
            connected_since: None,
            bytes_read: 0,
            bytes_written: 0,
        };
        let (status_tx, _) = watch::channel(initial);

        Ok(Self {
            triggers: TriggerEngine::new(settings.repeat_pattern.clone()),
            buffer: OutputBuffer::new(settings.max_buffer_bytes),
            io_log: settings.io_log_path.clone().map(IoLog::new),
            name,
            config,
            settings,
            detector,
            transport: None,
            decoder: TextDecoder::new(),
            state: ConnectionState::Disconnected,
            pending_fires: Vec::new(),
            logged_in: false,
            connected_since: None,
            status_tx,
        })
    }

    fn validate(config: &SessionConfig) -> Result<PromptDetector> {
        if let Some(login) = &config.login {
            LoginMachine::new(login)?;
        }
        PromptDetector::from_config(&config.prompt)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connected, logged in if required, and accepting commands
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
            && self.transport.as_ref().is_some_and(|t| !t.is_closed())
    }

    /// Replace the connection settings of a session that is not connected
    pub fn reconfigure(&mut self, config: SessionConfig) -> Result<()> {
        if self.is_ready() {
            return Err(Error::protocol(format!(
                "session '{}' is connected; disconnect before changing its target",
                self.name
            )));
        }
        self.detector = Self::validate(&config)?;
        self.config = config;
        self.publish();
        Ok(())
    }

    /// Open the socket, run the login script, and return the greeting
    ///
    /// Without a login script the greeting is whatever the server sends
    /// before its first prompt (bounded by `banner_ms`).
    pub async fn connect(&mut self) -> Result<Response> {
        self.close_transport().await;
        let mark = self.buffer.end();
        self.logged_in = false;
        self.set_state(ConnectionState::Connecting);
        info!("Session '{}' connecting to {}", self.name, self.config.address());

        let transport = match Transport::open(
            &self.config.host,
            self.config.port,
            self.settings.timeouts.connect(),
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Session '{}': {}", self.name, e);
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.transport = Some(transport);
        self.decoder = TextDecoder::new();
        self.connected_since = Some(Utc::now());
        self.set_state(ConnectionState::Connected);

        let outcome = match self.config.login.clone() {
            Some(login) => {
                self.set_state(ConnectionState::LoggingIn);
                self.run_login(&login, mark).await
            }
            None => self
                .wait_until(self.settings.timeouts.banner(), WaitFor::Prompt { since: mark })
                .await
                .map(|_| ()),
        };

        if let Err(e) = outcome {
            warn!("Session '{}' connect failed: {}", self.name, e);
            self.close_transport().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        self.logged_in = self.config.login.is_some();
        self.set_state(ConnectionState::Ready);
        info!("Session '{}' ready", self.name);

        let greeting = self.buffer.take_since(mark);
        let detected = self.detector.is_prompt(&clean_text(&greeting));
        self.flush_fires().await;
        self.publish();
        Ok(Response::new(greeting, detected))
    }

    async fn run_login(&mut self, login: &LoginConfig, mark: usize) -> Result<()> {
        let mut machine = LoginMachine::new(login)?;
        let step_budget = self.settings.timeouts.login_step();
        let slice = self.settings.timeouts.poll_slice();
        let mut deadline = Instant::now() + step_budget;
        let mut fed = mark;

        loop {
            let fresh = self.buffer.text_since(fed).to_string();
            fed = self.buffer.end();

            let mut action = machine.on_output(&fresh);
            if action == LoginAction::Wait && Instant::now() >= deadline {
                action = machine.on_timeout();
            }

            match action {
                LoginAction::Send(reply) => {
                    debug!(
                        "Session '{}' login step {} matched, replying",
                        self.name,
                        machine.replies_sent()
                    );
                    self.write_line(&reply)
                        .await
                        .map_err(|_| self.login_failed("connection closed during login"))?;
                    deadline = Instant::now() + step_budget;
                }
                LoginAction::Succeeded => return Ok(()),
                LoginAction::Failed(reason) => return Err(self.login_failed(&reason)),
                LoginAction::Wait => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.read_slice(remaining.min(slice)).await {
                        Ok(_) => {}
                        Err(Error::ConnectionLost { .. }) => {
                            return Err(self.login_failed("connection closed during login"))
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn login_failed(&self, reason: &str) -> Error {
        Error::LoginFailed {
            session: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    /// Write `command` plus newline and wait up to `budget` for the prompt
    ///
    /// Running out of time is not an error: the response carries whatever
    /// arrived with `prompt_detected == false`.
    pub async fn send_command(&mut self, command: &str, budget: Duration) -> Result<Response> {
        self.ensure_ready().await?;

        let mark = self.buffer.end();
        self.write_line(command).await?;
        let detected = self
            .wait_until(budget, WaitFor::Prompt { since: mark })
            .await?;
        if !detected {
            debug!(
                "Session '{}': no prompt within {}ms after '{}'",
                self.name,
                budget.as_millis(),
                command
            );
        }

        let raw = self.buffer.take();
        self.flush_fires().await;
        self.publish();
        Ok(Response::new(raw, detected))
    }

    /// Run commands one after another, each with its own budget
    ///
    /// A failing command ends the batch; responses of the commands before
    /// it are kept in the outcome.
    pub async fn send_batch(&mut self, commands: &[String], budget: Duration) -> BatchOutcome {
        let mut responses = Vec::with_capacity(commands.len());
        for command in commands {
            match self.send_command(command, budget).await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    warn!(
                        "Session '{}' batch stopped at '{}' ({} of {} done): {}",
                        self.name,
                        command,
                        responses.len(),
                        commands.len(),
                        e
                    );
                    return BatchOutcome {
                        responses,
                        error: Some(e),
                    };
                }
            }
        }
        BatchOutcome {
            responses,
            error: None,
        }
    }

    /// Write bytes verbatim without waiting for anything
    pub async fn send_raw(&mut self, data: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.write(data.as_bytes()).await?;
        self.publish();
        Ok(())
    }

    /// Drain whatever is available right now
    ///
    /// Works on a disconnected session too, returning output that was
    /// buffered before the connection dropped.
    pub async fn read_available(&mut self) -> Result<Response> {
        if self.transport.is_some() {
            self.drain_tolerant().await?;
        }
        Ok(self.finish_read().await)
    }

    /// Wait up to `wait` for output to start arriving, then drain it
    pub async fn peek(&mut self, wait: Duration) -> Result<Response> {
        if self.transport.is_some() {
            let slice = self.settings.timeouts.poll_slice();
            let deadline = Instant::now() + wait;
            loop {
                if !self.buffer.is_empty() {
                    self.drain_tolerant().await?;
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match self.read_slice(remaining.min(slice)).await {
                    Ok(_) => {}
                    Err(Error::ConnectionLost { .. }) => break,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(self.finish_read().await)
    }

    /// Wait for a case-insensitive regex to appear, without sending anything
    ///
    /// Already-buffered output counts. `prompt_detected` on the response
    /// reports whether the pattern matched.
    pub async fn wait_for_pattern(&mut self, pattern: &str, budget: Duration) -> Result<Response> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        self.ensure_ready().await?;

        let since = self.buffer.start();
        let matched = self
            .wait_until(budget, WaitFor::Pattern { regex: &regex, since })
            .await?;

        let raw = self.buffer.take();
        self.flush_fires().await;
        self.publish();
        Ok(Response::pattern_match(raw, matched))
    }

    /// Close the socket; buffered output and triggers are kept
    pub async fn disconnect(&mut self) {
        self.close_transport().await;
        self.set_state(ConnectionState::Disconnected);
        info!("Session '{}' disconnected", self.name);
    }

    // === Triggers ===

    pub fn add_trigger(
        &mut self,
        name: &str,
        pattern: &str,
        command: &str,
        cooldown: Option<Duration>,
    ) -> Result<()> {
        self.triggers.add(name, pattern, command, cooldown)?;
        info!("Session '{}' trigger '{}' set: /{}/ -> {}", self.name, name, pattern, command);
        self.publish();
        Ok(())
    }

    pub fn remove_trigger(&mut self, name: &str) -> Result<()> {
        self.triggers.remove(name)?;
        self.publish();
        Ok(())
    }

    pub fn clear_triggers(&mut self) {
        self.triggers.clear();
        self.publish();
    }

    /// Set the repeat trigger; `off` disables it. Returns whether it is active.
    pub fn set_repeat(&mut self, command: &str, pattern: Option<&str>) -> Result<bool> {
        let active = self.triggers.set_repeat(command, pattern)?;
        self.publish();
        Ok(active)
    }

    /// Named triggers and the repeat trigger
    pub fn triggers(&self) -> (Vec<TriggerInfo>, Option<TriggerInfo>) {
        (self.triggers.list(), self.triggers.repeat())
    }

    // === Status ===

    pub fn status(&self) -> SessionStatus {
        let (bytes_read, bytes_written) = self
            .transport
            .as_ref()
            .map(|t| (t.stats().bytes_read, t.stats().bytes_written))
            .unwrap_or((0, 0));

        SessionStatus {
            name: self.name.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            state: self.state,
            logged_in: self.logged_in,
            auto_reconnect: self.config.auto_reconnect,
            buffered_bytes: self.buffer.len(),
            triggers: self.triggers.len(),
            connected_since: self.connected_since,
            bytes_read,
            bytes_written,
        }
    }

    /// Status updates published without taking the session lock
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Session '{}': {} -> {}", self.name, self.state, state);
        }
        self.state = state;
        if state == ConnectionState::Disconnected {
            self.connected_since = None;
            self.logged_in = false;
        }
        self.publish();
    }

    // === Read cycle internals ===

    /// Reopen the connection if it dropped and reconnecting is allowed
    ///
    /// Output that arrived since the last cycle is pulled into the buffer
    /// first, so a following mark only covers fresh output.
    async fn ensure_ready(&mut self) -> Result<()> {
        if self.transport.is_some() {
            self.drain_tolerant().await?;
        }
        if self.transport.as_ref().is_some_and(Transport::is_closed) {
            self.mark_lost();
        }
        if self.is_ready() {
            return Ok(());
        }
        if !self.config.auto_reconnect {
            return Err(Error::ConnectionLost {
                session: self.name.clone(),
            });
        }
        self.reconnect().await
    }

    async fn reconnect(&mut self) -> Result<()> {
        let attempts = self.settings.reconnect.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            info!(
                "Session '{}' reconnecting (attempt {}/{})",
                self.name, attempt, attempts
            );
            match self.connect().await {
                Ok(greeting) => {
                    if !greeting.is_empty() {
                        debug!(
                            "Session '{}' discarded {} bytes of reconnect greeting",
                            self.name,
                            greeting.raw.len()
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.reconnect.backoff(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::ConnectionLost {
            session: self.name.clone(),
        }))
    }

    /// Poll until the condition holds or `budget` runs out
    async fn wait_until(&mut self, budget: Duration, target: WaitFor<'_>) -> Result<bool> {
        let deadline = Instant::now() + budget;
        let slice = self.settings.timeouts.poll_slice();

        loop {
            if self.target_reached(&target) {
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            self.read_slice(remaining.min(slice)).await?;
        }
    }

    fn target_reached(&self, target: &WaitFor<'_>) -> bool {
        match target {
            WaitFor::Prompt { since } => self
                .detector
                .is_prompt(&clean_text(self.buffer.text_since(*since))),
            WaitFor::Pattern { regex, since } => {
                regex.is_match(&clean_text(self.buffer.text_since(*since)))
            }
        }
    }

    /// One readiness wait plus drain; returns the number of new text bytes
    async fn read_slice(&mut self, wait: Duration) -> Result<usize> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.connection_lost());
        };

        let readiness = transport.poll(wait).await;
        match readiness {
            Ok(Readiness::Idle) => Ok(0),
            Ok(Readiness::Readable) => {
                let bytes = match transport.read_available() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        debug!("Session '{}' read failed: {}", self.name, e);
                        return Err(self.connection_lost());
                    }
                };
                let closed = transport.is_closed();
                let received = self.ingest(&bytes);
                if closed && bytes.is_empty() {
                    return Err(self.connection_lost());
                }
                Ok(received)
            }
            Ok(Readiness::Closed) => Err(self.connection_lost()),
            Err(e) => {
                debug!("Session '{}' poll failed: {}", self.name, e);
                Err(self.connection_lost())
            }
        }
    }

    /// Keep draining while data is immediately available
    ///
    /// Stops after one poll slice or one buffer's worth of text, whichever
    /// comes first, so a server that never goes quiet cannot hold the
    /// caller.
    async fn drain_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.settings.timeouts.poll_slice();
        let limit = self.settings.max_buffer_bytes;
        let mut drained = 0;
        let mut quiet = false;
        while drained < limit && Instant::now() < deadline {
            let received = self.read_slice(DRAIN_WAIT).await?;
            if received == 0 {
                quiet = true;
                break;
            }
            drained += received;
        }
        if !quiet {
            debug!(
                "Session '{}' drain stopped with output still arriving ({} bytes)",
                self.name, drained
            );
        }
        Ok(())
    }

    /// Drain, treating a dropped connection as "nothing more to read"
    async fn drain_tolerant(&mut self) -> Result<()> {
        match self.drain_ready().await {
            Ok(()) | Err(Error::ConnectionLost { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn finish_read(&mut self) -> Response {
        let raw = self.buffer.take();
        let detected = self.detector.is_prompt(&clean_text(&raw));
        self.flush_fires().await;
        self.publish();
        Response::new(raw, detected)
    }

    /// Decode, buffer and scan freshly received bytes
    fn ingest(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        if let Some(log) = &self.io_log {
            log.received(&self.name, bytes);
        }

        let text = self.decoder.decode(bytes);
        self.buffer.push(&text);
        self.scan_triggers();
        text.len()
    }

    fn scan_triggers(&mut self) {
        if self.triggers.is_empty() {
            self.buffer.mark_scanned();
            return;
        }
        let fresh = clean_text(self.buffer.unscanned());
        self.buffer.mark_scanned();
        let fired = self.triggers.scan(&fresh, Instant::now());
        self.pending_fires.extend(fired);
    }

    /// Send queued trigger commands
    async fn flush_fires(&mut self) {
        if self.pending_fires.is_empty() {
            return;
        }
        let fires = std::mem::take(&mut self.pending_fires);
        for command in fires {
            if let Err(e) = self.write_line(&command).await {
                warn!("Session '{}' trigger command '{}' not sent: {}", self.name, command, e);
                break;
            }
        }
    }

    async fn write_line(&mut self, text: &str) -> Result<()> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write(line.as_bytes()).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.connection_lost());
        };
        let written = transport.write(bytes).await;
        if let Err(e) = written {
            debug!("Session '{}' write failed: {}", self.name, e);
            return Err(self.connection_lost());
        }
        if let Some(log) = &self.io_log {
            log.sent(&self.name, bytes);
        }
        Ok(())
    }

    /// Tear down after the server went away and build the error to return
    fn connection_lost(&mut self) -> Error {
        self.mark_lost();
        Error::ConnectionLost {
            session: self.name.clone(),
        }
    }

    /// Tear down after the server went away; buffered output is kept
    fn mark_lost(&mut self) {
        let tail = self.decoder.finish();
        if !tail.is_empty() {
            self.buffer.push(&tail);
        }
        if self.transport.take().is_some() {
            warn!("Session '{}' lost its connection", self.name);
        }
        self.pending_fires.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.decoder = TextDecoder::new();
        self.pending_fires.clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("address", &self.config.address())
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
