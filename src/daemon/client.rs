//! Client stub for the daemon's control socket

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::config::Config;
use crate::daemon::protocol::{decode_reply, encode_line, Reply, Request};
use crate::error::{Error, Result};
use crate::models::Response;
use crate::session::SessionStatus;

/// Talks to a running daemon, one connection per request
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.daemon.socket_path.clone())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and return the daemon's reply as is
    pub async fn request(&self, request: &Request) -> Result<Reply> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| {
                debug!("Connect to {:?} failed: {}", self.socket_path, e);
                Error::DaemonNotRunning {
                    socket: self.socket_path.clone(),
                }
            })?;
        let (reader, mut writer) = stream.into_split();

        writer.write_all(encode_line(request)?.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::protocol("daemon closed the connection without replying"));
        }
        decode_reply(&line)
    }

    /// Like [`DaemonClient::request`], with error replies turned into errors
    pub async fn call(&self, request: &Request) -> Result<Reply> {
        self.request(request).await?.into_result()
    }

    /// Whether a daemon answers on the socket
    pub async fn is_running(&self) -> bool {
        matches!(self.request(&Request::Ping).await, Ok(Reply::Pong { .. }))
    }

    pub async fn send(&self, session: &str, text: &str, fast: bool) -> Result<Response> {
        let request = Request::Send {
            session: session.to_string(),
            text: text.to_string(),
            fast,
            timeout_ms: None,
        };
        expect_response(self.call(&request).await?)
    }

    pub async fn read(&self, session: &str) -> Result<Response> {
        let request = Request::Read {
            session: session.to_string(),
        };
        expect_response(self.call(&request).await?)
    }

    pub async fn peek(&self, session: &str, wait_ms: Option<u64>) -> Result<Response> {
        let request = Request::Peek {
            session: session.to_string(),
            wait_ms,
        };
        expect_response(self.call(&request).await?)
    }

    pub async fn status(&self, session: Option<&str>) -> Result<Vec<SessionStatus>> {
        let request = Request::Status {
            session: session.map(str::to_string),
        };
        match self.call(&request).await? {
            Reply::Status { sessions } => Ok(sessions),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the daemon to shut down
    pub async fn stop(&self) -> Result<()> {
        self.call(&Request::Stop).await.map(|_| ())
    }
}

fn expect_response(reply: Reply) -> Result<Response> {
    match reply {
        Reply::Response { response, .. } => Ok(response),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(reply: &Reply) -> Error {
    Error::protocol(format!("unexpected reply: {:?}", reply))
}
