//! TCP Transport
//!
//! Owns the socket to one game server. Readiness waits go through tokio's
//! reactor (`TcpStream::readable`), so a session sleeping on a quiet server
//! costs nothing and wakes as soon as bytes land. Reads never block: once
//! the socket is readable, [`Transport::read_available`] takes what the
//! kernel has buffered, up to [`MAX_READ_BYTES`] per call.

use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Bytes requested from the socket per `try_read`
pub const READ_CHUNK_SIZE: usize = 4096;

/// Upper bound on the bytes returned by one [`Transport::read_available`]
pub const MAX_READ_BYTES: usize = 64 * READ_CHUNK_SIZE;

/// Outcome of waiting on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Data (or EOF) is ready to be read
    Readable,
    /// Nothing arrived within the wait
    Idle,
    /// The peer closed the connection
    Closed,
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
    /// Number of reads that returned data
    pub reads: u64,
    /// Number of writes
    pub writes: u64,
}

/// A connected TCP socket to one server
#[derive(Debug)]
pub struct Transport {
    stream: Option<TcpStream>,
    peer: String,
    closed: bool,
    stats: TransportStats,
}

impl Transport {
    /// Connect with a bounded wait
    pub async fn open(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let connect_failed = |reason: String| Error::ConnectFailed {
            host: host.to_string(),
            port,
            reason,
        };

        let stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_failed(e.to_string())),
            Err(_) => {
                return Err(connect_failed(format!(
                    "timed out after {}ms",
                    connect_timeout.as_millis()
                )))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}:{}: {}", host, port, e);
        }

        Ok(Self {
            stream: Some(stream),
            peer: format!("{}:{}", host, port),
            closed: false,
            stats: TransportStats::default(),
        })
    }

    /// Write all bytes; any failure marks the transport closed
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let stream = self.stream_mut()?;
        let written = stream.write_all(data).await;
        if let Err(e) = written {
            self.closed = true;
            return Err(e);
        }
        self.stats.bytes_written += data.len() as u64;
        self.stats.writes += 1;
        Ok(())
    }

    /// Wait up to `wait` for the socket to become readable
    pub async fn poll(&mut self, wait: Duration) -> io::Result<Readiness> {
        if self.closed {
            return Ok(Readiness::Closed);
        }
        let stream = self.stream_mut()?;
        let ready = timeout(wait, stream.readable()).await;
        match ready {
            Ok(Ok(())) => Ok(Readiness::Readable),
            Ok(Err(e)) => {
                self.closed = true;
                Err(e)
            }
            Err(_) => Ok(Readiness::Idle),
        }
    }

    /// Take what the kernel has buffered without blocking
    ///
    /// Stops at [`MAX_READ_BYTES`]; anything beyond stays queued for the
    /// next call. A zero-byte read or a reset marks the transport closed;
    /// bytes read before that are still returned.
    pub fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut buf = [0u8; READ_CHUNK_SIZE];

        let Some(stream) = self.stream.as_ref() else {
            return Ok(data);
        };

        while data.len() < MAX_READ_BYTES {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    debug!("Server {} closed the connection", self.peer);
                    self.closed = true;
                    break;
                }
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.closed = true;
                    if data.is_empty() {
                        return Err(e);
                    }
                    debug!("Read error on {} after {} bytes: {}", self.peer, data.len(), e);
                    break;
                }
            }
        }

        if !data.is_empty() {
            self.stats.bytes_read += data.len() as u64;
            self.stats.reads += 1;
        }
        Ok(data)
    }

    /// Whether the peer has gone away
    pub fn is_closed(&self) -> bool {
        self.closed || self.stream.is_none()
    }

    /// Shut down and drop the socket
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.peer, e);
            }
        }
        self.closed = true;
    }

    /// `host:port` this transport connected to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    fn stream_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport is closed"))
    }
}
