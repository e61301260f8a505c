//! Scripted MUD server
//!
//! A TCP listener on an ephemeral local port. Every connection gets the
//! banner, then each line the client sends is recorded and answered by the
//! responder.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// How the server answers one line
#[derive(Debug, Clone)]
pub enum MudReply {
    Send(Vec<u8>),
    Silent,
    /// Send these bytes, then hang up
    Close(Vec<u8>),
}

impl MudReply {
    pub fn text(text: &str) -> Self {
        MudReply::Send(text.as_bytes().to_vec())
    }
}

type Responder = Arc<dyn Fn(&str) -> MudReply + Send + Sync>;
type Received = Arc<Mutex<Vec<String>>>;

/// Decrements the open-connection count when a connection task ends
struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Running mock server; stops accepting when dropped
pub struct MockMud {
    port: u16,
    received: Received,
    connections: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockMud {
    pub async fn start<F>(banner: &[u8], responder: F) -> Self
    where
        F: Fn(&str) -> MudReply + Send + Sync + 'static,
    {
        let responder: Responder = Arc::new(responder);
        let banner = banner.to_vec();

        Self::listen(move |stream, received| {
            let responder = responder.clone();
            let banner = banner.clone();
            async move {
                let (reader, mut writer) = stream.into_split();
                if !banner.is_empty() && writer.write_all(&banner).await.is_err() {
                    return;
                }
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim_end_matches('\r').to_string();
                    received.lock().unwrap().push(line.clone());
                    match responder(&line) {
                        MudReply::Send(bytes) => {
                            if writer.write_all(&bytes).await.is_err() {
                                return;
                            }
                        }
                        MudReply::Silent => {}
                        MudReply::Close(bytes) => {
                            let _ = writer.write_all(&bytes).await;
                            let _ = writer.shutdown().await;
                            return;
                        }
                    }
                }
            }
        })
        .await
    }

    /// Server that writes `chunk` over and over until the client goes away
    pub async fn flood(chunk: &[u8]) -> Self {
        let chunk = chunk.to_vec();
        Self::listen(move |stream, received| {
            let chunk = chunk.clone();
            async move {
                let (reader, mut writer) = stream.into_split();
                let recorder = tokio::spawn(record_lines(reader, received));
                while writer.write_all(&chunk).await.is_ok() {}
                recorder.abort();
            }
        })
        .await
    }

    /// Server that greets and then never answers
    pub async fn silent(banner: &[u8]) -> Self {
        Self::start(banner, |_| MudReply::Silent).await
    }

    /// Server that answers every line with `You say 'LINE'` and a prompt
    pub async fn echo() -> Self {
        Self::start(b"Welcome!\n> ", |line| {
            MudReply::text(&format!("You say '{}'\n> ", line))
        })
        .await
    }

    async fn listen<F, Fut>(serve: F) -> Self
    where
        F: Fn(TcpStream, Received) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = received.clone();
            let connections = connections.clone();
            let open = open.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    open.fetch_add(1, Ordering::SeqCst);
                    let guard = OpenGuard(open.clone());
                    let connection = serve(stream, received.clone());
                    tokio::spawn(async move {
                        let _guard = guard;
                        connection.await;
                    });
                }
            })
        };

        Self {
            port,
            received,
            connections,
            open,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Lines received so far, across all connections
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections whose client has not hung up yet
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Poll until `count` connections are open or `timeout` passes
    pub async fn wait_for_open(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.open_connections() == count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until `line` has been received or `timeout` passes
    pub async fn wait_for_line(&self, line: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.received().iter().any(|l| l == line) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn record_lines(reader: OwnedReadHalf, received: Received) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        received
            .lock()
            .unwrap()
            .push(line.trim_end_matches('\r').to_string());
    }
}

impl Drop for MockMud {
    fn drop(&mut self) {
        self.task.abort();
    }
}
