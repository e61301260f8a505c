//! Unix socket server for the daemon process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::Config;
use crate::daemon::handler::RequestHandler;
use crate::daemon::protocol::{decode_request, encode_line, Reply, Request, MAX_REQUEST_BYTES};
use crate::daemon::registry::SessionRegistry;
use crate::error::{Error, Result};

/// How long in-flight connections get to finish after shutdown starts
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The daemon: owns the registry and serves the control socket
pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    handler: RequestHandler,
    connection_semaphore: Arc<Semaphore>,
    max_connections: usize,
    shutdown: Arc<Notify>,
}

impl DaemonServer {
    /// Bind the control socket and write the PID file
    ///
    /// An existing socket is only replaced when the PID file shows its
    /// daemon is gone, and never when it is a symlink or not a socket.
    pub async fn bind(config: &Config) -> Result<Self> {
        let socket_path = config.daemon.socket_path.clone();
        let pid_path = config.daemon.pid_path.clone();

        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let listener = match UnixListener::bind(&socket_path) {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if let Some(pid) = running_daemon_pid(&pid_path) {
                    return Err(Error::DaemonAlreadyRunning { pid });
                }
                remove_stale_socket(&socket_path)?;
                UnixListener::bind(&socket_path)?
            }
            Err(e) => return Err(e.into()),
        };
        write_pid(&pid_path)?;
        restrict_permissions(&socket_path)?;

        info!("Daemon listening on {:?} (pid {})", socket_path, std::process::id());

        let registry = Arc::new(SessionRegistry::new(config));
        Ok(Self {
            listener,
            socket_path,
            pid_path,
            handler: RequestHandler::new(registry, config.timeouts.clone()),
            connection_semaphore: Arc::new(Semaphore::new(config.daemon.max_connections)),
            max_connections: config.daemon.max_connections,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.handler.registry()
    }

    /// Handle for requesting shutdown from outside the accept loop
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Accept connections until a stop request or shutdown signal
    ///
    /// On the way out every session is disconnected and in-flight
    /// connections get a bounded grace period.
    pub async fn run(&self) -> Result<()> {
        let mut connection_tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "Connection limit ({}) reached, rejecting new connection",
                                        self.max_connections
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            let handler = self.handler.clone();
                            let shutdown = self.shutdown.clone();
                            connection_tasks.spawn(async move {
                                let _permit = permit;
                                handle_connection(stream, handler, shutdown).await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(joined) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Connection handler panicked: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.registry().close_all().await;

        if !connection_tasks.is_empty() {
            info!(
                "Waiting for {} in-flight connection(s) to complete",
                connection_tasks.len()
            );
            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        info!("Daemon stopped");
        Ok(())
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
        if read_pid(&self.pid_path) == Some(std::process::id() as i32) {
            let _ = std::fs::remove_file(&self.pid_path);
        }
    }
}

/// Request shutdown on SIGINT or SIGTERM
pub async fn shutdown_on_signals(shutdown: Arc<Notify>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not install SIGTERM handler: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT");
                shutdown.notify_one();
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    shutdown.notify_one();
}

/// Serve one client connection: one reply line per request line
async fn handle_connection(stream: UnixStream, handler: RequestHandler, shutdown: Arc<Notify>) {
    let conn_id = Uuid::new_v4().simple().to_string();
    let conn_id = &conn_id[..8];
    debug!("[{}] client connected", conn_id);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let (reply, stop) = match read_line_bounded(&mut reader, MAX_REQUEST_BYTES).await {
            Ok(None) => break,
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode_request(&line) {
                Ok(request) => {
                    let stop = matches!(request, Request::Stop);
                    (handler.handle(request).await, stop)
                }
                Err(e) => {
                    warn!("[{}] {}", conn_id, e);
                    (Reply::from(e), false)
                }
            },
            Err(e) => {
                warn!("[{}] {}", conn_id, e);
                let reply = Reply::from(e);
                let _ = write_reply(&mut writer, &reply).await;
                break;
            }
        };

        if let Err(e) = write_reply(&mut writer, &reply).await {
            debug!("[{}] reply not delivered: {}", conn_id, e);
            break;
        }
        if stop {
            info!("[{}] stop requested", conn_id);
            shutdown.notify_one();
            break;
        }
    }

    debug!("[{}] client disconnected", conn_id);
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> Result<()> {
    let line = encode_line(reply)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-terminated line of at most `max_size` bytes
///
/// Returns `None` at end of stream.
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<String>> {
    let mut bytes = Vec::new();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let to_consume = newline_pos.map(|p| p + 1).unwrap_or(available.len());
        if bytes.len() + to_consume > max_size {
            return Err(Error::protocol(format!(
                "request exceeds {} bytes",
                max_size
            )));
        }

        bytes.extend_from_slice(&available[..to_consume]);
        reader.consume(to_consume);
        if newline_pos.is_some() {
            break;
        }
    }

    if bytes.is_empty() {
        return Ok(None);
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| Error::protocol("request is not valid UTF-8"))
}

fn read_pid(pid_path: &Path) -> Option<i32> {
    std::fs::read_to_string(pid_path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// PID of a live daemon according to the PID file
pub fn running_daemon_pid(pid_path: &Path) -> Option<i32> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let pid = read_pid(pid_path)?;
    if pid <= 0 {
        return None;
    }
    kill(Pid::from_raw(pid), None).ok().map(|_| pid)
}

fn write_pid(pid_path: &Path) -> Result<()> {
    std::fs::write(pid_path, std::process::id().to_string())?;
    Ok(())
}

fn remove_stale_socket(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = std::fs::symlink_metadata(socket_path)?;
    if metadata.file_type().is_symlink() {
        return Err(refuse(format!(
            "socket path {:?} is a symlink, refusing to remove it",
            socket_path
        )));
    }
    if !metadata.file_type().is_socket() {
        return Err(refuse(format!(
            "{:?} exists and is not a socket",
            socket_path
        )));
    }

    info!("Removing stale socket {:?}", socket_path);
    std::fs::remove_file(socket_path)?;
    Ok(())
}

fn refuse(reason: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::AlreadyExists, reason))
}

fn restrict_permissions(socket_path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
