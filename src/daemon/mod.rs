//! Daemon
//!
//! The long-lived process that owns every session, and the client stub that
//! short-lived invocations use to reach it.

pub mod client;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;

pub use client::DaemonClient;
pub use handler::RequestHandler;
pub use protocol::{BatchFailure, BatchItem, Reply, Request};
pub use registry::{ConnectOutcome, SessionRegistry, SharedSession};
pub use server::{running_daemon_pid, shutdown_on_signals, DaemonServer};
