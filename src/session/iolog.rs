//! Raw I/O log
//!
//! Appends every byte a session sends or receives to a text file, with a
//! timestamped header per block. The file is opened on the first block and
//! kept open; after a failed write it is reopened on the next one. Logging
//! is best effort: a failed write is reported at debug level and otherwise
//! ignored.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Direction of a logged block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Sent => "SEND",
            Direction::Received => "RECV",
        }
    }
}

/// Append-only session I/O log
#[derive(Debug)]
pub struct IoLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl IoLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sent(&self, session: &str, bytes: &[u8]) {
        self.record(session, Direction::Sent, bytes);
    }

    pub fn received(&self, session: &str, bytes: &[u8]) {
        self.record(session, Direction::Received, bytes);
    }

    fn record(&self, session: &str, direction: Direction, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Err(e) = self.append(session, direction, bytes) {
            debug!("I/O log write to {} failed: {}", self.path.display(), e);
        }
    }

    fn append(&self, session: &str, direction: Direction, bytes: &[u8]) -> std::io::Result<()> {
        let mut slot = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = match slot.take() {
            Some(file) => file,
            None => OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?,
        };
        let written = Self::write_block(&mut file, session, direction, bytes);
        if written.is_ok() {
            *slot = Some(file);
        }
        written
    }

    fn write_block(file: &mut File, session: &str, direction: Direction, bytes: &[u8]) -> std::io::Result<()> {
        let header = format!(
            "--- {} [{}] {} {} bytes ---\n",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            session,
            direction.label(),
            bytes.len()
        );
        file.write_all(header.as_bytes())?;
        file.write_all(bytes)?;
        if !bytes.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
        Ok(())
    }
}
