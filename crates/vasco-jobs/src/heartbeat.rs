//! Per-chunk liveness marker.
//!
//! The marker's modification time is the signal; its JSON body is for humans.
//! It is diagnostic only: ownership of a chunk is decided by the chunk lock.
//!
//! A guard started with [`HeartbeatGuard::with_refresh`] keeps the marker
//! fresh from a background task for as long as it lives, so long steps
//! outside polling (submission, backoff, download, synchronous fallback) do
//! not make a live chunk look abandoned.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use vasco_core::{ChunkUnit, Result};

use crate::store::write_atomic;

/// Diagnostic content of a heartbeat file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Scoped heartbeat; the marker is removed when the guard drops.
#[derive(Debug)]
pub struct HeartbeatGuard {
    path: PathBuf,
    record: HeartbeatRecord,
    refresher: Option<JoinHandle<()>>,
}

impl HeartbeatGuard {
    /// Create the marker for `chunk`.
    pub fn start(chunk: &ChunkUnit) -> Result<Self> {
        let guard = Self {
            path: chunk.heartbeat_path(),
            record: HeartbeatRecord {
                pid: std::process::id(),
                started_at: Utc::now(),
            },
            refresher: None,
        };
        guard.write()?;
        debug!(chunk_id = chunk.chunk_id(), "Heartbeat started");
        Ok(guard)
    }

    /// Refresh the marker every `every` until the guard drops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_refresh(mut self, every: Duration) -> Self {
        if every.is_zero() {
            return self;
        }
        if let Some(previous) = self.refresher.take() {
            previous.abort();
        }
        let path = self.path.clone();
        self.refresher = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                // Only the guard creates the marker.
                if let Err(e) = refresh_mtime(&path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "Failed to refresh heartbeat");
                    }
                } else {
                    trace!(path = %path.display(), "Heartbeat refreshed in background");
                }
            }
        }));
        self
    }

    /// Refresh the marker's modification time, recreating it if it vanished.
    pub fn touch(&self) -> Result<()> {
        match refresh_mtime(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.write()?,
            Err(e) => return Err(e.into()),
        }
        trace!(path = %self.path.display(), "Heartbeat refreshed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec(&self.record)?)
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
        match fs::remove_file(&self.path) {
            Ok(()) => trace!(path = %self.path.display(), "Heartbeat removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove heartbeat"),
        }
    }
}

/// Time since the marker at `path` was last refreshed; `None` when absent.
pub fn heartbeat_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

fn refresh_mtime(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}
