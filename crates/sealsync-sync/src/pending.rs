//! In-flight file operations
//!
//! One entry per path while its pipeline runs. A second event for the same
//! path inside the duplicate window is dropped; watchers commonly report a
//! single save as several events. Entries are removed when their guard is
//! dropped, and a periodic sweep clears anything left behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Table of paths with a pipeline in flight
#[derive(Debug)]
pub struct PendingOperations {
    entries: Mutex<HashMap<PathBuf, Instant>>,
    duplicate_window: Duration,
    stale_after: Duration,
}

/// Keeps a path's entry alive; removes it on drop
#[derive(Debug)]
pub struct PendingGuard {
    table: Arc<PendingOperations>,
    path: PathBuf,
    started: Instant,
}

impl PendingOperations {
    #[must_use]
    pub fn new(duplicate_window: Duration, stale_after: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            duplicate_window,
            stale_after,
        }
    }

    /// Record `path` as in flight unless it was recorded within the window
    ///
    /// Returns `None` for a duplicate.
    pub fn try_begin(self: &Arc<Self>, path: &Path) -> Option<PendingGuard> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(started) = entries.get(path) {
            if now.duration_since(*started) < self.duplicate_window {
                debug!(path = %path.display(), "Skipping duplicate event");
                return None;
            }
        }

        entries.insert(path.to_path_buf(), now);
        Some(PendingGuard {
            table: Arc::clone(self),
            path: path.to_path_buf(),
            started: now,
        })
    }

    /// Whether `path` has an entry
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries older than the staleness window, returning how many
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, started| now.duration_since(*started) < self.stale_after);
        before - entries.len()
    }

    /// Sweep every `interval` until cancelled
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        info!(removed, "Cleared stale pending operations");
                    }
                }
            }
        }
    }

    fn finish(&self, path: &Path, started: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer operation on the same path owns the entry now
        if entries.get(path) == Some(&started) {
            entries.remove(path);
        }
    }
}

impl PendingGuard {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.finish(&self.path, self.started);
    }
}
