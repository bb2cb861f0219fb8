//! Marker-file lock manager
//!
//! A lock on a path is a file in the lock directory named after a truncated
//! SHA-256 of the lexically cleaned path. Creation is exclusive, so any
//! process sharing the lock directory sees the claim. A marker older than
//! the staleness window is treated as abandoned and reclaimed; reclaims of
//! one marker are serialized through an exclusive `.reclaim` guard file.
//!
//! ```text
//! <lock dir>/
//!   3f9a0c1d2e4b5a69.lock           ← "2024-05-01T10:00:00+00:00"
//!   3f9a0c1d2e4b5a69.lock.reclaim   ← present only during a reclaim
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sealsync_core::config::LockConfig;
use sealsync_core::domain::SyncPath;

use crate::SyncError;

/// Marker file extension
const MARKER_EXT: &str = ".lock";

/// Suffix of the file serializing reclaims of one marker
const RECLAIM_EXT: &str = ".reclaim";

/// Hash bytes kept in a marker name
const MARKER_HASH_BYTES: usize = 8;

/// Lock manager owning one lock directory
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    stale_after: Duration,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl LockManager {
    /// Create a manager for `dir` with the given staleness window
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
            poll_interval: Duration::from_millis(500),
            wait_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(config.dir.clone(), config.stale_after())
            .with_wait(config.poll_interval(), config.wait_timeout())
    }

    /// Set the polling cadence used by [`acquire_with_timeout`](Self::acquire_with_timeout)
    #[must_use]
    pub fn with_wait(mut self, poll_interval: Duration, wait_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.wait_timeout = wait_timeout;
        self
    }

    /// Lock directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Marker file for `path`
    #[must_use]
    pub fn marker_path(&self, path: &Path) -> PathBuf {
        self.dir.join(marker_name(path))
    }

    /// Try to take the lock on `path` once
    ///
    /// Returns `Ok(false)` when another holder owns a fresh marker. A stale
    /// marker is replaced by whichever caller first takes its reclaim guard.
    ///
    /// # Errors
    /// Returns an error for I/O failures other than the marker existing.
    pub async fn acquire(&self, path: &Path) -> Result<bool, SyncError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let marker = self.marker_path(path);

        if try_create(&marker, path).await? {
            return Ok(true);
        }

        let age = match marker_age(&marker).await {
            Ok(age) => age,
            // Released between our create and our read
            Err(e) if e.kind() == ErrorKind::NotFound => return try_create(&marker, path).await,
            Err(e) => return Err(e.into()),
        };
        if age <= self.stale_after {
            return Ok(false);
        }

        self.reclaim(path, &marker).await
    }

    /// Replace a stale marker while holding `<marker>.reclaim`
    ///
    /// The marker is deleted only by its holder or by the guard holder after
    /// re-reading its age, so two reclaimers never both win.
    async fn reclaim(&self, path: &Path, marker: &Path) -> Result<bool, SyncError> {
        let guard = reclaim_guard_path(marker);
        match create_marker(&guard).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                self.clear_abandoned_guard(&guard).await?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let result = self.replace_stale(path, marker).await;

        match tokio::fs::remove_file(&guard).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(guard = %guard.display(), error = %e, "Failed to remove reclaim guard"),
        }
        result
    }

    async fn replace_stale(&self, path: &Path, marker: &Path) -> Result<bool, SyncError> {
        match marker_age(marker).await {
            Ok(age) if age <= self.stale_after => return Ok(false),
            Ok(age) => {
                info!(
                    path = %path.display(),
                    age_secs = age.as_secs(),
                    "Reclaiming stale lock"
                );
                match tokio::fs::remove_file(marker).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        try_create(marker, path).await
    }

    /// A guard outlives its reclaim only when the reclaimer died mid-way
    async fn clear_abandoned_guard(&self, guard: &Path) -> Result<(), SyncError> {
        match marker_age(guard).await {
            Ok(age) if age > self.stale_after => {
                warn!(guard = %guard.display(), age_secs = age.as_secs(), "Removing abandoned reclaim guard");
                match tokio::fs::remove_file(guard).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock on `path`
    ///
    /// # Errors
    /// Returns `SyncError::LockNotHeld` when no marker exists.
    pub async fn release(&self, path: &Path) -> Result<(), SyncError> {
        let marker = self.marker_path(path);
        match tokio::fs::remove_file(&marker).await {
            Ok(()) => {
                debug!(path = %path.display(), "Lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SyncError::LockNotHeld(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll [`acquire`](Self::acquire) until it succeeds or the wait limit passes
    ///
    /// # Errors
    /// Returns `SyncError::LockTimeout` after the wait limit,
    /// `SyncError::Cancelled` on shutdown, or any acquisition I/O error.
    pub async fn acquire_with_timeout(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let started = tokio::time::Instant::now();
        loop {
            if self.acquire(path).await? {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= self.wait_timeout {
                warn!(path = %path.display(), ?waited, "Lock wait timed out");
                return Err(SyncError::LockTimeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

fn reclaim_guard_path(marker: &Path) -> PathBuf {
    let mut name = marker.as_os_str().to_os_string();
    name.push(RECLAIM_EXT);
    PathBuf::from(name)
}

/// `sha256(clean(path))[..8]` as hex, plus `.lock`
fn marker_name(path: &Path) -> String {
    let cleaned = SyncPath::new(path.to_path_buf())
        .map(SyncPath::into_path_buf)
        .unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(cleaned.to_string_lossy().as_bytes());
    let mut name: String = digest[..MARKER_HASH_BYTES]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    name.push_str(MARKER_EXT);
    name
}

/// Exclusive create of `marker`; `Ok(false)` when it already exists
async fn try_create(marker: &Path, path: &Path) -> Result<bool, SyncError> {
    match create_marker(marker).await {
        Ok(()) => {
            debug!(path = %path.display(), marker = %marker.display(), "Lock acquired");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn create_marker(marker: &Path) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(marker)
        .await?;
    file.write_all(Utc::now().to_rfc3339().as_bytes()).await?;
    file.flush().await
}

/// Age from the timestamp inside the marker, else from its mtime
async fn marker_age(marker: &Path) -> std::io::Result<Duration> {
    let content = tokio::fs::read_to_string(marker).await?;
    if let Ok(stamp) = DateTime::parse_from_rfc3339(content.trim()) {
        let age = Utc::now().signed_duration_since(stamp.with_timezone(&Utc));
        return Ok(age.to_std().unwrap_or(Duration::ZERO));
    }

    let modified = tokio::fs::metadata(marker).await?.modified()?;
    Ok(modified.elapsed().unwrap_or(Duration::ZERO))
}
