//! Debounced bulk reconciliation
//!
//! A trigger schedules one whole-tree sync for a direction after a quiet
//! period. While that run is pending or in flight, further triggers for the
//! same direction are coalesced into it: the run reads the tree when it
//! fires, so it already covers the later changes.
//!
//! Each run is retried with the shared backoff policy and verified by
//! listing the destination. An empty destination is accepted; only listing
//! failures count against the run.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use sealsync_core::domain::{RemotePath, SyncDirection, SyncPath};
use sealsync_core::ports::{IRemoteStorage, ListOptions, StorageError, StorageLocation};

use crate::backoff::RetryPolicy;
use crate::{SyncError, ENC_SUFFIX, SYNCLOCK_SUFFIX};

/// Result of [`BatchReconciler::trigger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new run was scheduled
    Scheduled,
    /// A run for this direction was already pending or running
    Coalesced,
}

/// Tunables for [`BatchReconciler`]
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub debounce: Duration,
    pub retry: RetryPolicy,
    /// Patterns excluded from both directions
    pub excludes: Vec<String>,
    /// Recursion cap when listing the remote after a sync
    pub verify_max_depth: u32,
}

/// Exclusions shared by both directions: lock markers and the lock directory
#[must_use]
pub fn default_excludes(lock_dir: &Path, extra: &[String]) -> Vec<String> {
    let mut excludes = vec![
        format!("*{SYNCLOCK_SUFFIX}"),
        ".synclocks/**".to_string(),
    ];
    if let Some(name) = lock_dir.file_name().map(|n| n.to_string_lossy()) {
        let pattern = format!("{name}/**");
        if !excludes.contains(&pattern) {
            excludes.push(pattern);
        }
    }
    for pattern in extra {
        if !excludes.contains(pattern) {
            excludes.push(pattern.clone());
        }
    }
    excludes
}

/// Marks a direction busy; clears it on drop
struct ActiveRun {
    active: Arc<Mutex<HashSet<SyncDirection>>>,
    direction: SyncDirection,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.direction);
    }
}

/// Owns the per-direction "sync running" flags
pub struct BatchReconciler {
    local_root: SyncPath,
    remote_root: RemotePath,
    storage: Arc<dyn IRemoteStorage>,
    settings: ReconcilerSettings,
    active: Arc<Mutex<HashSet<SyncDirection>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl BatchReconciler {
    #[must_use]
    pub fn new(
        local_root: SyncPath,
        remote_root: RemotePath,
        storage: Arc<dyn IRemoteStorage>,
        settings: ReconcilerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            local_root,
            remote_root,
            storage,
            settings,
            active: Arc::new(Mutex::new(HashSet::new())),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Whether a run for `direction` is pending or in flight
    #[must_use]
    pub fn is_active(&self, direction: SyncDirection) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&direction)
    }

    /// Schedule a debounced run unless one is already pending or running
    pub fn trigger(self: &Arc<Self>, direction: SyncDirection) -> TriggerOutcome {
        let Some(active_run) = self.claim(direction) else {
            debug!(%direction, "Sync already scheduled, coalescing trigger");
            return TriggerOutcome::Coalesced;
        };

        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            let _active_run = active_run;
            tokio::select! {
                _ = this.cancel.cancelled() => return,
                _ = tokio::time::sleep(this.settings.debounce) => {}
            }

            info!(%direction, "Debounced sync starting");
            match this.run(direction).await {
                Ok(files) => info!(%direction, files, "Sync completed"),
                Err(e) => error!(%direction, error = %e, "Sync failed"),
            }
        });

        debug!(%direction, debounce = ?self.settings.debounce, "Sync scheduled");
        TriggerOutcome::Scheduled
    }

    /// Run a sync immediately, without debounce
    ///
    /// Returns `Ok(None)` when a run for this direction is already pending
    /// or in flight.
    ///
    /// # Errors
    /// Returns the last error once all attempts are exhausted.
    pub async fn run_now(&self, direction: SyncDirection) -> Result<Option<usize>, SyncError> {
        let Some(_active_run) = self.claim(direction) else {
            debug!(%direction, "Sync already running, skipping immediate run");
            return Ok(None);
        };
        self.run(direction).await.map(Some)
    }

    /// Wait for scheduled runs to finish
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Exclusions passed to the transfer for `direction`
    ///
    /// Local→remote runs exclude `*.enc`, so they mirror the plaintext files
    /// next to the encrypted artifacts the pipeline uploads and never delete
    /// those artifacts. Removed files lose their artifact through the upload
    /// pipeline instead.
    #[must_use]
    pub fn excludes_for(&self, direction: SyncDirection) -> Vec<String> {
        let mut excludes = self.settings.excludes.clone();
        if direction == SyncDirection::LocalToRemote {
            excludes.push(format!("*{ENC_SUFFIX}"));
        }
        excludes
    }

    fn claim(&self, direction: SyncDirection) -> Option<ActiveRun> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(direction) {
            return None;
        }
        Some(ActiveRun {
            active: Arc::clone(&self.active),
            direction,
        })
    }

    /// Sync then verify, with retries; returns the destination file count
    #[tracing::instrument(skip(self), fields(root = %self.local_root, remote = %self.remote_root))]
    async fn run(&self, direction: SyncDirection) -> Result<usize, SyncError> {
        let excludes = self.excludes_for(direction);
        let excludes = &excludes;

        self.settings
            .retry
            .run("bulk sync", &self.cancel, |attempt| async move {
                let output = self
                    .storage
                    .bulk_sync(
                        direction,
                        self.local_root.as_path(),
                        &self.remote_root,
                        excludes,
                    )
                    .await?;
                debug!(
                    attempt,
                    stdout = %output.stdout.trim(),
                    stderr = %output.stderr.trim(),
                    "Bulk sync output"
                );
                self.verify(direction).await
            })
            .await
    }

    async fn verify(&self, direction: SyncDirection) -> Result<usize, SyncError> {
        let (target, options) = match direction {
            SyncDirection::LocalToRemote => (
                StorageLocation::Remote(self.remote_root.clone()),
                ListOptions::recursive(Some(self.settings.verify_max_depth)),
            ),
            SyncDirection::RemoteToLocal => (
                StorageLocation::Local(self.local_root.as_path().to_path_buf()),
                ListOptions::recursive(None),
            ),
        };

        match self.storage.list_files(&target, options).await {
            Ok(files) => {
                if files.is_empty() {
                    info!(%target, "Destination is empty, accepting as first sync");
                }
                Ok(files.len())
            }
            Err(StorageError::NotFound(detail)) => {
                info!(%target, %detail, "Destination not found, accepting as first sync");
                Ok(0)
            }
            Err(e) => Err(SyncError::Verification(format!(
                "listing {target} failed: {e}"
            ))),
        }
    }
}
