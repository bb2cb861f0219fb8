//! Priority watch scheduler
//!
//! Directories are classified into three tiers and queued for watch
//! registration. A fixed pool of workers drains the queues, always taking
//! high before medium before low, re-checked on every iteration.
//!
//! ## Flow
//!
//! ```text
//! initial scan ─┐
//!               ├─→ enqueue ─→ [high | medium | low] ─→ workers ─→ WatchRegistrar
//! new dir event ┘      │
//!                  full → dropped with a warning
//! ```
//!
//! Registration is best-effort: a full tier drops the directory, and a
//! directory that fails to register after the configured attempts is
//! logged and skipped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use sealsync_core::config::WatchConfig;
use sealsync_core::domain::{classify, SyncPath, WatchPriority};

/// Something that can start watching a directory
pub trait WatchRegistrar: Send + Sync {
    /// Watch `dir` (non-recursively)
    fn add_watch(&self, dir: &Path) -> anyhow::Result<()>;
}

/// Result of [`PriorityWatchScheduler::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued in the given tier
    Queued(WatchPriority),
    /// Tier was full; the directory will not be watched
    Dropped(WatchPriority),
    /// Classified as not watchable
    Excluded { prune_subtree: bool },
}

/// Counts from an initial tree scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub queued: usize,
    pub dropped: usize,
    pub excluded: usize,
}

#[derive(Debug, Default)]
struct TierQueues {
    high: VecDeque<PathBuf>,
    medium: VecDeque<PathBuf>,
    low: VecDeque<PathBuf>,
}

impl TierQueues {
    fn pop_next(&mut self) -> Option<(PathBuf, WatchPriority)> {
        if let Some(p) = self.high.pop_front() {
            return Some((p, WatchPriority::High));
        }
        if let Some(p) = self.medium.pop_front() {
            return Some((p, WatchPriority::Medium));
        }
        self.low.pop_front().map(|p| (p, WatchPriority::Low))
    }

    fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }
}

/// Tiered queue of directories awaiting watch registration
pub struct PriorityWatchScheduler {
    root: SyncPath,
    config: WatchConfig,
    queues: Mutex<TierQueues>,
    wakeup: Notify,
    registrar: Arc<dyn WatchRegistrar>,
}

impl PriorityWatchScheduler {
    #[must_use]
    pub fn new(root: SyncPath, config: WatchConfig, registrar: Arc<dyn WatchRegistrar>) -> Self {
        Self {
            root,
            config,
            queues: Mutex::new(TierQueues::default()),
            wakeup: Notify::new(),
            registrar,
        }
    }

    /// Classify a directory against the watched root
    #[must_use]
    pub fn classify(&self, dir: &Path) -> WatchPriority {
        match SyncPath::new(dir.to_path_buf()) {
            Ok(path) => classify(
                &path,
                &self.root,
                self.config.max_depth,
                &self.config.keywords,
            ),
            Err(_) => WatchPriority::Excluded {
                prune_subtree: false,
            },
        }
    }

    /// Queue `dir` for registration without blocking
    pub fn enqueue(&self, dir: &Path) -> EnqueueOutcome {
        let priority = self.classify(dir);
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);

        let (queue, capacity) = match priority {
            WatchPriority::High => (&mut queues.high, self.config.high_capacity),
            WatchPriority::Medium => (&mut queues.medium, self.config.medium_capacity),
            WatchPriority::Low => (&mut queues.low, self.config.low_capacity),
            WatchPriority::Excluded { prune_subtree } => {
                debug!(path = %dir.display(), "Directory excluded from watching");
                return EnqueueOutcome::Excluded { prune_subtree };
            }
        };

        if queue.len() >= capacity {
            warn!(path = %dir.display(), %priority, capacity, "Watch queue full, dropping directory");
            return EnqueueOutcome::Dropped(priority);
        }

        queue.push_back(dir.to_path_buf());
        drop(queues);
        self.wakeup.notify_one();
        debug!(path = %dir.display(), %priority, "Directory queued for watching");
        EnqueueOutcome::Queued(priority)
    }

    /// Number of directories waiting for a worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Walk the watched root and queue every watchable directory
    ///
    /// Hidden directories and subtrees deeper than the maximum depth are
    /// skipped entirely. The walk stops early once `cancel` fires. This does
    /// blocking I/O; call it from a blocking context.
    pub fn initial_scan(&self, cancel: &CancellationToken) -> ScanSummary {
        info!(root = %self.root, "Starting prioritized directory scan");
        let mut summary = ScanSummary::default();

        let mut walker = WalkDir::new(self.root.as_path())
            .max_depth(self.config.max_depth.saturating_add(1))
            .into_iter();

        while let Some(entry) = walker.next() {
            if cancel.is_cancelled() {
                info!(queued = summary.queued, "Directory scan cancelled");
                return summary;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry during scan");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.') {
                walker.skip_current_dir();
                continue;
            }

            match self.enqueue(entry.path()) {
                EnqueueOutcome::Queued(_) => summary.queued += 1,
                EnqueueOutcome::Dropped(_) => summary.dropped += 1,
                EnqueueOutcome::Excluded { prune_subtree } => {
                    summary.excluded += 1;
                    if prune_subtree {
                        walker.skip_current_dir();
                    }
                }
            }
        }

        info!(
            queued = summary.queued,
            dropped = summary.dropped,
            excluded = summary.excluded,
            "Directory scan complete"
        );
        summary
    }

    /// Spawn the worker pool onto `tracker`
    pub fn spawn_workers(
        self: &Arc<Self>,
        tracker: &tokio_util::task::TaskTracker,
        cancel: &CancellationToken,
    ) {
        for worker_id in 0..self.config.workers {
            let scheduler = Arc::clone(self);
            let cancel = cancel.clone();
            tracker.spawn(async move { scheduler.run_worker(worker_id, cancel).await });
        }
    }

    /// Drain the queues until cancelled
    pub async fn run_worker(&self, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "Watch worker started");
        loop {
            let next = self
                .queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_next();

            let Some((dir, priority)) = next else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.wakeup.notified() => {}
                }
                continue;
            };

            let pause = match priority {
                WatchPriority::Medium => Duration::from_millis(self.config.medium_delay_ms),
                WatchPriority::Low => Duration::from_millis(self.config.low_delay_ms),
                _ => Duration::ZERO,
            };
            if !pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            self.register(&dir, priority, worker_id, &cancel).await;
        }
        debug!(worker_id, "Watch worker stopped");
    }

    async fn register(
        &self,
        dir: &Path,
        priority: WatchPriority,
        worker_id: usize,
        cancel: &CancellationToken,
    ) -> bool {
        let attempts = self.config.add_attempts.max(1);
        for attempt in 0..attempts {
            match self.registrar.add_watch(dir) {
                Ok(()) => {
                    if priority == WatchPriority::High {
                        info!(worker_id, path = %dir.display(), "Watching directory");
                    } else {
                        debug!(worker_id, path = %dir.display(), %priority, "Watching directory");
                    }
                    return true;
                }
                Err(e) => {
                    warn!(
                        worker_id,
                        path = %dir.display(),
                        %priority,
                        attempt = attempt + 1,
                        error = %e,
                        "Failed to add watch"
                    );
                    let backoff = Duration::from_millis(100 * u64::from(attempt));
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
        error!(worker_id, path = %dir.display(), attempts, "Giving up on watch registration");
        false
    }
}
