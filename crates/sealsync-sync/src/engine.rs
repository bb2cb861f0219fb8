//! Watch engine
//!
//! Owns the shared state and spawns every long-running task:
//!
//! ```text
//!                 ┌─────────────── WatchEngine ────────────────┐
//!  FileWatcher ──→│ EventDispatcher ─┬─→ UploadPipeline (×N)   │
//!       ▲         │                  ├─→ BatchReconciler       │──→ IRemoteStorage
//!       │         │                  └─→ PriorityWatchScheduler│
//!       └─────────│── watch workers ←──────────┘               │
//!                 │  pending sweeper, periodic reconcile       │
//!                 └────────────────────────────────────────────┘
//! ```
//!
//! Everything runs until the engine's [`CancellationToken`] fires, after
//! which in-flight pipelines and scheduled reconciles are awaited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sealsync_core::config::Config;
use sealsync_core::domain::{RemotePath, SyncDirection, SyncPath};
use sealsync_core::ports::{IFileCipher, IRemoteStorage};

use crate::backoff::RetryPolicy;
use crate::dispatcher::{DispatchTargets, EventDispatcher};
use crate::lock::LockManager;
use crate::pending::PendingOperations;
use crate::pipeline::UploadPipeline;
use crate::reconciler::{default_excludes, BatchReconciler, ReconcilerSettings};
use crate::restore::restore_encrypted;
use crate::scheduler::{PriorityWatchScheduler, WatchRegistrar};
use crate::stability::StabilityDetector;
use crate::watcher::{FileWatcher, FsEvent};
use crate::SyncError;

/// Top-level orchestrator for one watched root
pub struct WatchEngine {
    config: Config,
    root: SyncPath,
    remote_root: RemotePath,
    storage: Arc<dyn IRemoteStorage>,
    cipher: Arc<dyn IFileCipher>,
    reconciler: Arc<BatchReconciler>,
    pending: Arc<PendingOperations>,
    ignore_local_events: Arc<AtomicBool>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WatchEngine {
    /// Build an engine from validated configuration
    ///
    /// # Errors
    /// Returns `SyncError::Domain` if the root or remote is malformed.
    pub fn new(
        config: Config,
        storage: Arc<dyn IRemoteStorage>,
        cipher: Arc<dyn IFileCipher>,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        let root = SyncPath::new(config.sync.root.clone())?;
        let remote_root: RemotePath = config.remote_root().parse()?;

        let reconciler = Arc::new(BatchReconciler::new(
            root.clone(),
            remote_root.clone(),
            Arc::clone(&storage),
            ReconcilerSettings {
                debounce: config.sync.debounce(),
                retry: RetryPolicy::new(
                    config.retry.sync_attempts,
                    Duration::from_secs(config.retry.max_delay),
                ),
                excludes: default_excludes(&config.locks.dir, &config.sync.exclude),
                verify_max_depth: config.transfer.verify_max_depth,
            },
            cancel.clone(),
        ));
        let pending = Arc::new(PendingOperations::new(
            config.sync.duplicate_window(),
            config.sync.pending_stale_after(),
        ));
        let ignore_local_events = Arc::new(AtomicBool::new(config.sync.ignore_local_events));

        Ok(Self {
            config,
            root,
            remote_root,
            storage,
            cipher,
            reconciler,
            pending,
            ignore_local_events,
            tracker: TaskTracker::new(),
            cancel,
        })
    }

    #[must_use]
    pub fn reconciler(&self) -> &Arc<BatchReconciler> {
        &self.reconciler
    }

    /// Whether the dispatcher is currently discarding local events
    #[must_use]
    pub fn ignoring_local_events(&self) -> bool {
        self.ignore_local_events.load(Ordering::SeqCst)
    }

    /// Watch the root with the platform watcher until cancelled
    ///
    /// # Errors
    /// Fails only if the OS watcher cannot be created.
    pub async fn run(&self) -> Result<()> {
        let (watcher, events, errors) = FileWatcher::new()?;
        self.run_with(Arc::new(watcher), events, errors).await
    }

    /// Run the engine against an arbitrary watch source
    ///
    /// # Errors
    /// Currently infallible once started; per-task failures are logged.
    pub async fn run_with(
        &self,
        registrar: Arc<dyn WatchRegistrar>,
        events: mpsc::Receiver<FsEvent>,
        errors: mpsc::Receiver<notify::Error>,
    ) -> Result<()> {
        info!(root = %self.root, remote = %self.remote_root, "Watch engine starting");

        if self.config.sync.initial_pull {
            self.ignore_local_events.store(true, Ordering::SeqCst);
        }

        let scheduler = Arc::new(PriorityWatchScheduler::new(
            self.root.clone(),
            self.config.watch.clone(),
            registrar,
        ));
        scheduler.spawn_workers(&self.tracker, &self.cancel);

        let scan = Arc::clone(&scheduler);
        let scan_cancel = self.cancel.clone();
        self.tracker.spawn_blocking(move || {
            scan.initial_scan(&scan_cancel);
        });

        self.tracker.spawn(
            Arc::clone(&self.pending)
                .run_sweeper(self.config.sync.pending_sweep_interval(), self.cancel.clone()),
        );

        let dispatcher = Arc::new(self.dispatcher(Arc::clone(&scheduler)));
        self.tracker
            .spawn(async move { dispatcher.run(events, errors).await });

        if self.config.sync.initial_pull {
            self.initial_pull().await;
        }

        self.reconcile_periodically().await;

        info!("Watch engine stopping, waiting for in-flight work");
        self.tracker.close();
        self.tracker.wait().await;
        self.reconciler.wait_idle().await;
        info!("Watch engine stopped");
        Ok(())
    }

    fn dispatcher(&self, scheduler: Arc<PriorityWatchScheduler>) -> EventDispatcher {
        let pipeline = UploadPipeline::new(
            self.root.clone(),
            self.remote_root.clone(),
            LockManager::from_config(&self.config.locks),
            StabilityDetector::from_config(&self.config.stability),
            RetryPolicy::new(
                self.config.retry.upload_attempts,
                Duration::from_secs(self.config.retry.max_delay),
            ),
            Arc::clone(&self.cipher),
            Arc::clone(&self.storage),
            Arc::clone(&self.reconciler),
        );

        EventDispatcher::new(
            self.root.clone(),
            self.config.locks.dir.clone(),
            Arc::clone(&self.ignore_local_events),
            DispatchTargets {
                pending: Arc::clone(&self.pending),
                scheduler,
                reconciler: Arc::clone(&self.reconciler),
                pipeline: Arc::new(pipeline),
            },
            self.config.sync.max_concurrent_uploads,
            self.tracker.clone(),
            self.cancel.clone(),
        )
    }

    /// Pull the remote baseline and decrypt it, with local events muted
    async fn initial_pull(&self) {
        info!("Pulling remote baseline");
        match self.reconciler.run_now(SyncDirection::RemoteToLocal).await {
            Ok(Some(files)) => info!(files, "Remote baseline pulled"),
            Ok(None) => debug!("Remote pull already in progress"),
            Err(e) => warn!(error = %e, "Initial pull failed, continuing with local state"),
        }

        if let Err(e) = restore_encrypted(self.root.as_path(), Arc::clone(&self.cipher)).await {
            warn!(error = %format!("{e:#}"), "Restore of encrypted files failed");
        }

        self.ignore_local_events
            .store(self.config.sync.ignore_local_events, Ordering::SeqCst);
    }

    async fn reconcile_periodically(&self) {
        let Some(every) = self.config.sync.reconcile_every() else {
            self.cancel.cancelled().await;
            return;
        };

        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Periodic reconcile");
                    self.reconciler.trigger(SyncDirection::LocalToRemote);
                }
            }
        }
    }
}

/// Build and run a [`WatchEngine`]; blocks until `cancel` fires
///
/// # Errors
/// Returns an error for a malformed root/remote or if the watcher cannot start.
pub async fn start_watcher(
    cancel: CancellationToken,
    config: Config,
    storage: Arc<dyn IRemoteStorage>,
    cipher: Arc<dyn IFileCipher>,
) -> Result<()> {
    let root = config.sync.root.clone();
    let engine = WatchEngine::new(config, storage, cipher, cancel)
        .with_context(|| format!("Invalid watch setup for {}", root.display()))?;
    engine.run().await
}
