//! Event dispatcher
//!
//! Routes each [`FsEvent`] to exactly one place:
//!
//! | Event                                   | Action                                 |
//! |-----------------------------------------|----------------------------------------|
//! | `.enc` / `.synclock` / lock directory   | ignored                                |
//! | anything while local events are ignored | ignored                                |
//! | remove / rename                         | delete remote `.enc`, then reconcile   |
//! | create / write / chmod on a directory   | watch it, then local→remote reconcile  |
//! | create / write / chmod on a file        | upload pipeline (duplicates dropped)   |
//! | path gone before stat                   | ignored                                |

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use sealsync_core::domain::{SyncDirection, SyncPath};

use crate::pending::PendingOperations;
use crate::pipeline::{PipelineOutcome, UploadPipeline};
use crate::reconciler::BatchReconciler;
use crate::scheduler::PriorityWatchScheduler;
use crate::watcher::FsEvent;
use crate::{ENC_SUFFIX, SYNCLOCK_SUFFIX};

/// What [`EventDispatcher::dispatch`] did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ignored,
    /// A reconcile was requested (possibly coalesced)
    Reconcile,
    /// A new directory was queued for watching
    WatchDirectory,
    /// Same path seen inside the duplicate window
    Duplicate,
    /// A pipeline task was spawned
    Upload,
}

/// Shared state the dispatcher fans events out to
pub struct DispatchTargets {
    pub pending: Arc<PendingOperations>,
    pub scheduler: Arc<PriorityWatchScheduler>,
    pub reconciler: Arc<BatchReconciler>,
    pub pipeline: Arc<UploadPipeline>,
}

pub struct EventDispatcher {
    root: SyncPath,
    lock_dir: PathBuf,
    ignore_local_events: Arc<AtomicBool>,
    targets: DispatchTargets,
    uploads: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl EventDispatcher {
    /// `max_concurrent_uploads` of 0 leaves pipeline fan-out unbounded
    #[must_use]
    pub fn new(
        root: SyncPath,
        lock_dir: PathBuf,
        ignore_local_events: Arc<AtomicBool>,
        targets: DispatchTargets,
        max_concurrent_uploads: usize,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        let uploads =
            (max_concurrent_uploads > 0).then(|| Arc::new(Semaphore::new(max_concurrent_uploads)));
        Self {
            root,
            lock_dir,
            ignore_local_events,
            targets,
            uploads,
            tracker,
            cancel,
        }
    }

    /// Receive events until cancelled or both channels close
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<FsEvent>,
        mut errors: mpsc::Receiver<notify::Error>,
    ) {
        info!(root = %self.root, "Event dispatcher started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(event) = events.recv() => {
                    self.dispatch(event).await;
                }
                Some(err) = errors.recv() => {
                    warn!(error = %err, "Watcher error");
                }
                else => break,
            }
        }
        info!("Event dispatcher stopped");
    }

    /// Route a single event
    pub async fn dispatch(&self, event: FsEvent) -> Dispatch {
        let path = event.path.as_path();

        if self.is_internal(path) {
            return Dispatch::Ignored;
        }
        if self.ignore_local_events.load(Ordering::SeqCst) {
            debug!(path = %path.display(), "Local events ignored, skipping");
            return Dispatch::Ignored;
        }

        if event.kind.is_removal() {
            debug!(path = %path.display(), kind = ?event.kind, "Path removed, scheduling reconcile");
            // The bulk sync never touches `.enc` objects, so the copy is deleted here
            let pipeline = Arc::clone(&self.targets.pipeline);
            let cancel = self.cancel.clone();
            let removed = event.path.clone();
            self.tracker.spawn(async move {
                if let Err(e) = pipeline.remove_remote(&removed, &cancel).await {
                    warn!(path = %removed.display(), error = %format!("{e:#}"), "Failed to delete remote copy");
                }
            });
            self.targets.reconciler.trigger(SyncDirection::LocalToRemote);
            return Dispatch::Reconcile;
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Path vanished before stat");
                return Dispatch::Ignored;
            }
        };

        if metadata.is_dir() {
            self.targets.scheduler.enqueue(path);
            self.targets.reconciler.trigger(SyncDirection::LocalToRemote);
            return Dispatch::WatchDirectory;
        }

        let Some(guard) = self.targets.pending.try_begin(path) else {
            return Dispatch::Duplicate;
        };

        let pipeline = Arc::clone(&self.targets.pipeline);
        let uploads = self.uploads.clone();
        let cancel = self.cancel.clone();
        let path = event.path;
        self.tracker.spawn(async move {
            let _guard = guard;
            let _permit = match uploads {
                Some(uploads) => tokio::select! {
                    _ = cancel.cancelled() => return,
                    permit = uploads.acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                },
                None => None,
            };

            match pipeline.process(&path, &cancel).await {
                Ok(PipelineOutcome::Uploaded(_)) => {}
                Ok(PipelineOutcome::Vanished) => {
                    debug!(path = %path.display(), "Nothing to upload");
                }
                Err(e) => {
                    error!(path = %path.display(), error = %format!("{e:#}"), "Upload pipeline failed");
                }
            }
        });

        Dispatch::Upload
    }

    /// Pipeline artifacts and lock state never reach the pipeline
    fn is_internal(&self, path: &Path) -> bool {
        if path.starts_with(&self.lock_dir) {
            return true;
        }
        path.file_name()
            .map(|name| name.to_string_lossy())
            .is_some_and(|name| name.ends_with(ENC_SUFFIX) || name.ends_with(SYNCLOCK_SUFFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::WatchRegistrar;
    use crate::testing::{self, MemoryStorage, PlainCipher};
    use crate::watcher::FsEventKind;
    use sealsync_core::config::WatchConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoopRegistrar;

    impl WatchRegistrar for NoopRegistrar {
        fn add_watch(&self, _dir: &Path) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        lock_dir: PathBuf,
        storage: Arc<MemoryStorage>,
        ignore: Arc<AtomicBool>,
        tracker: TaskTracker,
        scheduler: Arc<PriorityWatchScheduler>,
        reconciler: Arc<BatchReconciler>,
        dispatcher: EventDispatcher,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("vault");
        std::fs::create_dir_all(&root).unwrap();
        let lock_dir = root.join(".synclocks");
        let storage = Arc::new(MemoryStorage::default());
        let reconciler = testing::reconciler(
            &root,
            &lock_dir,
            storage.clone(),
            Duration::from_secs(3600),
        );
        let pipeline = Arc::new(testing::pipeline(
            &root,
            &lock_dir,
            storage.clone(),
            Arc::new(PlainCipher),
            reconciler.clone(),
        ));
        let sync_root = SyncPath::new(root.clone()).unwrap();
        let scheduler = Arc::new(PriorityWatchScheduler::new(
            sync_root.clone(),
            WatchConfig::default(),
            Arc::new(NoopRegistrar),
        ));
        let ignore = Arc::new(AtomicBool::new(false));
        let tracker = TaskTracker::new();
        let dispatcher = EventDispatcher::new(
            sync_root,
            lock_dir.clone(),
            ignore.clone(),
            DispatchTargets {
                pending: Arc::new(PendingOperations::new(
                    Duration::from_secs(5),
                    Duration::from_secs(600),
                )),
                scheduler: scheduler.clone(),
                reconciler: reconciler.clone(),
                pipeline,
            },
            2,
            tracker.clone(),
            CancellationToken::new(),
        );
        Fixture {
            _dir: dir,
            root,
            lock_dir,
            storage,
            ignore,
            tracker,
            scheduler,
            reconciler,
            dispatcher,
        }
    }

    async fn settle(tracker: &TaskTracker) {
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    #[tokio::test]
    async fn test_artifacts_and_lock_state_are_ignored() {
        let fx = fixture();
        for path in [
            fx.root.join("a.txt.enc"),
            fx.root.join("a.synclock"),
            fx.lock_dir.join("0011223344556677.lock"),
        ] {
            let outcome = fx
                .dispatcher
                .dispatch(FsEvent::new(path, FsEventKind::Create))
                .await;
            assert_eq!(outcome, Dispatch::Ignored);
        }
        assert!(!fx.reconciler.is_active(SyncDirection::LocalToRemote));
    }

    #[tokio::test]
    async fn test_everything_ignored_while_flag_raised() {
        let fx = fixture();
        fx.ignore.store(true, Ordering::SeqCst);
        let file = fx.root.join("a.txt");
        std::fs::write(&file, b"x").unwrap();

        for kind in [FsEventKind::Write, FsEventKind::Remove] {
            let outcome = fx
                .dispatcher
                .dispatch(FsEvent::new(file.clone(), kind))
                .await;
            assert_eq!(outcome, Dispatch::Ignored);
        }
        assert_eq!(fx.storage.copy_count(), 0);
    }

    #[tokio::test]
    async fn test_removal_schedules_reconcile() {
        let fx = fixture();
        let outcome = fx
            .dispatcher
            .dispatch(FsEvent::new(fx.root.join("gone.txt"), FsEventKind::Remove))
            .await;
        assert_eq!(outcome, Dispatch::Reconcile);
        assert!(fx.reconciler.is_active(SyncDirection::LocalToRemote));

        let outcome = fx
            .dispatcher
            .dispatch(FsEvent::new(fx.root.join("old.txt"), FsEventKind::Rename))
            .await;
        assert_eq!(outcome, Dispatch::Reconcile);

        settle(&fx.tracker).await;
        let mut deletes = fx.storage.deletes();
        deletes.sort();
        assert_eq!(
            deletes,
            vec![
                "backup:/Watched_folder/gone.txt.enc".to_string(),
                "backup:/Watched_folder/old.txt.enc".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_removed_file_loses_its_remote_copy() {
        let fx = fixture();
        let file = fx.root.join("a.txt");
        std::fs::write(&file, b"0123456789").unwrap();
        fx.dispatcher
            .dispatch(FsEvent::new(file.clone(), FsEventKind::Create))
            .await;
        settle(&fx.tracker).await;
        assert!(fx.storage.has_object("backup:/Watched_folder/a.txt.enc"));

        std::fs::remove_file(&file).unwrap();
        fx.dispatcher
            .dispatch(FsEvent::new(file, FsEventKind::Remove))
            .await;
        settle(&fx.tracker).await;
        assert!(!fx.storage.has_object("backup:/Watched_folder/a.txt.enc"));
    }

    #[tokio::test]
    async fn test_new_directory_is_queued_for_watching() {
        let fx = fixture();
        let dir = fx.root.join("projects");
        std::fs::create_dir(&dir).unwrap();

        let outcome = fx
            .dispatcher
            .dispatch(FsEvent::new(dir, FsEventKind::Create))
            .await;
        assert_eq!(outcome, Dispatch::WatchDirectory);
        assert_eq!(fx.scheduler.queued(), 1);
        assert!(fx.reconciler.is_active(SyncDirection::LocalToRemote));
    }

    #[tokio::test]
    async fn test_vanished_path_is_ignored() {
        let fx = fixture();
        let outcome = fx
            .dispatcher
            .dispatch(FsEvent::new(fx.root.join("never.txt"), FsEventKind::Write))
            .await;
        assert_eq!(outcome, Dispatch::Ignored);
    }

    #[tokio::test]
    async fn test_rapid_writes_run_one_pipeline() {
        let fx = fixture();
        let file = fx.root.join("a.txt");
        std::fs::write(&file, b"0123456789").unwrap();

        let first = fx
            .dispatcher
            .dispatch(FsEvent::new(file.clone(), FsEventKind::Create))
            .await;
        let second = fx
            .dispatcher
            .dispatch(FsEvent::new(file.clone(), FsEventKind::Write))
            .await;
        assert_eq!(first, Dispatch::Upload);
        assert_eq!(second, Dispatch::Duplicate);

        settle(&fx.tracker).await;
        assert_eq!(fx.storage.copy_count(), 1);
        assert!(!fx.root.join("a.txt.enc").exists());
    }

    #[tokio::test]
    async fn test_run_exits_on_cancel() {
        let fx = fixture();
        let (_event_tx, events) = mpsc::channel(8);
        let (_error_tx, errors) = mpsc::channel(8);
        fx.dispatcher.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), fx.dispatcher.run(events, errors))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_dispatches_until_channels_close() {
        let fx = fixture();
        let (event_tx, events) = mpsc::channel(8);
        let (error_tx, errors) = mpsc::channel(8);
        event_tx
            .send(FsEvent::new(fx.root.join("gone.txt"), FsEventKind::Remove))
            .await
            .unwrap();
        drop(event_tx);
        drop(error_tx);

        tokio::time::timeout(Duration::from_secs(1), fx.dispatcher.run(events, errors))
            .await
            .unwrap();
        assert!(fx.reconciler.is_active(SyncDirection::LocalToRemote));
    }
}
