//! Filesystem watcher
//!
//! Wraps the `notify` crate and converts raw OS events into [`FsEvent`]
//! values. Directories are registered one at a time, non-recursively, so the
//! priority scheduler decides which parts of the tree get watched first.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  FileWatcher ──→ events channel ──→ EventDispatcher
//!       │
//!       └────────→ errors channel ──→ logged
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::scheduler::WatchRegistrar;

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Capacity of the error channel
const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Kind of filesystem change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Create,
    Write,
    /// Permission or other metadata change
    Chmod,
    Remove,
    /// The path was renamed away
    Rename,
}

impl FsEventKind {
    /// Whether the path no longer exists under this name
    #[must_use]
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Remove | Self::Rename)
    }
}

/// A change to a single path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub path: PathBuf,
    pub kind: FsEventKind,
}

impl FsEvent {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// `notify`-backed watcher registering directories individually
pub struct FileWatcher {
    watcher: Mutex<RecommendedWatcher>,
}

impl FileWatcher {
    /// Create a watcher plus its event and error receivers
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created
    pub fn new() -> Result<(
        Self,
        mpsc::Receiver<FsEvent>,
        mpsc::Receiver<notify::Error>,
    )> {
        let (event_tx, event_rx) = mpsc::channel::<FsEvent>(EVENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel::<notify::Error>(ERROR_CHANNEL_CAPACITY);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for change in map_notify_event(&event) {
                        if let Err(e) = event_tx.blocking_send(change) {
                            warn!(error = %e, "Failed to send change event (receiver dropped)");
                        }
                    }
                }
                Err(err) => {
                    if error_tx.try_send(err).is_err() {
                        warn!("Watcher error channel full or closed");
                    }
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
            },
            event_rx,
            error_rx,
        ))
    }
}

impl WatchRegistrar for FileWatcher {
    fn add_watch(&self, dir: &Path) -> Result<()> {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch path: {}", dir.display()))
    }
}

/// Convert a `notify::Event` into zero or more [`FsEvent`]s
///
/// - `Create(*)` → `Create`
/// - `Modify(Data | Any | Other)` → `Write`
/// - `Modify(Metadata)` → `Chmod`
/// - `Modify(Name(From | Any | Other))` → `Rename`
/// - `Modify(Name(To))` → `Create`
/// - `Modify(Name(Both))` → `Rename` of the old path, `Create` of the new one
/// - `Remove(*)` → `Remove`
/// - access and unknown events are dropped
///
/// Some backends report `Both` alongside `From`/`To`; the duplicates are
/// absorbed by duplicate suppression and reconcile coalescing downstream.
pub fn map_notify_event(event: &notify::Event) -> Vec<FsEvent> {
    let paths = &event.paths;
    let each = |kind: FsEventKind| -> Vec<FsEvent> {
        paths.iter().map(|p| FsEvent::new(p.clone(), kind)).collect()
    };

    let mapped = match &event.kind {
        EventKind::Create(_) => each(FsEventKind::Create),
        EventKind::Remove(_) => each(FsEventKind::Remove),
        EventKind::Modify(ModifyKind::Metadata(_)) => each(FsEventKind::Chmod),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(FsEventKind::Create),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match paths.as_slice() {
            [old, new, ..] => vec![
                FsEvent::new(old.clone(), FsEventKind::Rename),
                FsEvent::new(new.clone(), FsEventKind::Create),
            ],
            _ => each(FsEventKind::Rename),
        },
        EventKind::Modify(ModifyKind::Name(_)) => each(FsEventKind::Rename),
        EventKind::Modify(_) => each(FsEventKind::Write),
        _ => Vec::new(),
    };

    if mapped.is_empty() {
        debug!(kind = ?event.kind, "Ignoring event kind");
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    #[test]
    fn test_create_maps_to_create() {
        let mapped = map_notify_event(&event(EventKind::Create(CreateKind::File), &["/v/a"]));
        assert_eq!(mapped, vec![FsEvent::new("/v/a", FsEventKind::Create)]);
    }

    #[test]
    fn test_data_change_maps_to_write() {
        let mapped = map_notify_event(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/v/a"],
        ));
        assert_eq!(mapped, vec![FsEvent::new("/v/a", FsEventKind::Write)]);
    }

    #[test]
    fn test_metadata_maps_to_chmod() {
        let mapped = map_notify_event(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/v/a"],
        ));
        assert_eq!(mapped, vec![FsEvent::new("/v/a", FsEventKind::Chmod)]);
    }

    #[test]
    fn test_remove_maps_to_remove() {
        let mapped = map_notify_event(&event(EventKind::Remove(RemoveKind::File), &["/v/a"]));
        assert_eq!(mapped, vec![FsEvent::new("/v/a", FsEventKind::Remove)]);
        assert!(mapped[0].kind.is_removal());
    }

    #[test]
    fn test_rename_halves() {
        let from = map_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/v/old"],
        ));
        assert_eq!(from, vec![FsEvent::new("/v/old", FsEventKind::Rename)]);

        let to = map_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/v/new"],
        ));
        assert_eq!(to, vec![FsEvent::new("/v/new", FsEventKind::Create)]);
    }

    #[test]
    fn test_rename_both_splits_paths() {
        let mapped = map_notify_event(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/v/old", "/v/new"],
        ));
        assert_eq!(
            mapped,
            vec![
                FsEvent::new("/v/old", FsEventKind::Rename),
                FsEvent::new("/v/new", FsEventKind::Create),
            ]
        );
    }

    #[test]
    fn test_access_is_ignored() {
        let mapped = map_notify_event(&event(EventKind::Access(AccessKind::Read), &["/v/a"]));
        assert!(mapped.is_empty());
    }

    #[tokio::test]
    async fn test_registered_directory_reports_new_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let (watcher, mut events, _errors) = FileWatcher::new().unwrap();
        watcher.add_watch(dir.path()).unwrap();

        let file = dir.path().join("hello.txt");
        std::fs::write(&file, b"hi").unwrap();

        let seen = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while let Some(ev) = events.recv().await {
                if ev.path.file_name() == file.file_name() {
                    return Some(ev);
                }
            }
            None
        })
        .await
        .ok()
        .flatten();
        assert!(seen.is_some());
    }

    #[test]
    fn test_add_watch_on_missing_dir_fails() {
        let (watcher, _events, _errors) = FileWatcher::new().unwrap();
        assert!(watcher
            .add_watch(Path::new("/nonexistent/sealsync/dir"))
            .is_err());
    }
}
