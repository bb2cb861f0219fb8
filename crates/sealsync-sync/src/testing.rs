//! In-memory port fakes shared by unit and integration tests
//!
//! Enabled for this crate's own tests and, through the `test-support`
//! feature, for anything that wants to drive the engine without rclone.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sealsync_core::domain::{RemotePath, SyncDirection, SyncPath};
use sealsync_core::ports::{
    IFileCipher, IRemoteStorage, ListOptions, StorageError, StorageLocation, TransferOutput,
};

use crate::backoff::RetryPolicy;
use crate::lock::LockManager;
use crate::pipeline::UploadPipeline;
use crate::reconciler::{default_excludes, BatchReconciler, ReconcilerSettings};
use crate::scheduler::WatchRegistrar;
use crate::stability::StabilityDetector;

/// Remote root every helper mirrors into
pub const REMOTE_ROOT: &str = "backup:/Watched_folder";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One `copy_one` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub local: PathBuf,
    pub remote: String,
    /// Whether the local file existed when the copy started
    pub local_existed: bool,
}

/// One `bulk_sync` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    pub direction: SyncDirection,
    pub excludes: Vec<String>,
}

/// Remote held in memory, keyed by `remote:/path`
///
/// Uploads store the local file's bytes. A remote→local bulk sync writes
/// every stored object under the remote root back into the local root; it
/// never deletes local files. Local→remote bulk syncs are only recorded.
#[derive(Default)]
pub struct MemoryStorage {
    pub copies: Mutex<Vec<CopyRecord>>,
    pub syncs: Mutex<Vec<SyncRecord>>,
    pub deletes: Mutex<Vec<String>>,
    pub listings: Mutex<Vec<(String, ListOptions)>>,
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Answers for `list_files`, consumed front first before the default behaviour
    pub scripted_lists: Mutex<VecDeque<Result<Vec<String>, StorageError>>>,
    pub copy_failures: AtomicU32,
    pub sync_failures: AtomicU32,
}

impl MemoryStorage {
    pub fn script_list(&self, answer: Result<Vec<String>, StorageError>) {
        locked(&self.scripted_lists).push_back(answer);
    }

    /// Store an object as if another client had uploaded it
    pub fn put_object(&self, remote: &RemotePath, contents: &[u8]) {
        locked(&self.objects).insert(remote.to_string(), contents.to_vec());
    }

    pub fn has_object(&self, remote: &str) -> bool {
        locked(&self.objects).contains_key(remote)
    }

    pub fn copies(&self) -> Vec<CopyRecord> {
        locked(&self.copies).clone()
    }

    pub fn copy_count(&self) -> usize {
        locked(&self.copies).len()
    }

    /// Directions of every bulk sync, in call order
    pub fn syncs(&self) -> Vec<SyncDirection> {
        locked(&self.syncs).iter().map(|s| s.direction).collect()
    }

    pub fn sync_count(&self) -> usize {
        locked(&self.syncs).len()
    }

    pub fn deletes(&self) -> Vec<String> {
        locked(&self.deletes).clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn pull_into(&self, local_root: &Path, remote_root: &RemotePath) -> Result<(), StorageError> {
        let prefix = format!("{}/", remote_root.to_string().trim_end_matches('/'));
        let objects = locked(&self.objects).clone();
        for (key, contents) in objects {
            let Some(relative) = key.strip_prefix(&prefix) else {
                continue;
            };
            let target = local_root.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            std::fs::write(&target, contents).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl IRemoteStorage for MemoryStorage {
    async fn bulk_sync(
        &self,
        direction: SyncDirection,
        local_root: &Path,
        remote_root: &RemotePath,
        excludes: &[String],
    ) -> Result<TransferOutput, StorageError> {
        locked(&self.syncs).push(SyncRecord {
            direction,
            excludes: excludes.to_vec(),
        });
        if Self::take_failure(&self.sync_failures) {
            return Err(StorageError::Transport {
                operation: "sync".into(),
                message: "network unreachable".into(),
            });
        }
        if direction == SyncDirection::RemoteToLocal {
            self.pull_into(local_root, remote_root)?;
        }
        Ok(TransferOutput::default())
    }

    async fn copy_one(
        &self,
        local: &Path,
        remote: &RemotePath,
    ) -> Result<TransferOutput, StorageError> {
        let contents = std::fs::read(local).ok();
        locked(&self.copies).push(CopyRecord {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            local_existed: contents.is_some(),
        });
        if Self::take_failure(&self.copy_failures) {
            return Err(StorageError::Transport {
                operation: "copyto".into(),
                message: "connection reset".into(),
            });
        }
        locked(&self.objects).insert(remote.to_string(), contents.unwrap_or_default());
        Ok(TransferOutput::default())
    }

    async fn delete_one(&self, remote: &RemotePath) -> Result<TransferOutput, StorageError> {
        let key = remote.to_string();
        locked(&self.deletes).push(key.clone());
        match locked(&self.objects).remove(&key) {
            Some(_) => Ok(TransferOutput::default()),
            None => Err(StorageError::NotFound(format!("{key}: object not found"))),
        }
    }

    async fn list_files(
        &self,
        target: &StorageLocation,
        options: ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        locked(&self.listings).push((target.to_string(), options));
        if let Some(answer) = locked(&self.scripted_lists).pop_front() {
            return answer;
        }

        let objects = locked(&self.objects);
        match target {
            StorageLocation::Local(_) => Ok(Vec::new()),
            StorageLocation::Remote(remote) if options.recursive => {
                let prefix = remote.to_string();
                Ok(objects
                    .keys()
                    .filter(|key| key.starts_with(&prefix))
                    .cloned()
                    .collect())
            }
            StorageLocation::Remote(remote) => {
                let key = remote.to_string();
                if objects.contains_key(&key) {
                    Ok(vec![remote.file_name().unwrap_or_default().to_string()])
                } else {
                    Err(StorageError::NotFound(format!("{key}: directory not found")))
                }
            }
        }
    }

    async fn test_connection(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Copies bytes unchanged in both directions
pub struct PlainCipher;

impl IFileCipher for PlainCipher {
    fn encrypt_file(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        std::fs::copy(input, output)?;
        Ok(())
    }

    fn decrypt_file(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        std::fs::copy(input, output)?;
        Ok(())
    }
}

/// Registrar that records the order directories were watched in
#[derive(Default)]
pub struct RecordingRegistrar {
    pub added: Mutex<Vec<PathBuf>>,
}

impl RecordingRegistrar {
    pub fn added(&self) -> Vec<PathBuf> {
        locked(&self.added).clone()
    }
}

impl WatchRegistrar for RecordingRegistrar {
    fn add_watch(&self, dir: &Path) -> anyhow::Result<()> {
        locked(&self.added).push(dir.to_path_buf());
        Ok(())
    }
}

/// # Panics
/// If [`REMOTE_ROOT`] stops parsing.
#[must_use]
pub fn remote_root() -> RemotePath {
    REMOTE_ROOT.parse().expect("valid remote root")
}

/// Reconciler over `root` with default retries
///
/// # Panics
/// If `root` is not absolute.
#[must_use]
pub fn reconciler(
    root: &Path,
    lock_dir: &Path,
    storage: Arc<MemoryStorage>,
    debounce: Duration,
) -> Arc<BatchReconciler> {
    Arc::new(BatchReconciler::new(
        SyncPath::new(root.to_path_buf()).expect("absolute root"),
        remote_root(),
        storage,
        ReconcilerSettings {
            debounce,
            retry: RetryPolicy::default(),
            excludes: default_excludes(lock_dir, &[]),
            verify_max_depth: 3,
        },
        CancellationToken::new(),
    ))
}

/// Pipeline with millisecond-scale waits
///
/// # Panics
/// If `root` is not absolute.
#[must_use]
pub fn pipeline(
    root: &Path,
    lock_dir: &Path,
    storage: Arc<MemoryStorage>,
    cipher: Arc<dyn IFileCipher>,
    reconciler: Arc<BatchReconciler>,
) -> UploadPipeline {
    UploadPipeline::new(
        SyncPath::new(root.to_path_buf()).expect("absolute root"),
        remote_root(),
        LockManager::new(lock_dir, Duration::from_secs(120))
            .with_wait(Duration::from_millis(10), Duration::from_millis(200)),
        StabilityDetector::new(Duration::from_millis(5), 3),
        RetryPolicy::new(3, Duration::from_millis(50)),
        cipher,
        storage,
        reconciler,
    )
}
