//! Per-file encrypt/upload pipeline
//!
//! ```text
//! lock ─→ wait stable ─→ encrypt to <file>.enc ─→ upload + verify (retried)
//!   │                                                   │
//!   └──────────── unlock ←── delete <file>.enc ←────────┘
//! ```
//!
//! Every step is a gate: a failure ends the pipeline for that path and is
//! returned to the caller, never propagated further. The `.enc` artifact
//! does not outlive the call.
//!
//! A file removed locally has its remote `.enc` copy deleted under the same
//! per-file lock, so a removal never interleaves with an upload of that path.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sealsync_core::domain::{RemotePath, SyncDirection, SyncPath};
use sealsync_core::ports::{IFileCipher, IRemoteStorage, ListOptions, StorageLocation};

use crate::backoff::RetryPolicy;
use crate::lock::LockManager;
use crate::reconciler::BatchReconciler;
use crate::stability::StabilityDetector;
use crate::{SyncError, ENC_SUFFIX};

/// What happened to a file handed to the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Encrypted copy uploaded and confirmed at this location
    Uploaded(RemotePath),
    /// The file disappeared before it could be read
    Vanished,
}

/// Shared, per-engine pipeline state
pub struct UploadPipeline {
    root: SyncPath,
    remote_root: RemotePath,
    locks: LockManager,
    stability: StabilityDetector,
    retry: RetryPolicy,
    cipher: Arc<dyn IFileCipher>,
    storage: Arc<dyn IRemoteStorage>,
    reconciler: Arc<BatchReconciler>,
}

impl UploadPipeline {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        root: SyncPath,
        remote_root: RemotePath,
        locks: LockManager,
        stability: StabilityDetector,
        retry: RetryPolicy,
        cipher: Arc<dyn IFileCipher>,
        storage: Arc<dyn IRemoteStorage>,
        reconciler: Arc<BatchReconciler>,
    ) -> Self {
        Self {
            root,
            remote_root,
            locks,
            stability,
            retry,
            cipher,
            storage,
            reconciler,
        }
    }

    /// Run the full pipeline for one file
    ///
    /// # Errors
    /// Returns the first failing step's error; the lock is released and the
    /// temporary artifact removed before returning.
    #[tracing::instrument(skip(self, path, cancel), fields(path = %path.display()))]
    pub async fn process(&self, path: &Path, cancel: &CancellationToken) -> Result<PipelineOutcome> {
        let source = SyncPath::new_within_root(path.to_path_buf(), &self.root)?;

        self.locks
            .acquire_with_timeout(source.as_path(), cancel)
            .await
            .context("Could not lock file")?;

        let result = self.encrypt_and_upload(&source, cancel).await;

        if let Err(e) = self.locks.release(source.as_path()).await {
            warn!(error = %e, "Failed to release lock");
        }

        let outcome = result?;
        if let PipelineOutcome::Uploaded(remote) = &outcome {
            info!(%remote, "Uploaded and verified");
            self.reconciler.trigger(SyncDirection::LocalToRemote);
        }
        Ok(outcome)
    }

    /// Delete the remote copy of a file that no longer exists locally
    ///
    /// Returns `Ok(None)` when the path exists again or the remote holds no
    /// copy of it.
    ///
    /// # Errors
    /// Fails when the lock cannot be taken or the delete keeps failing after
    /// retries.
    #[tracing::instrument(skip(self, path, cancel), fields(path = %path.display()))]
    pub async fn remove_remote(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<RemotePath>> {
        let source = SyncPath::new_within_root(path.to_path_buf(), &self.root)?;
        let remote = self.remote_artifact(&source)?;

        self.locks
            .acquire_with_timeout(source.as_path(), cancel)
            .await
            .context("Could not lock file")?;

        let result = self.delete_if_gone(&source, &remote, cancel).await;

        if let Err(e) = self.locks.release(source.as_path()).await {
            warn!(error = %e, "Failed to release lock");
        }
        result
    }

    async fn delete_if_gone(
        &self,
        source: &SyncPath,
        remote: &RemotePath,
        cancel: &CancellationToken,
    ) -> Result<Option<RemotePath>> {
        match tokio::fs::symlink_metadata(source.as_path()).await {
            Ok(_) => {
                debug!("Path exists again, keeping remote copy");
                return Ok(None);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("Could not stat removed path"),
        }

        let storage = self.storage.as_ref();
        let deleted = self
            .retry
            .run("delete", cancel, |_| async move {
                match storage.delete_one(remote).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await
            .with_context(|| format!("Deleting {remote} failed"))?;

        if deleted {
            info!(%remote, "Deleted remote copy");
            Ok(Some(remote.clone()))
        } else {
            debug!(%remote, "No remote copy to delete");
            Ok(None)
        }
    }

    /// Remote location of `source`'s encrypted artifact
    fn remote_artifact(&self, source: &SyncPath) -> Result<RemotePath> {
        let artifact = source.with_suffix(ENC_SUFFIX);
        Ok(self
            .remote_root
            .join_relative(&artifact.relative_to(&self.root)?)?)
    }

    async fn encrypt_and_upload(
        &self,
        source: &SyncPath,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        match self.stability.wait_for_stable(source.as_path(), cancel).await {
            Ok(()) => {}
            Err(SyncError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!("File vanished before upload");
                return Ok(PipelineOutcome::Vanished);
            }
            Err(e) => return Err(e).context("File did not settle"),
        }

        let artifact = source.with_suffix(ENC_SUFFIX);
        let remote = self.remote_artifact(source)?;

        let cipher = Arc::clone(&self.cipher);
        let (input, output) = (
            source.as_path().to_path_buf(),
            artifact.as_path().to_path_buf(),
        );
        let encrypted = tokio::task::spawn_blocking(move || cipher.encrypt_file(&input, &output))
            .await
            .context("Encryption task failed")?;
        if let Err(e) = encrypted {
            remove_artifact(artifact.as_path()).await;
            return Err(e.context("Encryption failed"));
        }

        let uploaded = self.upload_verified(artifact.as_path(), &remote, cancel).await;
        remove_artifact(artifact.as_path()).await;
        uploaded.with_context(|| format!("Upload to {remote} failed"))?;

        Ok(PipelineOutcome::Uploaded(remote))
    }

    async fn upload_verified(
        &self,
        artifact: &Path,
        remote: &RemotePath,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let storage = self.storage.as_ref();
        self.retry
            .run("upload", cancel, |attempt| async move {
                storage.copy_one(artifact, remote).await?;
                debug!(attempt, %remote, "Copy finished, verifying");
                verify_upload(storage, remote).await
            })
            .await
    }
}

/// Confirm `remote` exists
///
/// Some remotes answer "directory not found" for a missing subpath rather
/// than for the object; that answer is accepted when the parent lists.
pub async fn verify_upload(storage: &dyn IRemoteStorage, remote: &RemotePath) -> Result<(), SyncError> {
    let target = StorageLocation::Remote(remote.clone());
    match storage.list_files(&target, ListOptions::flat()).await {
        Ok(entries) if !entries.is_empty() => Ok(()),
        Ok(_) => Err(SyncError::Verification(format!(
            "{remote} is missing after upload"
        ))),
        Err(e) if e.is_not_found() => {
            let parent = remote.parent().ok_or_else(|| {
                SyncError::Verification(format!("{remote} has no parent to check"))
            })?;
            storage
                .list_files(&StorageLocation::Remote(parent.clone()), ListOptions::flat())
                .await
                .map_err(|e| {
                    SyncError::Verification(format!("{remote} not found and {parent} unreachable: {e}"))
                })?;
            debug!(%remote, "Object not listed but parent reachable, accepting");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, MemoryStorage, PlainCipher};
    use sealsync_core::ports::StorageError;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    struct BrokenCipher;

    impl IFileCipher for BrokenCipher {
        fn encrypt_file(&self, _input: &Path, output: &Path) -> anyhow::Result<()> {
            std::fs::write(output, b"partial")?;
            anyhow::bail!("cipher failure")
        }

        fn decrypt_file(&self, _input: &Path, _output: &Path) -> anyhow::Result<()> {
            anyhow::bail!("cipher failure")
        }
    }

    struct Fixture {
        dir: TempDir,
        root: PathBuf,
        storage: Arc<MemoryStorage>,
        pipeline: UploadPipeline,
    }

    fn fixture(cipher: Arc<dyn IFileCipher>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("vault");
        std::fs::create_dir_all(&root).unwrap();
        let lock_dir = dir.path().join(".synclocks");
        let storage = Arc::new(MemoryStorage::default());
        let reconciler = testing::reconciler(
            &root,
            &lock_dir,
            storage.clone(),
            Duration::from_secs(3600),
        );
        let pipeline =
            testing::pipeline(&root, &lock_dir, storage.clone(), cipher, reconciler);
        Fixture {
            dir,
            root,
            storage,
            pipeline,
        }
    }

    #[tokio::test]
    async fn test_uploads_artifact_and_cleans_up() {
        let fx = fixture(Arc::new(PlainCipher));
        let file = fx.root.join("docs/report.txt");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"0123456789").unwrap();

        let outcome = fx
            .pipeline
            .process(&file, &CancellationToken::new())
            .await
            .unwrap();

        let expected = RemotePath::new("backup", "/Watched_folder/docs/report.txt.enc").unwrap();
        assert_eq!(outcome, PipelineOutcome::Uploaded(expected.clone()));
        let copies = fx.storage.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].local, fx.root.join("docs/report.txt.enc"));
        assert_eq!(copies[0].remote, expected.to_string());
        assert!(copies[0].local_existed);
        assert!(!fx.root.join("docs/report.txt.enc").exists());
        // Lock released
        assert!(fx
            .pipeline
            .locks
            .acquire(&file)
            .await
            .unwrap());
        drop(fx.dir);
    }

    #[tokio::test]
    async fn test_upload_retries_then_succeeds() {
        let fx = fixture(Arc::new(PlainCipher));
        fx.storage.copy_failures.store(2, Ordering::SeqCst);
        let file = fx.root.join("a.txt");
        std::fs::write(&file, b"abc").unwrap();

        fx.pipeline
            .process(&file, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fx.storage.copy_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_upload_still_cleans_up() {
        let fx = fixture(Arc::new(PlainCipher));
        fx.storage.copy_failures.store(10, Ordering::SeqCst);
        let file = fx.root.join("a.txt");
        std::fs::write(&file, b"abc").unwrap();

        let err = fx
            .pipeline
            .process(&file, &CancellationToken::new())
            .await;
        assert!(err.is_err());
        assert_eq!(fx.storage.copy_count(), 3);
        assert!(!fx.root.join("a.txt.enc").exists());
        assert!(fx.pipeline.locks.acquire(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_encryption_failure_removes_partial_artifact() {
        let fx = fixture(Arc::new(BrokenCipher));
        let file = fx.root.join("a.txt");
        std::fs::write(&file, b"abc").unwrap();

        assert!(fx
            .pipeline
            .process(&file, &CancellationToken::new())
            .await
            .is_err());
        assert!(!fx.root.join("a.txt.enc").exists());
        assert_eq!(fx.storage.copy_count(), 0);
    }

    #[tokio::test]
    async fn test_vanished_file_is_not_an_error() {
        let fx = fixture(Arc::new(PlainCipher));
        let outcome = fx
            .pipeline
            .process(&fx.root.join("gone.txt"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Vanished);
        assert_eq!(fx.storage.copy_count(), 0);
    }

    #[tokio::test]
    async fn test_path_outside_root_is_rejected() {
        let fx = fixture(Arc::new(PlainCipher));
        let outside = fx.dir.path().join("elsewhere.txt");
        std::fs::write(&outside, b"x").unwrap();
        assert!(fx
            .pipeline
            .process(&outside, &CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_remove_remote_deletes_uploaded_copy() {
        let fx = fixture(Arc::new(PlainCipher));
        let file = fx.root.join("docs/report.txt");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"0123456789").unwrap();
        let cancel = CancellationToken::new();
        fx.pipeline.process(&file, &cancel).await.unwrap();

        std::fs::remove_file(&file).unwrap();
        let removed = fx.pipeline.remove_remote(&file, &cancel).await.unwrap();

        let expected = "backup:/Watched_folder/docs/report.txt.enc";
        assert_eq!(removed.map(|r| r.to_string()).as_deref(), Some(expected));
        assert!(!fx.storage.has_object(expected));
        assert!(fx.pipeline.locks.acquire(&file).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_remote_without_copy_is_not_an_error() {
        let fx = fixture(Arc::new(PlainCipher));
        let removed = fx
            .pipeline
            .remove_remote(&fx.root.join("never.txt"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(removed, None);
        assert_eq!(
            fx.storage.deletes(),
            vec!["backup:/Watched_folder/never.txt.enc".to_string()]
        );
    }

    #[tokio::test]
    async fn test_remove_remote_keeps_copy_of_existing_file() {
        let fx = fixture(Arc::new(PlainCipher));
        let file = fx.root.join("a.txt");
        std::fs::write(&file, b"abc").unwrap();
        let cancel = CancellationToken::new();
        fx.pipeline.process(&file, &cancel).await.unwrap();

        let removed = fx.pipeline.remove_remote(&file, &cancel).await.unwrap();
        assert_eq!(removed, None);
        assert!(fx.storage.deletes().is_empty());
        assert!(fx.storage.has_object("backup:/Watched_folder/a.txt.enc"));
    }

    #[tokio::test]
    async fn test_verify_accepts_not_found_when_parent_lists() {
        let storage = MemoryStorage::default();
        let remote = RemotePath::new("backup", "/Watched_folder/a.txt.enc").unwrap();
        storage.script_list(Err(StorageError::NotFound("directory not found".into())));
        storage.script_list(Ok(vec!["other.enc".into()]));
        verify_upload(&storage, &remote).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_rejects_not_found_when_parent_unreachable() {
        let storage = MemoryStorage::default();
        let remote = RemotePath::new("backup", "/Watched_folder/a.txt.enc").unwrap();
        storage.script_list(Err(StorageError::NotFound("directory not found".into())));
        storage.script_list(Err(StorageError::Transport {
            operation: "lsf".into(),
            message: "timeout".into(),
        }));
        assert!(matches!(
            verify_upload(&storage, &remote).await,
            Err(SyncError::Verification(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_rejects_empty_listing() {
        let storage = MemoryStorage::default();
        let remote = RemotePath::new("backup", "/Watched_folder/a.txt.enc").unwrap();
        storage.script_list(Ok(Vec::new()));
        assert!(verify_upload(&storage, &remote).await.is_err());
    }
}
