//! RcloneStorage - IRemoteStorage implementation on top of the rclone CLI
//!
//! ## Design Notes
//!
//! - Argument lists are built by pure functions so they can be checked
//!   without spawning a process.
//! - Bulk syncs let rclone parallelise (`--transfers`/`--checkers` from
//!   config); single-file copies run with one transfer and quiet stats.
//! - rclone's own retries are kept small; the engine's backoff policy sits
//!   on top of them.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use sealsync_core::config::TransferConfig;
use sealsync_core::domain::{RemotePath, SyncDirection};
use sealsync_core::ports::{
    IRemoteStorage, ListOptions, StorageError, StorageLocation, TransferOutput,
};

use crate::command;

/// Remote storage reached through an rclone remote
#[derive(Debug, Clone)]
pub struct RcloneStorage {
    binary: String,
    remote: String,
    transfers: u32,
    checkers: u32,
    bulk_timeout: Duration,
    list_timeout: Duration,
    verify_timeout: Duration,
}

impl RcloneStorage {
    /// Create a storage adapter for the rclone remote named `remote`
    #[must_use]
    pub fn new(config: &TransferConfig, remote: impl Into<String>) -> Self {
        Self {
            binary: config.binary.clone(),
            remote: remote.into(),
            transfers: config.transfers,
            checkers: config.checkers,
            bulk_timeout: config.bulk_timeout(),
            list_timeout: config.list_timeout(),
            verify_timeout: config.verify_timeout(),
        }
    }

    /// Name of the rclone remote
    #[must_use]
    pub fn remote(&self) -> &str {
        &self.remote
    }
}

/// Arguments for `rclone sync`
#[must_use]
pub fn sync_args(
    direction: SyncDirection,
    local_root: &Path,
    remote_root: &RemotePath,
    excludes: &[String],
    transfers: u32,
    checkers: u32,
) -> Vec<String> {
    let local = local_root.display().to_string();
    let remote = remote_root.to_string();
    let (source, dest) = match direction {
        SyncDirection::LocalToRemote => (local, remote),
        SyncDirection::RemoteToLocal => (remote, local),
    };

    let mut args = vec![
        "sync".to_string(),
        source,
        dest,
        "--create-empty-src-dirs".to_string(),
    ];
    for pattern in excludes {
        args.push("--exclude".to_string());
        args.push(pattern.clone());
    }
    args.extend(
        [
            "--retries",
            "2",
            "--low-level-retries",
            "3",
            "--stats",
            "30s",
            "--transfers",
        ]
        .map(String::from),
    );
    args.push(transfers.to_string());
    args.push("--checkers".to_string());
    args.push(checkers.to_string());
    args
}

/// Arguments for `rclone copyto`
#[must_use]
pub fn copy_args(local: &Path, remote: &RemotePath) -> Vec<String> {
    let mut args = vec![
        "copyto".to_string(),
        local.display().to_string(),
        remote.to_string(),
    ];
    args.extend(
        [
            "--retries",
            "2",
            "--low-level-retries",
            "3",
            "--stats",
            "0",
            "--transfers",
            "1",
            "--checkers",
            "1",
        ]
        .map(String::from),
    );
    args
}

/// Arguments for `rclone deletefile`
#[must_use]
pub fn delete_args(remote: &RemotePath) -> Vec<String> {
    vec![
        "deletefile".to_string(),
        remote.to_string(),
        "--retries".to_string(),
        "2".to_string(),
    ]
}

/// Arguments for `rclone lsf`
#[must_use]
pub fn list_args(target: &StorageLocation, options: ListOptions) -> Vec<String> {
    let mut args = vec!["lsf".to_string(), target.to_string()];
    if options.recursive {
        args.push("--recursive".to_string());
        args.push("--files-only".to_string());
    }
    if let Some(depth) = options.max_depth {
        args.push("--max-depth".to_string());
        args.push(depth.to_string());
    }
    args
}

fn non_empty_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl IRemoteStorage for RcloneStorage {
    #[tracing::instrument(skip(self, excludes), fields(remote = %remote_root))]
    async fn bulk_sync(
        &self,
        direction: SyncDirection,
        local_root: &Path,
        remote_root: &RemotePath,
        excludes: &[String],
    ) -> Result<TransferOutput, StorageError> {
        let args = sync_args(
            direction,
            local_root,
            remote_root,
            excludes,
            self.transfers,
            self.checkers,
        );
        let output = command::run(&self.binary, "sync", &args, self.bulk_timeout).await?;
        info!(%direction, "rclone sync finished");
        Ok(output)
    }

    async fn copy_one(
        &self,
        local: &Path,
        remote: &RemotePath,
    ) -> Result<TransferOutput, StorageError> {
        let args = copy_args(local, remote);
        let output = command::run(&self.binary, "copyto", &args, self.bulk_timeout).await?;
        debug!(local = %local.display(), %remote, "rclone copyto finished");
        Ok(output)
    }

    async fn delete_one(&self, remote: &RemotePath) -> Result<TransferOutput, StorageError> {
        let args = delete_args(remote);
        let output = command::run(&self.binary, "deletefile", &args, self.verify_timeout).await?;
        debug!(%remote, "rclone deletefile finished");
        Ok(output)
    }

    async fn list_files(
        &self,
        target: &StorageLocation,
        options: ListOptions,
    ) -> Result<Vec<String>, StorageError> {
        let timeout = if options.recursive {
            self.list_timeout
        } else {
            self.verify_timeout
        };
        let args = list_args(target, options);
        let output = command::run(&self.binary, "lsf", &args, timeout).await?;
        Ok(non_empty_lines(&output.stdout))
    }

    async fn test_connection(&self) -> Result<(), StorageError> {
        command::run(
            &self.binary,
            "version",
            &["version".to_string()],
            self.verify_timeout,
        )
        .await?;
        command::run(
            &self.binary,
            "lsd",
            &["lsd".to_string(), format!("{}:", self.remote)],
            self.verify_timeout,
        )
        .await?;
        info!(remote = %self.remote, "rclone connection verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn remote_root() -> RemotePath {
        RemotePath::new("backup", "/Watched_folder").unwrap()
    }

    #[test]
    fn test_sync_args_local_to_remote() {
        let excludes = vec!["*.synclock".to_string(), ".synclocks/**".to_string()];
        let args = sync_args(
            SyncDirection::LocalToRemote,
            Path::new("/vault"),
            &remote_root(),
            &excludes,
            4,
            8,
        );
        assert_eq!(args[0], "sync");
        assert_eq!(args[1], "/vault");
        assert_eq!(args[2], "backup:/Watched_folder");
        assert_eq!(args[3], "--create-empty-src-dirs");
        assert_eq!(
            &args[4..8],
            ["--exclude", "*.synclock", "--exclude", ".synclocks/**"]
        );
        let tail = &args[args.len() - 4..];
        assert_eq!(tail, ["--transfers", "4", "--checkers", "8"]);
        assert!(args.windows(2).any(|w| w == ["--stats", "30s"]));
    }

    #[test]
    fn test_sync_args_remote_to_local_swaps_ends() {
        let args = sync_args(
            SyncDirection::RemoteToLocal,
            Path::new("/vault"),
            &remote_root(),
            &[],
            4,
            8,
        );
        assert_eq!(args[1], "backup:/Watched_folder");
        assert_eq!(args[2], "/vault");
        assert!(!args.contains(&"--exclude".to_string()));
    }

    #[test]
    fn test_copy_args() {
        let remote = remote_root().join("a.txt.enc").unwrap();
        let args = copy_args(Path::new("/vault/a.txt.enc"), &remote);
        assert_eq!(
            &args[..3],
            ["copyto", "/vault/a.txt.enc", "backup:/Watched_folder/a.txt.enc"]
        );
        assert!(args.windows(2).any(|w| w == ["--transfers", "1"]));
        assert!(args.windows(2).any(|w| w == ["--stats", "0"]));
    }

    #[test]
    fn test_delete_args() {
        let remote = remote_root().join("a.txt.enc").unwrap();
        assert_eq!(
            delete_args(&remote),
            ["deletefile", "backup:/Watched_folder/a.txt.enc", "--retries", "2"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_one_runs_deletefile() {
        let config = TransferConfig {
            binary: "echo".to_string(),
            ..TransferConfig::default()
        };
        let storage = RcloneStorage::new(&config, "backup");
        let remote = remote_root().join("gone.txt.enc").unwrap();
        let output = storage.delete_one(&remote).await.unwrap();
        assert!(output.stdout.starts_with("deletefile backup:/Watched_folder/gone.txt.enc"));
    }

    #[test]
    fn test_list_args() {
        let flat = list_args(
            &StorageLocation::Remote(remote_root()),
            ListOptions::flat(),
        );
        assert_eq!(flat, ["lsf", "backup:/Watched_folder"]);

        let deep = list_args(
            &StorageLocation::Local(PathBuf::from("/vault")),
            ListOptions::recursive(Some(3)),
        );
        assert_eq!(
            deep,
            ["lsf", "/vault", "--recursive", "--files-only", "--max-depth", "3"]
        );
    }

    #[test]
    fn test_non_empty_lines() {
        assert_eq!(
            non_empty_lines("a.txt\n\n  b/c.txt \n"),
            vec!["a.txt".to_string(), "b/c.txt".to_string()]
        );
        assert!(non_empty_lines("").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_files_parses_process_output() {
        // `echo` prints its arguments, standing in for a listing
        let config = TransferConfig {
            binary: "echo".to_string(),
            ..TransferConfig::default()
        };
        let storage = RcloneStorage::new(&config, "backup");
        let lines = storage
            .list_files(
                &StorageLocation::Remote(remote_root()),
                ListOptions::flat(),
            )
            .await
            .unwrap();
        assert_eq!(lines, vec!["lsf backup:/Watched_folder".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connection_failure_surfaces() {
        let config = TransferConfig {
            binary: "false".to_string(),
            ..TransferConfig::default()
        };
        let storage = RcloneStorage::new(&config, "backup");
        assert!(storage.test_connection().await.is_err());
    }
}
