//! Remote storage port (driven/secondary port)
//!
//! Transfer capabilities the sync engine needs from a remote: mirror a whole
//! tree, copy or delete a single file, list files for verification, and check
//! that the transport is usable at all.
//!
//! ## Design Notes
//!
//! - Errors are typed (`StorageError`) because callers branch on them:
//!   upload verification tolerates `NotFound` on a missing subpath.
//! - Implementations must bound every call with a timeout; the engine never
//!   waits on a transfer indefinitely.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{RemotePath, SyncDirection};

/// Errors reported by a remote storage adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The listed or copied location does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The transfer tool ran but reported failure
    #[error("{operation} failed: {message}")]
    Transport {
        /// Operation name, e.g. `sync` or `copyto`
        operation: String,
        /// Error output of the failed call
        message: String,
    },

    /// The call did not finish within its time limit
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation name
        operation: String,
        /// Configured limit that was exceeded
        after: Duration,
    },

    /// The transfer tool could not be started or its output read
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Whether the error means the target is absent rather than unreachable
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Captured output of a transfer call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Where a listing is taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// A directory on the local filesystem
    Local(PathBuf),
    /// A location on the remote
    Remote(RemotePath),
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(remote) => write!(f, "{remote}"),
        }
    }
}

/// Listing options for [`IRemoteStorage::list_files`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Recursion cap, `None` for unlimited
    pub max_depth: Option<u32>,
}

impl ListOptions {
    /// Non-recursive listing of a single location
    #[must_use]
    pub fn flat() -> Self {
        Self::default()
    }

    /// Recursive listing, optionally capped
    #[must_use]
    pub fn recursive(max_depth: Option<u32>) -> Self {
        Self {
            recursive: true,
            max_depth,
        }
    }
}

/// Port trait for remote storage transfers
///
/// Implementations:
/// - `RcloneStorage` in `sealsync-rclone`
/// - In-memory fakes in the engine's tests
#[async_trait]
pub trait IRemoteStorage: Send + Sync {
    /// Mirror one tree onto the other in the given direction
    ///
    /// `excludes` are glob patterns that are neither transferred nor deleted
    /// on the destination.
    async fn bulk_sync(
        &self,
        direction: SyncDirection,
        local_root: &Path,
        remote_root: &RemotePath,
        excludes: &[String],
    ) -> Result<TransferOutput, StorageError>;

    /// Copy a single local file to an exact remote path
    async fn copy_one(
        &self,
        local: &Path,
        remote: &RemotePath,
    ) -> Result<TransferOutput, StorageError>;

    /// Delete a single remote file
    ///
    /// Returns `StorageError::NotFound` when nothing exists at `remote`.
    async fn delete_one(&self, remote: &RemotePath) -> Result<TransferOutput, StorageError>;

    /// List file paths under `target`, one entry per line of output
    async fn list_files(
        &self,
        target: &StorageLocation,
        options: ListOptions,
    ) -> Result<Vec<String>, StorageError>;

    /// Check that the transport works and the remote is reachable
    async fn test_connection(&self) -> Result<(), StorageError>;
}
