//! SealSync Sync - Watch-and-sync orchestration engine
//!
//! Keeps a local tree mirrored, encrypted, to a remote:
//! - Priority-tiered directory watch registration
//! - Per-file lock → stable → encrypt → upload → verify pipeline
//! - Debounced, coalesced whole-tree reconciliation in both directions
//! - Cross-process file locks backed by marker files
//!
//! ## Modules
//!
//! - [`backoff`] - Bounded retry with quadratic backoff
//! - [`dispatcher`] - Routes filesystem events to the pipeline, scheduler and reconciler
//! - [`engine`] - Wires everything together behind [`start_watcher`]
//! - [`lock`] - Marker-file lock manager
//! - [`pending`] - In-flight operation table with duplicate suppression
//! - [`pipeline`] - Per-file encrypt/upload pipeline
//! - [`reconciler`] - Debounced bulk sync with verification
//! - [`restore`] - Decrypts pulled `.enc` files in place
//! - [`scheduler`] - Priority watch scheduler and worker pool
//! - [`stability`] - Write-stability detection
//! - [`watcher`] - `notify`-backed filesystem watcher
//! - `testing` - In-memory port fakes, behind the `test-support` feature

pub mod backoff;
pub mod dispatcher;
pub mod engine;
pub mod lock;
pub mod pending;
pub mod pipeline;
pub mod reconciler;
pub mod restore;
pub mod scheduler;
pub mod stability;
pub mod watcher;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use sealsync_core::ports::StorageError;

pub use engine::{start_watcher, WatchEngine};

/// Suffix of the temporary encrypted artifact written next to a file
pub const ENC_SUFFIX: &str = ".enc";

/// Suffix of lock marker files that must never be transferred
pub const SYNCLOCK_SUFFIX: &str = ".synclock";

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Released a lock that was not held
    #[error("Lock not held: {0}")]
    LockNotHeld(PathBuf),

    /// Could not acquire a lock within the wait limit
    #[error("Timed out after {waited:?} waiting for lock on {path}")]
    LockTimeout {
        /// Locked path
        path: PathBuf,
        /// How long the caller waited
        waited: Duration,
    },

    /// A remote storage call failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A transfer succeeded but its result could not be confirmed
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Work was abandoned because the engine is shutting down
    #[error("Cancelled")]
    Cancelled,

    /// A domain-level error propagated from sealsync-core
    #[error("Domain error: {0}")]
    Domain(#[from] sealsync_core::domain::DomainError),
}
