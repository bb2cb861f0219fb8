//! Domain types for SealSync
//!
//! - Newtypes for validated local and remote paths
//! - Watch priority classification
//! - Bulk sync direction
//! - Domain-specific error types

pub mod errors;
pub mod newtypes;
pub mod sync_task;
pub mod watch;

pub use errors::DomainError;
pub use newtypes::{RemotePath, SyncPath};
pub use sync_task::SyncDirection;
pub use watch::{classify, has_year_token, WatchPriority};
