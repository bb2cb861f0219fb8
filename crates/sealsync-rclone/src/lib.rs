//! SealSync rclone - Remote storage adapter
//!
//! Implements [`IRemoteStorage`](sealsync_core::ports::IRemoteStorage) by
//! driving the external `rclone` binary:
//! - `sync` for whole-tree mirroring in either direction
//! - `copyto` for single-file uploads
//! - `lsf` for verification listings
//! - `version` and `lsd` for connectivity checks
//!
//! ## Modules
//!
//! - [`command`] - Process execution with timeouts and stderr classification
//! - [`storage`] - The `RcloneStorage` port implementation

pub mod command;
pub mod storage;

pub use storage::RcloneStorage;
