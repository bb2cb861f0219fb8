//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync engine depends on; their
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStorage`] - Tree mirroring, single-file copy and listing
//! - [`IFileCipher`] - Whole-file authenticated encryption

pub mod file_cipher;
pub mod remote_storage;

pub use file_cipher::IFileCipher;
pub use remote_storage::{
    IRemoteStorage, ListOptions, StorageError, StorageLocation, TransferOutput,
};
