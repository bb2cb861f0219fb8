//! SealSync Core - Domain logic, configuration and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Configuration** - typed YAML configuration with validation and a builder
//! - **Domain types** - `SyncPath`, `RemotePath`, `WatchPriority`, `SyncDirection`
//! - **Port definitions** - Traits for adapters: `IRemoteStorage`, `IFileCipher`
//!
//! # Architecture
//!
//! The domain module contains pure rules with no I/O (path arithmetic,
//! directory priority classification). Ports define the trait interfaces
//! that the adapter crates (`sealsync-rclone`, `sealsync-crypto`) implement
//! and that the orchestration engine in `sealsync-sync` consumes.

pub mod config;
pub mod domain;
pub mod ports;
