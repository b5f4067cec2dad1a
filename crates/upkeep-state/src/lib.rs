//! Upkeep-State: backup persistence for Upkeep
//!
//! This crate owns everything that must survive a process restart: the
//! backup payloads themselves and the catalog describing them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: payload integrity, append-only catalog semantics, deletion only
//! through retention pruning.
//!
//! ## Key Components
//!
//! - `StorageBackend`: write/verify/delete/list of backup payloads
//! - `BackupCatalog`: durable mapping of artifact id to metadata
//! - `FsStorageBackend` / `FsBackupCatalog`: filesystem implementations
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
mod fs_catalog;
mod fs_storage;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_catalog::FsBackupCatalog;
pub use fs_storage::FsStorageBackend;
pub use storage_traits::{
    ArtifactId, BackupArtifact, BackupCatalog, ContentDigest, Granularity, StorageBackend,
    StorageLocation, StorageResult,
};
