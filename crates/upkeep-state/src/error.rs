//! Error types for upkeep-state

use thiserror::Error;

/// Errors raised by storage backends and the backup catalog.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Payload missing at the given location
    #[error("payload not found at {location}")]
    NotFound { location: String },

    /// Artifact id missing from the catalog
    #[error("artifact not found in catalog: {id}")]
    ArtifactNotFound { id: String },

    /// Artifact id already present in the catalog
    #[error("artifact already cataloged: {id}")]
    DuplicateArtifact { id: String },

    /// Storage key contains characters that would escape the backend root
    #[error("invalid storage key: {key}")]
    InvalidKey { key: String },

    /// Digest string is not 64 lowercase hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Backend could not be reached
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Filesystem error
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog (de)serialization error
    #[error("catalog serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
