//! Domain-level error taxonomy for Upkeep.

use upkeep_state::StorageError;

/// Upkeep domain errors.
///
/// `Config` is fatal and raised before any engine runs. Every other variant is
/// contained at the item or engine boundary that produced it.
#[derive(Debug, thiserror::Error)]
pub enum UpkeepError {
    #[error("invalid policy: {0}")]
    Config(String),

    #[error("{collaborator} unavailable: {detail}")]
    CollaboratorUnavailable { collaborator: String, detail: String },

    #[error("backup verification failed for {location}: {detail}")]
    Verification { location: String, detail: String },

    #[error("gating tests failed: {0}")]
    TestFailure(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UpkeepError {
    /// Shorthand for a `CollaboratorUnavailable` error.
    pub fn unavailable(collaborator: impl Into<String>, detail: impl Into<String>) -> Self {
        UpkeepError::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            detail: detail.into(),
        }
    }

    /// Whether the error means "could not reach the collaborator".
    ///
    /// Timeouts fall in the same class as unreachable tools or storage.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpkeepError::CollaboratorUnavailable { .. }
                | UpkeepError::Timeout { .. }
                | UpkeepError::Storage(StorageError::Unavailable(_))
        )
    }
}

/// Result type for Upkeep domain operations.
pub type Result<T> = std::result::Result<T, UpkeepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpkeepError::Config("hour_of_day must be < 24".to_string());
        assert!(err.to_string().contains("invalid policy"));

        let err = UpkeepError::unavailable("pip-audit", "binary not found");
        assert_eq!(err.to_string(), "pip-audit unavailable: binary not found");

        let err = UpkeepError::Timeout {
            operation: "test suite".to_string(),
            timeout_ms: 1500,
        };
        assert!(err.to_string().contains("1500 ms"));

        let err: UpkeepError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(err.to_string().starts_with("serialization error"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(UpkeepError::unavailable("bandit", "missing").is_transient());
        assert!(UpkeepError::Timeout {
            operation: "scan".to_string(),
            timeout_ms: 1
        }
        .is_transient());
        assert!(UpkeepError::Storage(StorageError::Unavailable("down".to_string())).is_transient());
        assert!(!UpkeepError::TestFailure("boom".to_string()).is_transient());
        assert!(!UpkeepError::Config("bad".to_string()).is_transient());
    }
}
