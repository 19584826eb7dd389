//! Storage layer error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{CollectionName, DocumentKey, InvalidNameError};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("document not found: {collection}/{key}")]
    DocumentNotFound {
        collection: CollectionName,
        key: DocumentKey,
    },

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// stored data failed an integrity check
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    #[error("repository is empty: no commits found")]
    EmptyRepository,

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// compare-and-swap on a branch lost against another writer
    #[error("concurrent modification: branch {branch} was updated by another transaction")]
    ConcurrentModification { branch: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::DocumentNotFound { .. }
                | StorageError::RefNotFound(_)
                | StorageError::CommitNotFound(_)
        )
    }

    /// check if this error is recoverable by retrying the whole transaction
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = StorageError::DocumentNotFound {
            collection: CollectionName::new("users").unwrap(),
            key: DocumentKey::new("1").unwrap(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_retriable());
        assert_eq!(missing.to_string(), "document not found: users/1");

        let moved = StorageError::ConcurrentModification {
            branch: "main".into(),
        };
        assert!(moved.is_retriable());
        assert!(!moved.is_not_found());
    }
}
