//! Engine error types.

use thiserror::Error;

use crate::storage::{InvalidNameError, StorageError};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by a persistence engine, its sessions or transactions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// A configuration property could not be interpreted.
    #[error("invalid property {key}={value}: {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },

    /// The engine handle has been closed.
    #[error("engine is closed")]
    Closed,

    #[error("session {session} already has an active transaction")]
    TransactionActive { session: String },

    #[error("session {session} has no active transaction")]
    NoTransaction { session: String },

    /// Failure reported by the backend itself.
    #[error("backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// Whether retrying the surrounding transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(e) if e.is_retriable())
    }

    pub(crate) fn no_transaction(session: impl Into<String>) -> Self {
        Self::NoTransaction {
            session: session.into(),
        }
    }

    pub(crate) fn transaction_active(session: impl Into<String>) -> Self {
        Self::TransactionActive {
            session: session.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let conflict = EngineError::Storage(StorageError::ConcurrentModification {
            branch: "main".to_string(),
        });
        assert!(conflict.is_retryable());

        assert!(!EngineError::Closed.is_retryable());
        assert!(!EngineError::no_transaction("s1").is_retryable());
        assert_eq!(
            EngineError::no_transaction("s1").to_string(),
            "session s1 has no active transaction"
        );
    }
}
