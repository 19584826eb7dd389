//! Errors raised by the session provider and unit configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Result type for session provider operations.
pub type WorkResult<T> = Result<T, WorkError>;

#[derive(Debug, Error)]
pub enum WorkError {
    /// The engine could not be opened; the provider stays stopped.
    #[error("failed to start persistence unit '{unit}': {source}")]
    EngineStart {
        unit: String,
        #[source]
        source: EngineError,
    },

    #[error("persistence unit '{0}' is not started")]
    NotStarted(String),

    #[error(
        "session requested, but no unit of work has begun; bracket the work with \
         begin() and end(), or run it through the transaction interceptor"
    )]
    NoActiveSession,

    /// The engine reported itself closed while the provider believed it open.
    #[error("persistence unit '{0}' is already shut down")]
    AlreadyClosed(String),

    /// An invocation that opened its own session found a transaction already
    /// running on it.
    #[error("transaction already active on a session this invocation just opened")]
    JoinConflict,

    #[error("work context belongs to a different session provider")]
    ForeignContext,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl WorkError {
    /// Broken internal state; these are logged at error level.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, WorkError::JoinConflict | WorkError::AlreadyClosed(_))
    }

    /// Misuse of the provider API by the caller.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            WorkError::NotStarted(_) | WorkError::NoActiveSession | WorkError::ForeignContext
        )
    }
}

/// Errors loading a [`UnitConfig`](super::UnitConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid unit configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("persistence unit name must not be empty")]
    MissingUnitName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(WorkError::JoinConflict.is_invariant_violation());
        assert!(WorkError::AlreadyClosed("test".into()).is_invariant_violation());
        assert!(!WorkError::NoActiveSession.is_invariant_violation());

        assert!(WorkError::NoActiveSession.is_usage_error());
        assert!(WorkError::NotStarted("test".into()).is_usage_error());
        assert!(!WorkError::Engine(EngineError::Closed).is_usage_error());
    }

    #[test]
    fn test_no_active_session_message() {
        let msg = WorkError::NoActiveSession.to_string();
        assert!(msg.contains("begin()"));
        assert!(msg.contains("end()"));
        assert!(msg.contains("transaction interceptor"));
    }
}
