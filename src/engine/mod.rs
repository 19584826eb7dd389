//! The persistence engine boundary.
//!
//! The session provider only ever talks to an engine through these traits:
//!
//! ```text
//! PersistenceEngine::open(unit, properties) -> EngineHandle
//!     EngineHandle::new_session()           -> EngineSession
//!         EngineSession::transaction()      -> EngineTransaction
//!             begin / commit / rollback / is_active
//!         EngineSession::close()
//!     EngineHandle::close()
//! ```
//!
//! Two engines ship with the crate: [`git::GitEngine`] stores documents in a
//! git repository through the storage layer, and [`memory::MemoryEngine`]
//! keeps everything in process and records every lifecycle event, which makes
//! it the engine of choice for tests.

use std::collections::BTreeMap;

mod error;
pub mod git;
pub mod memory;

pub use error::{EngineError, EngineResult};

/// Free-form engine configuration, keyed by property name.
pub type Properties = BTreeMap<String, String>;

/// Factory for engine handles.
pub trait PersistenceEngine: Send + Sync + 'static {
    type Handle: EngineHandle<Session = Self::Session>;
    type Session: EngineSession;

    /// Start the engine for the named persistence unit.
    fn open(&self, unit: &str, properties: &Properties) -> EngineResult<Self::Handle>;
}

/// A started engine; the source of sessions.
pub trait EngineHandle: Send + Sync + 'static {
    type Session: EngineSession;

    fn new_session(&self) -> EngineResult<Self::Session>;

    /// Shut the engine down. Closing twice reports [`EngineError::Closed`].
    fn close(&self) -> EngineResult<()>;

    fn is_open(&self) -> bool;
}

/// One unit-of-work connection to the engine.
pub trait EngineSession {
    type Transaction: EngineTransaction;

    /// The session's transaction, active or not.
    fn transaction(&mut self) -> &mut Self::Transaction;

    fn close(self) -> EngineResult<()>;
}

/// The atomic boundary within a session.
pub trait EngineTransaction {
    fn begin(&mut self) -> EngineResult<()>;
    fn commit(&mut self) -> EngineResult<()>;
    fn rollback(&mut self) -> EngineResult<()>;
    fn is_active(&self) -> bool;
}

/// Read a boolean property, falling back to `default` when absent.
pub(crate) fn bool_property(
    properties: &Properties,
    key: &str,
    default: bool,
) -> EngineResult<bool> {
    match properties.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "yes" | "1") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "no" | "0") => Ok(false),
        Some(v) => Err(EngineError::InvalidProperty {
            key: key.to_string(),
            value: v,
            reason: "expected a boolean".to_string(),
        }),
    }
}
