//! The per-execution-context session slot.

use std::fmt;
use std::marker::PhantomData;

use tracing::{trace, warn};

use super::error::{WorkError, WorkResult};
use crate::engine::{EngineSession, PersistenceEngine};

/// Holds at most one live session for one logical execution context.
///
/// Obtained from [`SessionProvider::context`](super::SessionProvider::context)
/// and passed by `&mut` to every provider call and intercepted invocation.
/// The raw-pointer marker keeps it `!Send` and `!Sync`: a context never
/// migrates to, or is shared with, another thread.
///
/// Dropping a context that still holds a session closes the session.
pub struct WorkContext<E: PersistenceEngine> {
    pub(crate) owner: u64,
    pub(crate) slot: Option<E::Session>,
    _local: PhantomData<*const ()>,
}

impl<E: PersistenceEngine> WorkContext<E> {
    pub(crate) fn new(owner: u64) -> Self {
        Self {
            owner,
            slot: None,
            _local: PhantomData,
        }
    }

    /// Whether this context currently holds a live session.
    pub fn has_begun(&self) -> bool {
        self.slot.is_some()
    }

    /// The live session.
    pub fn session(&mut self) -> WorkResult<&mut E::Session> {
        self.slot.as_mut().ok_or(WorkError::NoActiveSession)
    }
}

impl<E: PersistenceEngine> Drop for WorkContext<E> {
    fn drop(&mut self) {
        if let Some(session) = self.slot.take() {
            warn!(provider = self.owner, "work context dropped with a live session; closing it");
            if let Err(e) = session.close() {
                warn!(provider = self.owner, error = %e, "failed to close abandoned session");
            } else {
                trace!(provider = self.owner, "abandoned session closed");
            }
        }
    }
}

impl<E: PersistenceEngine> fmt::Debug for WorkContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContext")
            .field("provider", &self.owner)
            .field("has_begun", &self.has_begun())
            .finish()
    }
}
