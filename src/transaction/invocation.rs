//! The call being intercepted.

use std::fmt;
use std::marker::PhantomData;

use super::policy::RollbackPolicy;
use crate::engine::PersistenceEngine;
use crate::work::{WorkContext, WorkError};

/// A business call to run inside a transaction.
///
/// Wrappers generated for transactional methods implement this; closures go
/// through [`Transactional`].
pub trait Invocation<E: PersistenceEngine> {
    type Output;
    type Error;

    /// Which errors roll the transaction back. Defaults to all of them.
    fn rollback_policy(&self) -> RollbackPolicy<Self::Error> {
        RollbackPolicy::always()
    }

    /// Run the call. Invoked at most once.
    fn proceed(self, cx: &mut WorkContext<E>) -> Result<Self::Output, Self::Error>;
}

/// Closure adapter for [`Invocation`].
pub struct Transactional<F, T, Err> {
    body: F,
    policy: RollbackPolicy<Err>,
    _output: PhantomData<fn() -> T>,
}

impl<F, T, Err> Transactional<F, T, Err> {
    pub fn new(body: F) -> Self {
        Self {
            body,
            policy: RollbackPolicy::always(),
            _output: PhantomData,
        }
    }

    pub fn rollback_on(mut self, policy: RollbackPolicy<Err>) -> Self {
        self.policy = policy;
        self
    }
}

impl<E, F, T, Err> Invocation<E> for Transactional<F, T, Err>
where
    E: PersistenceEngine,
    F: FnOnce(&mut WorkContext<E>) -> Result<T, Err>,
{
    type Output = T;
    type Error = Err;

    fn rollback_policy(&self) -> RollbackPolicy<Err> {
        self.policy.clone()
    }

    fn proceed(self, cx: &mut WorkContext<E>) -> Result<T, Err> {
        (self.body)(cx)
    }
}

/// Failure of an intercepted call.
///
/// `Business` carries the invocation's own error untouched; `Work` is a
/// failure of the unit of work around it (session, begin, commit).
#[derive(Debug)]
pub enum InvokeError<E> {
    Business(E),
    Work(WorkError),
}

impl<E> InvokeError<E> {
    pub fn is_business(&self) -> bool {
        matches!(self, InvokeError::Business(_))
    }

    pub fn business(&self) -> Option<&E> {
        match self {
            InvokeError::Business(e) => Some(e),
            InvokeError::Work(_) => None,
        }
    }

    pub fn into_business(self) -> Option<E> {
        match self {
            InvokeError::Business(e) => Some(e),
            InvokeError::Work(_) => None,
        }
    }

    pub fn work(&self) -> Option<&WorkError> {
        match self {
            InvokeError::Work(e) => Some(e),
            InvokeError::Business(_) => None,
        }
    }
}

impl<E> From<WorkError> for InvokeError<E> {
    fn from(e: WorkError) -> Self {
        InvokeError::Work(e)
    }
}

impl<E: fmt::Display> fmt::Display for InvokeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Business(e) => e.fmt(f),
            InvokeError::Work(e) => write!(f, "unit of work failed: {e}"),
        }
    }
}

impl<E> std::error::Error for InvokeError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvokeError::Business(e) => e.source(),
            InvokeError::Work(e) => Some(e),
        }
    }
}
