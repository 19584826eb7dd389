//! The transactional interceptor.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, trace, warn};

use super::invocation::{Invocation, InvokeError, Transactional};
use super::policy::RollbackPolicy;
use crate::engine::{EngineSession, EngineTransaction, PersistenceEngine};
use crate::work::{SessionProvider, WorkContext, WorkError, WorkResult};

type InvokeResult<T, Err> = Result<T, InvokeError<Err>>;

/// How a transaction is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Commit,
    Rollback,
}

enum Outcome<T, Err> {
    Done(InvokeResult<T, Err>),
    Panicked(Box<dyn Any + Send + 'static>),
}

/// Runs invocations inside a transaction of the provider's current session.
///
/// The outermost invocation on a context begins the transaction and decides
/// its fate; invocations nested inside it join without committing, rolling
/// back or closing anything. A session is only ended by the invocation that
/// opened it.
pub struct TransactionInterceptor<E: PersistenceEngine> {
    provider: SessionProvider<E>,
}

impl<E: PersistenceEngine> Clone for TransactionInterceptor<E> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
        }
    }
}

impl<E: PersistenceEngine> TransactionInterceptor<E> {
    pub fn new(provider: SessionProvider<E>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &SessionProvider<E> {
        &self.provider
    }

    /// Run `f` transactionally, rolling back on every error.
    pub fn run<T, Err, F>(&self, cx: &mut WorkContext<E>, f: F) -> InvokeResult<T, Err>
    where
        F: FnOnce(&mut WorkContext<E>) -> Result<T, Err>,
    {
        self.invoke(cx, Transactional::new(f))
    }

    /// Run `f` transactionally under `policy`.
    pub fn run_with<T, Err, F>(
        &self,
        cx: &mut WorkContext<E>,
        policy: RollbackPolicy<Err>,
        f: F,
    ) -> InvokeResult<T, Err>
    where
        F: FnOnce(&mut WorkContext<E>) -> Result<T, Err>,
    {
        self.invoke(cx, Transactional::new(f).rollback_on(policy))
    }

    /// Run `invocation` inside a transaction.
    ///
    /// Business errors come back as [`InvokeError::Business`], unchanged,
    /// after the rollback policy has been applied. A panic in the invocation
    /// rolls back, releases the session and resumes unwinding.
    pub fn invoke<I>(
        &self,
        cx: &mut WorkContext<E>,
        invocation: I,
    ) -> InvokeResult<I::Output, I::Error>
    where
        I: Invocation<E>,
    {
        let owns_session = !self.provider.has_begun(cx);
        if owns_session {
            self.provider.begin(cx)?;
        }

        let outcome = self.demarcate(cx, owns_session, invocation);

        if owns_session {
            if let Err(e) = self.provider.end(cx) {
                warn!(unit = %self.unit(), error = %e, "failed to end session after invocation");
            }
        }

        match outcome {
            Outcome::Done(result) => result,
            Outcome::Panicked(payload) => panic::resume_unwind(payload),
        }
    }

    fn demarcate<I>(
        &self,
        cx: &mut WorkContext<E>,
        owns_session: bool,
        invocation: I,
    ) -> Outcome<I::Output, I::Error>
    where
        I: Invocation<E>,
    {
        let session = match self.provider.get(cx) {
            Ok(session) => session,
            Err(e) => return Outcome::Done(Err(e.into())),
        };
        let tx = session.transaction();

        if tx.is_active() {
            if owns_session {
                error!(unit = %self.unit(), "fresh session already has an active transaction");
                return Outcome::Done(Err(WorkError::JoinConflict.into()));
            }
            trace!(unit = %self.unit(), "joining active transaction");
            return Outcome::Done(invocation.proceed(cx).map_err(InvokeError::Business));
        }

        if let Err(e) = tx.begin() {
            return Outcome::Done(Err(WorkError::from(e).into()));
        }
        trace!(unit = %self.unit(), "transaction begun");

        let policy = invocation.rollback_policy();
        match panic::catch_unwind(AssertUnwindSafe(|| invocation.proceed(cx))) {
            Ok(Ok(value)) => match self.complete(cx, Completion::Commit) {
                Ok(()) => Outcome::Done(Ok(value)),
                Err(e) => Outcome::Done(Err(e.into())),
            },
            Ok(Err(business)) => {
                let completion = if policy.should_rollback(&business) {
                    Completion::Rollback
                } else {
                    Completion::Commit
                };
                if let Err(e) = self.complete(cx, completion) {
                    warn!(
                        unit = %self.unit(),
                        error = %e,
                        ?completion,
                        "failed to finish transaction after business error"
                    );
                }
                Outcome::Done(Err(InvokeError::Business(business)))
            }
            Err(payload) => {
                if let Err(e) = self.complete(cx, Completion::Rollback) {
                    warn!(unit = %self.unit(), error = %e, "failed to roll back after panic");
                }
                Outcome::Panicked(payload)
            }
        }
    }

    fn complete(&self, cx: &mut WorkContext<E>, completion: Completion) -> WorkResult<()> {
        let tx = self.provider.get(cx)?.transaction();
        if !tx.is_active() {
            warn!(unit = %self.unit(), ?completion, "transaction no longer active; nothing to finish");
            return Ok(());
        }

        match completion {
            Completion::Commit => tx.commit()?,
            Completion::Rollback => tx.rollback()?,
        }
        trace!(unit = %self.unit(), ?completion, "transaction finished");
        Ok(())
    }

    fn unit(&self) -> &str {
        &self.provider.config().unit_name
    }
}

impl<E: PersistenceEngine> fmt::Debug for TransactionInterceptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionInterceptor")
            .field("provider", &self.provider)
            .finish()
    }
}
