//! Transactional interception.
//!
//! [`TransactionInterceptor`] wraps a business call so that a transaction is
//! open while it runs and is committed or rolled back afterwards:
//!
//! ```text
//! invoke(cx, invocation)
//!   ├─ no session on cx?      begin one, remember we own it
//!   ├─ transaction active?    join: proceed, return as is
//!   ├─ begin transaction
//!   ├─ proceed
//!   │    ├─ Ok                commit (a commit failure is returned)
//!   │    ├─ Err(e)            policy says rollback? rollback : commit; return e
//!   │    └─ panic             rollback, then resume unwinding
//!   └─ owned session?         end it
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gitwork::transaction::{RollbackPolicy, TransactionInterceptor};
//!
//! let interceptor = TransactionInterceptor::new(provider);
//! let mut cx = interceptor.provider().context();
//!
//! interceptor.run(&mut cx, |cx| {
//!     cx.session()?.put(&users, key, json!({"name": "Alice"}))?;
//!     Ok::<_, WorkError>(())
//! })?;
//! ```

mod interceptor;
mod invocation;
mod policy;

pub use interceptor::TransactionInterceptor;
pub use invocation::{Invocation, InvokeError, Transactional};
pub use policy::{Classify, ErrorKind, RollbackPolicy};
