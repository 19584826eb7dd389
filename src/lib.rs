//! gitwork - units of work and transactional interception over a
//! Git-backed document store.
//!
//! The crate is layered:
//!
//! - [`storage`]: documents as JSON blobs in a git repository, transaction
//!   branches and compare-and-swap publishing of `main`.
//! - [`engine`]: the persistence engine boundary, with a git engine and an
//!   in-memory engine.
//! - [`work`]: the session provider, which owns the engine lifecycle and
//!   binds one session to each [`work::WorkContext`].
//! - [`transaction`]: the interceptor that opens, joins, commits and rolls
//!   back transactions around business calls.
//!
//! # Example
//!
//! ```no_run
//! use gitwork::engine::git::{GitEngine, PATH};
//! use gitwork::storage::{CollectionName, DocumentKey};
//! use gitwork::transaction::TransactionInterceptor;
//! use gitwork::work::{SessionProvider, UnitConfig, WorkError};
//! use serde_json::json;
//!
//! let config = UnitConfig::new("app").property(PATH, "./data");
//! let provider = SessionProvider::new(GitEngine, config);
//! provider.start().unwrap();
//!
//! let interceptor = TransactionInterceptor::new(provider.clone());
//! let mut cx = provider.context();
//! let users = CollectionName::new("users").unwrap();
//!
//! interceptor
//!     .run(&mut cx, |cx| {
//!         cx.session()?
//!             .put(&users, DocumentKey::generate(), json!({"name": "Alice"}))?;
//!         Ok::<_, WorkError>(())
//!     })
//!     .unwrap();
//! ```

pub mod engine;
pub mod storage;
pub mod transaction;
pub mod work;

pub use engine::{EngineError, PersistenceEngine};
pub use transaction::{Invocation, InvokeError, RollbackPolicy, TransactionInterceptor};
pub use work::{SessionProvider, UnitConfig, WorkContext, WorkError};
