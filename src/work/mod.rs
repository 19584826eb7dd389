//! Units of work.
//!
//! A [`SessionProvider`] owns the engine handle of one persistence unit and
//! hands out exactly one session per [`WorkContext`]. Code that talks to the
//! engine brackets its work with `begin`/`end`:
//!
//! ```ignore
//! let provider = SessionProvider::new(GitEngine, UnitConfig::new("orders"));
//! provider.start()?;
//!
//! let mut cx = provider.context();
//! provider.begin(&mut cx)?;
//! let session = provider.get(&mut cx)?;
//! // ...
//! provider.end(&mut cx)?;
//! ```
//!
//! or lets [`SessionProvider::unit_of_work`] (or the transaction interceptor)
//! do the bracketing.

mod config;
mod context;
mod error;
mod provider;

pub use config::UnitConfig;
pub use context::WorkContext;
pub use error::{ConfigError, WorkError, WorkResult};
pub use provider::SessionProvider;
