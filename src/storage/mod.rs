//! Storage layer for gitwork.
//!
//! A small document store on top of git. Upper layers (the git engine) use
//! this API and never touch git2 directly.
//!
//! # Layout
//!
//! ```text
//! <root tree>
//!   users/                 <- collection (tree)
//!     01hx....json         <- document (blob)
//!   orders/
//!     42.json
//! ```
//!
//! Writes never move a branch by themselves: they return a new commit whose
//! parent is the commit the caller read from. Transactions accumulate such
//! commits on a `tx/<id>` branch and publish them with a compare-and-swap
//! fast-forward of `main`.
//!
//! # Usage
//!
//! ```ignore
//! use gitwork::storage::{CollectionName, Document, DocumentKey, GitSignature, GitStore};
//!
//! let store = GitStore::open_or_init("./data", GitSignature::default())?;
//! let head = store.head()?;
//!
//! let users = CollectionName::new("users")?;
//! let doc = Document::new(DocumentKey::generate(), json!({"name": "Alice"}));
//! let next = store.write_document(&users, &doc, head, "add alice")?;
//! ```

mod document;
mod error;
mod repository;
mod types;

pub use document::Document;
pub use error::{StorageError, StorageResult};
pub use repository::{CommitSummary, GitStore};
pub use types::{
    document_path, BranchName, CollectionName, CommitId, DocumentKey, GitSignature,
    InvalidNameError,
};
