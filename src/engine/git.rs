//! Git-backed engine.
//!
//! Each transaction gets its own branch (`tx/{ulid}`) where its commits
//! accumulate. Commit fast-forwards `main` to the branch tip, failing if
//! `main` moved since the transaction began; rollback deletes the branch.
//!
//! Recognised properties:
//!
//! | key                    | meaning                                             |
//! |------------------------|-----------------------------------------------------|
//! | `gitwork.path`         | repository directory; a scratch repo when absent    |
//! | `gitwork.create`       | initialise the repository if missing (default true) |
//! | `gitwork.author.name`  | commit author (default: the unit name)              |
//! | `gitwork.author.email` | commit email (default `gitwork@localhost`)          |

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, trace, warn};
use ulid::Ulid;

use super::{
    bool_property, EngineError, EngineHandle, EngineResult, EngineSession, EngineTransaction,
    PersistenceEngine, Properties,
};
use crate::storage::{
    BranchName, CollectionName, CommitId, CommitSummary, Document, DocumentKey, GitSignature,
    GitStore, StorageError,
};

pub const PATH: &str = "gitwork.path";
pub const CREATE: &str = "gitwork.create";
pub const AUTHOR_NAME: &str = "gitwork.author.name";
pub const AUTHOR_EMAIL: &str = "gitwork.author.email";

/// Opens [`GitHandle`]s from unit properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitEngine;

impl PersistenceEngine for GitEngine {
    type Handle = GitHandle;
    type Session = GitSession;

    fn open(&self, unit: &str, properties: &Properties) -> EngineResult<GitHandle> {
        let signature = GitSignature::new(
            properties
                .get(AUTHOR_NAME)
                .map_or(unit, String::as_str),
            properties
                .get(AUTHOR_EMAIL)
                .map_or("gitwork@localhost", String::as_str),
        );

        let (store, scratch) = match properties.get(PATH) {
            Some(path) => {
                let path = PathBuf::from(path);
                let store = if bool_property(properties, CREATE, true)? {
                    GitStore::open_or_init(&path, signature)?
                } else {
                    GitStore::open(&path, signature)?
                };
                (store, None)
            }
            None => {
                let dir = TempDir::new().map_err(StorageError::from)?;
                let store = GitStore::init(dir.path(), signature)?;
                (store, Some(dir))
            }
        };

        debug!(unit, path = %store.path().display(), "git engine opened");
        Ok(GitHandle {
            unit: unit.to_string(),
            store,
            open: AtomicBool::new(true),
            live: Arc::new(Mutex::new(HashSet::new())),
            scratch: Mutex::new(scratch),
        })
    }
}

/// A started git engine.
pub struct GitHandle {
    unit: String,
    store: GitStore,
    open: AtomicBool,
    /// ids of transactions begun through this handle and not yet finished
    live: Arc<Mutex<HashSet<String>>>,
    /// scratch repository, removed on close
    scratch: Mutex<Option<TempDir>>,
}

impl GitHandle {
    pub fn store(&self) -> &GitStore {
        &self.store
    }

    /// Number of transactions currently open through this handle.
    pub fn active_transactions(&self) -> usize {
        self.live.lock().len()
    }

    /// Delete transaction branches that no live transaction of this handle
    /// owns, e.g. leftovers from a crashed process.
    pub fn cleanup_abandoned(&self) -> EngineResult<usize> {
        let live = self.live.lock().clone();
        let mut cleaned = 0;
        for branch in self.store.transaction_branches()? {
            let Some(tx_id) = branch.transaction_id() else {
                continue;
            };
            if !live.contains(tx_id) && self.store.delete_transaction_branch(tx_id).is_ok() {
                cleaned += 1;
            }
        }
        debug!(unit = %self.unit, cleaned, "abandoned transaction branches removed");
        Ok(cleaned)
    }
}

impl EngineHandle for GitHandle {
    type Session = GitSession;

    fn new_session(&self) -> EngineResult<GitSession> {
        if !self.is_open() {
            return Err(EngineError::Closed);
        }
        let id = Ulid::new().to_string().to_lowercase();
        trace!(unit = %self.unit, session = %id, "git session opened");
        Ok(GitSession {
            unit: self.unit.clone(),
            store: self.store.clone(),
            tx: GitTransaction {
                session: id.clone(),
                store: self.store.clone(),
                live: self.live.clone(),
                state: None,
            },
            id,
        })
    }

    fn close(&self) -> EngineResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        if let Some(dir) = self.scratch.lock().take() {
            dir.close().map_err(StorageError::from)?;
        }
        debug!(unit = %self.unit, "git engine closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Session over a git repository.
///
/// Reads see the transaction's own writes while one is active, and the tip of
/// `main` otherwise. Writes require an active transaction.
pub struct GitSession {
    id: String,
    unit: String,
    store: GitStore,
    tx: GitTransaction,
}

impl GitSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn read_commit(&self) -> EngineResult<CommitId> {
        match &self.tx.state {
            Some(active) => Ok(active.current),
            None => Ok(self.store.head()?),
        }
    }

    pub fn get(
        &self,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> EngineResult<Option<Document>> {
        let at = self.read_commit()?;
        Ok(self.store.read_document(collection, key, at)?)
    }

    pub fn list(&self, collection: &CollectionName) -> EngineResult<Vec<DocumentKey>> {
        let at = self.read_commit()?;
        Ok(self.store.list_documents(collection, at)?)
    }

    pub fn collections(&self) -> EngineResult<Vec<CollectionName>> {
        let at = self.read_commit()?;
        Ok(self.store.list_collections(at)?)
    }

    /// Insert or overwrite a document, bumping its version.
    pub fn put(
        &mut self,
        collection: &CollectionName,
        key: DocumentKey,
        body: Value,
    ) -> EngineResult<Document> {
        let document = match self.get(collection, &key)? {
            Some(existing) => existing.revise(body),
            None => Document::new(key, body),
        };
        let message = self.message("put", collection, &document.key)?;
        let active = self.active_mut()?;
        let next = active
            .store
            .write_document(collection, &document, active.current, &message)?;
        active.advance(next)?;
        Ok(document)
    }

    pub fn delete(&mut self, collection: &CollectionName, key: &DocumentKey) -> EngineResult<()> {
        let message = self.message("delete", collection, key)?;
        let active = self.active_mut()?;
        let next = active
            .store
            .remove_document(collection, key, active.current, &message)?;
        active.advance(next)
    }

    /// Commit log of `main`, newest first.
    pub fn history(&self, limit: usize) -> EngineResult<Vec<CommitSummary>> {
        let head = self.store.head()?;
        Ok(self.store.history(head, limit)?)
    }

    fn message(
        &self,
        op: &str,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> EngineResult<String> {
        let tx = self
            .tx
            .state
            .as_ref()
            .ok_or_else(|| EngineError::no_transaction(&self.id))?;
        Ok(format!("[{}] {} {}/{} tx:{}", self.unit, op, collection, key, tx.id))
    }

    fn active_mut(&mut self) -> EngineResult<ActiveWrite<'_>> {
        let state = self
            .tx
            .state
            .as_mut()
            .ok_or_else(|| EngineError::no_transaction(&self.id))?;
        Ok(ActiveWrite {
            store: &self.store,
            current: state.current,
            state,
        })
    }
}

/// Borrowed view used while appending a commit to the transaction branch.
struct ActiveWrite<'a> {
    store: &'a GitStore,
    current: CommitId,
    state: &'a mut ActiveTx,
}

impl ActiveWrite<'_> {
    fn advance(self, next: CommitId) -> EngineResult<()> {
        self.store.update_branch(&self.state.branch, next)?;
        self.state.current = next;
        Ok(())
    }
}

impl EngineSession for GitSession {
    type Transaction = GitTransaction;

    fn transaction(&mut self) -> &mut GitTransaction {
        &mut self.tx
    }

    fn close(mut self) -> EngineResult<()> {
        if self.tx.is_active() {
            warn!(session = %self.id, "closing session with an active transaction; rolling back");
            self.tx.rollback()?;
        }
        trace!(session = %self.id, "git session closed");
        Ok(())
    }
}

struct ActiveTx {
    id: String,
    branch: BranchName,
    base: CommitId,
    current: CommitId,
}

/// Branch-per-transaction state of a [`GitSession`].
pub struct GitTransaction {
    session: String,
    store: GitStore,
    live: Arc<Mutex<HashSet<String>>>,
    state: Option<ActiveTx>,
}

impl GitTransaction {
    /// Id of the active transaction.
    pub fn id(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.id.as_str())
    }

    fn finish(&mut self) -> EngineResult<ActiveTx> {
        let state = self
            .state
            .take()
            .ok_or_else(|| EngineError::no_transaction(&self.session))?;
        self.live.lock().remove(&state.id);
        Ok(state)
    }

    fn drop_branch(&self, tx: &ActiveTx) {
        if let Err(e) = self.store.delete_transaction_branch(&tx.id) {
            warn!(tx = %tx.id, error = %e, "failed to delete transaction branch");
        }
    }
}

impl EngineTransaction for GitTransaction {
    fn begin(&mut self) -> EngineResult<()> {
        if self.state.is_some() {
            return Err(EngineError::transaction_active(&self.session));
        }
        let id = Ulid::new().to_string().to_lowercase();
        let base = self.store.head()?;
        let branch = self.store.create_transaction_branch(&id, base)?;

        self.live.lock().insert(id.clone());
        trace!(session = %self.session, tx = %id, base = %base.short(), "git transaction begun");
        self.state = Some(ActiveTx {
            id,
            branch,
            base,
            current: base,
        });
        Ok(())
    }

    fn commit(&mut self) -> EngineResult<()> {
        let tx = self.finish()?;
        let published = if tx.current == tx.base {
            Ok(tx.base)
        } else {
            self.store.fast_forward_main(&tx.branch, tx.base)
        };
        self.drop_branch(&tx);

        let head = published?;
        trace!(session = %self.session, tx = %tx.id, head = %head.short(), "git transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> EngineResult<()> {
        let tx = self.finish()?;
        self.drop_branch(&tx);
        trace!(session = %self.session, tx = %tx.id, "git transaction rolled back");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.state.is_some()
    }
}
