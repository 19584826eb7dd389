//! In-process engine.
//!
//! Documents live in shared maps; each transaction stages its writes and
//! publishes them on commit. Every open/close/begin/commit/rollback is appended
//! to a journal, and [`Faults`] can make individual operations fail, which is
//! how the provider and interceptor tests observe their decisions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{
    EngineError, EngineHandle, EngineResult, EngineSession, EngineTransaction,
    PersistenceEngine, Properties,
};

/// Failures to inject into the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    pub fail_open: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_session_close: bool,
    /// Handles report themselves closed while still open.
    pub report_closed: bool,
    /// New sessions come with a transaction that is already active.
    pub sessions_start_active: bool,
}

/// A lifecycle event recorded by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    EngineOpened { unit: String },
    EngineClosed { unit: String },
    SessionOpened(u64),
    SessionClosed(u64),
    Begin(u64),
    Commit(u64),
    Rollback(u64),
}

impl JournalEntry {
    /// Session the event belongs to, if any.
    pub fn session(&self) -> Option<u64> {
        match self {
            Self::SessionOpened(id)
            | Self::SessionClosed(id)
            | Self::Begin(id)
            | Self::Commit(id)
            | Self::Rollback(id) => Some(*id),
            Self::EngineOpened { .. } | Self::EngineClosed { .. } => None,
        }
    }
}

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
struct MemoryState {
    collections: RwLock<Collections>,
    journal: Mutex<Vec<JournalEntry>>,
    faults: Mutex<Faults>,
    next_session: AtomicU64,
}

impl MemoryState {
    fn record(&self, entry: JournalEntry) {
        self.journal.lock().push(entry);
    }

    fn faults(&self) -> Faults {
        self.faults.lock().clone()
    }
}

/// In-memory engine. Clones share the same data, journal and faults.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjust the injected faults.
    pub fn inject(&self, f: impl FnOnce(&mut Faults)) {
        f(&mut self.state.faults.lock());
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.journal.lock().clone()
    }

    /// Number of journal entries matching `pred`.
    pub fn count(&self, pred: impl Fn(&JournalEntry) -> bool) -> usize {
        self.state.journal.lock().iter().filter(|e| pred(e)).count()
    }

    /// Committed value of a document.
    pub fn document(&self, collection: &str, key: &str) -> Option<Value> {
        self.state
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    /// Number of committed documents in a collection.
    pub fn document_count(&self, collection: &str) -> usize {
        self.state
            .collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("journal_len", &self.state.journal.lock().len())
            .finish()
    }
}

impl PersistenceEngine for MemoryEngine {
    type Handle = MemoryHandle;
    type Session = MemorySession;

    fn open(&self, unit: &str, _properties: &Properties) -> EngineResult<MemoryHandle> {
        if self.state.faults().fail_open {
            return Err(EngineError::Backend(format!(
                "injected open failure for unit '{unit}'"
            )));
        }
        self.state.record(JournalEntry::EngineOpened {
            unit: unit.to_string(),
        });
        Ok(MemoryHandle {
            state: self.state.clone(),
            unit: unit.to_string(),
            open: AtomicBool::new(true),
        })
    }
}

/// Started in-memory engine.
pub struct MemoryHandle {
    state: Arc<MemoryState>,
    unit: String,
    open: AtomicBool,
}

impl EngineHandle for MemoryHandle {
    type Session = MemorySession;

    fn new_session(&self) -> EngineResult<MemorySession> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let id = self.state.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.record(JournalEntry::SessionOpened(id));

        Ok(MemorySession {
            id,
            state: self.state.clone(),
            tx: MemoryTransaction {
                session: id,
                state: self.state.clone(),
                active: self.state.faults().sessions_start_active,
                staged: BTreeMap::new(),
            },
        })
    }

    fn close(&self) -> EngineResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        self.state.record(JournalEntry::EngineClosed {
            unit: self.unit.clone(),
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.state.faults().report_closed
    }
}

/// Session over the in-memory collections.
pub struct MemorySession {
    id: u64,
    state: Arc<MemoryState>,
    tx: MemoryTransaction,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read a document, seeing this session's uncommitted writes.
    pub fn get(&self, collection: &str, key: &str) -> Option<Value> {
        let staged_key = (collection.to_string(), key.to_string());
        if let Some(staged) = self.tx.staged.get(&staged_key) {
            return staged.clone();
        }
        self.state
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    pub fn put(&mut self, collection: &str, key: &str, value: Value) -> EngineResult<()> {
        self.tx.stage(collection, key, Some(value))
    }

    /// Stage a delete. Returns whether the document was visible.
    pub fn delete(&mut self, collection: &str, key: &str) -> EngineResult<bool> {
        let existed = self.get(collection, key).is_some();
        self.tx.stage(collection, key, None)?;
        Ok(existed)
    }

    /// Keys visible to this session, sorted.
    pub fn keys(&self, collection: &str) -> Vec<String> {
        let mut keys: BTreeMap<String, bool> = self
            .state
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.keys().map(|k| (k.clone(), true)).collect())
            .unwrap_or_default();

        for ((c, k), value) in &self.tx.staged {
            if c == collection {
                keys.insert(k.clone(), value.is_some());
            }
        }
        keys.into_iter()
            .filter_map(|(k, live)| live.then_some(k))
            .collect()
    }
}

impl EngineSession for MemorySession {
    type Transaction = MemoryTransaction;

    fn transaction(&mut self) -> &mut MemoryTransaction {
        &mut self.tx
    }

    fn close(mut self) -> EngineResult<()> {
        if self.tx.active {
            self.tx.discard();
            self.state.record(JournalEntry::Rollback(self.id));
        }
        self.state.record(JournalEntry::SessionClosed(self.id));

        if self.state.faults().fail_session_close {
            return Err(EngineError::Backend(format!(
                "injected close failure for session {}",
                self.id
            )));
        }
        Ok(())
    }
}

/// Transaction staging writes for one session.
pub struct MemoryTransaction {
    session: u64,
    state: Arc<MemoryState>,
    active: bool,
    staged: BTreeMap<(String, String), Option<Value>>,
}

impl MemoryTransaction {
    fn stage(&mut self, collection: &str, key: &str, value: Option<Value>) -> EngineResult<()> {
        if !self.active {
            return Err(EngineError::no_transaction(self.session.to_string()));
        }
        self.staged
            .insert((collection.to_string(), key.to_string()), value);
        Ok(())
    }

    fn discard(&mut self) {
        self.active = false;
        self.staged.clear();
    }
}

impl EngineTransaction for MemoryTransaction {
    fn begin(&mut self) -> EngineResult<()> {
        if self.active {
            return Err(EngineError::transaction_active(self.session.to_string()));
        }
        self.active = true;
        self.staged.clear();
        self.state.record(JournalEntry::Begin(self.session));
        Ok(())
    }

    fn commit(&mut self) -> EngineResult<()> {
        if !self.active {
            return Err(EngineError::no_transaction(self.session.to_string()));
        }
        if self.state.faults().fail_commit {
            self.discard();
            return Err(EngineError::Backend(format!(
                "injected commit failure for session {}",
                self.session
            )));
        }

        {
            let mut collections = self.state.collections.write();
            for ((collection, key), value) in std::mem::take(&mut self.staged) {
                let docs = collections.entry(collection).or_default();
                match value {
                    Some(value) => {
                        docs.insert(key, value);
                    }
                    None => {
                        docs.remove(&key);
                    }
                }
            }
        }
        self.active = false;
        self.state.record(JournalEntry::Commit(self.session));
        Ok(())
    }

    fn rollback(&mut self) -> EngineResult<()> {
        if !self.active {
            return Err(EngineError::no_transaction(self.session.to_string()));
        }
        self.discard();
        if self.state.faults().fail_rollback {
            return Err(EngineError::Backend(format!(
                "injected rollback failure for session {}",
                self.session
            )));
        }
        self.state.record(JournalEntry::Rollback(self.session));
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
