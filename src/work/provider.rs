//! Session provider: engine lifecycle plus one session per work context.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::config::UnitConfig;
use super::context::WorkContext;
use super::error::{WorkError, WorkResult};
use crate::engine::{EngineHandle, EngineSession, PersistenceEngine};

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Owns the engine handle of one persistence unit and binds sessions to
/// [`WorkContext`]s.
///
/// Thread-safe: clones share the same engine handle. Start and stop are
/// serialised by a single mutex; sessions live in the contexts, so begin,
/// get and end never contend with other threads.
pub struct SessionProvider<E: PersistenceEngine> {
    inner: Arc<ProviderInner<E>>,
}

struct ProviderInner<E: PersistenceEngine> {
    id: u64,
    engine: E,
    config: UnitConfig,
    handle: Mutex<Option<Arc<E::Handle>>>,
}

impl<E: PersistenceEngine> Clone for SessionProvider<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: PersistenceEngine> SessionProvider<E> {
    pub fn new(engine: E, config: UnitConfig) -> Self {
        let id = NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed);
        trace!(provider = id, unit = %config.unit_name, "session provider created");
        Self {
            inner: Arc::new(ProviderInner {
                id,
                engine,
                config,
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &UnitConfig {
        &self.inner.config
    }

    fn unit(&self) -> &str {
        &self.inner.config.unit_name
    }

    /// A fresh, empty context bound to this provider.
    pub fn context(&self) -> WorkContext<E> {
        WorkContext::new(self.inner.id)
    }

    // ==================== Engine lifecycle ====================

    /// Open the engine handle. Does nothing if already started.
    pub fn start(&self) -> WorkResult<()> {
        let mut slot = self.inner.handle.lock();
        if slot.is_some() {
            return Ok(());
        }

        let config = &self.inner.config;
        match self.inner.engine.open(&config.unit_name, &config.properties) {
            Ok(handle) => {
                *slot = Some(Arc::new(handle));
                debug!(unit = %config.unit_name, "persistence unit started");
                Ok(())
            }
            Err(source) => {
                error!(unit = %config.unit_name, error = %source, "persistence unit failed to start");
                Err(WorkError::EngineStart {
                    unit: config.unit_name.clone(),
                    source,
                })
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.handle.lock().is_some()
    }

    /// Close the engine handle. Does nothing if not started.
    ///
    /// The provider is stopped afterwards even when closing fails.
    pub fn stop(&self) -> WorkResult<()> {
        let mut slot = self.inner.handle.lock();
        let Some(handle) = slot.take() else {
            return Ok(());
        };

        if !handle.is_open() {
            error!(unit = %self.unit(), "engine already shut down while the unit was started");
            return Err(WorkError::AlreadyClosed(self.unit().to_string()));
        }

        handle.close()?;
        debug!(unit = %self.unit(), "persistence unit stopped");
        Ok(())
    }

    /// The started engine handle.
    pub fn handle(&self) -> WorkResult<Arc<E::Handle>> {
        self.inner
            .handle
            .lock()
            .clone()
            .ok_or_else(|| WorkError::NotStarted(self.unit().to_string()))
    }

    // ==================== Units of work ====================

    fn check(&self, cx: &WorkContext<E>) -> WorkResult<()> {
        if cx.owner != self.inner.id {
            return Err(WorkError::ForeignContext);
        }
        Ok(())
    }

    /// Bind a new session to `cx` unless it already holds one.
    pub fn begin(&self, cx: &mut WorkContext<E>) -> WorkResult<()> {
        self.check(cx)?;
        let handle = self.handle()?;
        if cx.slot.is_some() {
            return Ok(());
        }

        cx.slot = Some(handle.new_session()?);
        trace!(unit = %self.unit(), "work begun");
        Ok(())
    }

    /// Close and unbind the session of `cx`, if any.
    ///
    /// The slot is cleared even when closing the session fails.
    pub fn end(&self, cx: &mut WorkContext<E>) -> WorkResult<()> {
        self.check(cx)?;
        let Some(session) = cx.slot.take() else {
            return Ok(());
        };

        session.close()?;
        trace!(unit = %self.unit(), "work ended");
        Ok(())
    }

    /// The live session of `cx`.
    pub fn get<'cx>(&self, cx: &'cx mut WorkContext<E>) -> WorkResult<&'cx mut E::Session> {
        self.check(cx)?;
        cx.session()
    }

    pub fn has_begun(&self, cx: &WorkContext<E>) -> bool {
        cx.owner == self.inner.id && cx.has_begun()
    }

    /// Run `f` inside a unit of work.
    ///
    /// Begins a session if `cx` has none and ends it afterwards, including
    /// when `f` fails or panics. A session that was already live is left open.
    pub fn unit_of_work<T, Err, F>(&self, cx: &mut WorkContext<E>, f: F) -> Result<T, Err>
    where
        F: FnOnce(&mut WorkContext<E>) -> Result<T, Err>,
        Err: From<WorkError>,
    {
        let owns = !self.has_begun(cx);
        if owns {
            self.begin(cx)?;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(cx)));
        if !owns {
            return outcome.unwrap_or_else(|payload| panic::resume_unwind(payload));
        }

        let ended = self.end(cx);
        match outcome {
            Ok(Ok(value)) => {
                ended?;
                Ok(value)
            }
            Ok(Err(e)) => {
                if let Err(end_err) = ended {
                    warn!(unit = %self.unit(), error = %end_err, "failed to end unit of work");
                }
                Err(e)
            }
            Err(payload) => {
                if let Err(end_err) = ended {
                    warn!(unit = %self.unit(), error = %end_err, "failed to end unit of work");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

impl<E: PersistenceEngine> fmt::Debug for SessionProvider<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProvider")
            .field("id", &self.inner.id)
            .field("unit", &self.inner.config.unit_name)
            .field("started", &self.is_started())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{JournalEntry, MemoryEngine, MemoryHandle, MemorySession};
    use crate::engine::{EngineError, EngineResult, Properties};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn provider() -> (MemoryEngine, SessionProvider<MemoryEngine>) {
        let engine = MemoryEngine::new();
        let provider = SessionProvider::new(engine.clone(), UnitConfig::new("test"));
        (engine, provider)
    }

    fn opened(entry: &JournalEntry) -> bool {
        matches!(entry, JournalEntry::SessionOpened(_))
    }

    fn closed(entry: &JournalEntry) -> bool {
        matches!(entry, JournalEntry::SessionClosed(_))
    }

    #[test]
    fn test_start_stop_idempotent() {
        let (engine, provider) = provider();
        assert!(!provider.is_started());
        provider.stop().unwrap();

        provider.start().unwrap();
        provider.start().unwrap();
        assert!(provider.is_started());

        provider.stop().unwrap();
        provider.stop().unwrap();
        assert!(!provider.is_started());

        assert_eq!(
            engine.journal(),
            vec![
                JournalEntry::EngineOpened {
                    unit: "test".into()
                },
                JournalEntry::EngineClosed {
                    unit: "test".into()
                },
            ]
        );
    }

    #[test]
    fn test_start_failure_stays_stopped() {
        let (engine, provider) = provider();
        engine.inject(|f| f.fail_open = true);

        let err = provider.start().unwrap_err();
        assert!(matches!(err, WorkError::EngineStart { ref unit, .. } if unit == "test"));
        assert!(!provider.is_started());

        engine.inject(|f| f.fail_open = false);
        provider.start().unwrap();
        assert!(provider.is_started());
    }

    /// Memory engine whose handles take a while to close.
    struct SlowCloseEngine {
        inner: MemoryEngine,
        closing: Arc<AtomicBool>,
    }

    struct SlowCloseHandle {
        inner: MemoryHandle,
        closing: Arc<AtomicBool>,
    }

    impl PersistenceEngine for SlowCloseEngine {
        type Handle = SlowCloseHandle;
        type Session = MemorySession;

        fn open(&self, unit: &str, properties: &Properties) -> EngineResult<SlowCloseHandle> {
            Ok(SlowCloseHandle {
                inner: self.inner.open(unit, properties)?,
                closing: self.closing.clone(),
            })
        }
    }

    impl EngineHandle for SlowCloseHandle {
        type Session = MemorySession;

        fn new_session(&self) -> EngineResult<MemorySession> {
            self.inner.new_session()
        }

        fn close(&self) -> EngineResult<()> {
            self.closing.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            self.inner.close()
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
    }

    #[test]
    fn test_start_waits_for_stop() {
        let engine = MemoryEngine::new();
        let closing = Arc::new(AtomicBool::new(false));
        let provider = SessionProvider::new(
            SlowCloseEngine {
                inner: engine.clone(),
                closing: closing.clone(),
            },
            UnitConfig::new("test"),
        );
        provider.start().unwrap();

        let stopper = {
            let provider = provider.clone();
            thread::spawn(move || provider.stop())
        };
        while !closing.load(Ordering::SeqCst) {
            thread::yield_now();
        }
        provider.start().unwrap();
        stopper.join().unwrap().unwrap();

        let unit = || "test".to_string();
        assert_eq!(
            engine.journal(),
            vec![
                JournalEntry::EngineOpened { unit: unit() },
                JournalEntry::EngineClosed { unit: unit() },
                JournalEntry::EngineOpened { unit: unit() },
            ]
        );
        assert!(provider.is_started());
    }

    #[test]
    fn test_stop_engine_already_closed() {
        let (engine, provider) = provider();
        provider.start().unwrap();
        engine.inject(|f| f.report_closed = true);

        let err = provider.stop().unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(!provider.is_started());
        provider.stop().unwrap();
    }

    #[test]
    fn test_begin_requires_start() {
        let (_, provider) = provider();
        let mut cx = provider.context();

        assert!(matches!(provider.begin(&mut cx), Err(WorkError::NotStarted(_))));
        assert!(!provider.has_begun(&cx));
    }

    #[test]
    fn test_begin_end_idempotent() {
        let (engine, provider) = provider();
        provider.start().unwrap();
        let mut cx = provider.context();

        provider.begin(&mut cx).unwrap();
        let first = provider.get(&mut cx).unwrap().id();
        provider.begin(&mut cx).unwrap();
        assert_eq!(provider.get(&mut cx).unwrap().id(), first);
        assert!(provider.has_begun(&cx));

        provider.end(&mut cx).unwrap();
        provider.end(&mut cx).unwrap();
        assert!(!provider.has_begun(&cx));

        assert_eq!(engine.count(opened), 1);
        assert_eq!(engine.count(closed), 1);
    }

    #[test]
    fn test_get_without_begin() {
        let (_, provider) = provider();
        provider.start().unwrap();
        let mut cx = provider.context();

        assert!(matches!(provider.get(&mut cx), Err(WorkError::NoActiveSession)));

        provider.begin(&mut cx).unwrap();
        provider.end(&mut cx).unwrap();
        assert!(matches!(provider.get(&mut cx), Err(WorkError::NoActiveSession)));
    }

    #[test]
    fn test_end_clears_slot_when_close_fails() {
        let (engine, provider) = provider();
        provider.start().unwrap();
        engine.inject(|f| f.fail_session_close = true);

        let mut cx = provider.context();
        provider.begin(&mut cx).unwrap();
        let err = provider.end(&mut cx).unwrap_err();

        assert!(matches!(err, WorkError::Engine(EngineError::Backend(_))));
        assert!(!provider.has_begun(&cx));
    }

    #[test]
    fn test_foreign_context() {
        let (_, first) = provider();
        let (_, second) = provider();
        first.start().unwrap();
        second.start().unwrap();

        let mut cx = first.context();
        assert!(matches!(second.begin(&mut cx), Err(WorkError::ForeignContext)));

        first.begin(&mut cx).unwrap();
        assert!(!second.has_begun(&cx));
        assert!(matches!(second.get(&mut cx), Err(WorkError::ForeignContext)));
        first.end(&mut cx).unwrap();
    }

    #[test]
    fn test_contexts_per_thread() {
        let (engine, provider) = provider();
        provider.start().unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let provider = provider.clone();
                thread::spawn(move || {
                    let mut cx = provider.context();
                    provider.begin(&mut cx).unwrap();
                    let id = provider.get(&mut cx).unwrap().id();
                    provider.end(&mut cx).unwrap();
                    id
                })
            })
            .collect();

        let ids: HashSet<u64> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(engine.count(closed), 4);
    }

    #[test]
    fn test_unit_of_work_brackets_session() {
        let (engine, provider) = provider();
        provider.start().unwrap();
        let mut cx = provider.context();

        let id = provider
            .unit_of_work(&mut cx, |cx| -> WorkResult<u64> { Ok(cx.session()?.id()) })
            .unwrap();
        assert!(!provider.has_begun(&cx));
        assert!(engine.journal().contains(&JournalEntry::SessionClosed(id)));

        let failed: WorkResult<()> =
            provider.unit_of_work(&mut cx, |_| Err(WorkError::NoActiveSession));
        assert!(failed.is_err());
        assert!(!provider.has_begun(&cx));
    }

    #[test]
    fn test_unit_of_work_keeps_existing_session() {
        let (engine, provider) = provider();
        provider.start().unwrap();
        let mut cx = provider.context();

        provider.begin(&mut cx).unwrap();
        provider
            .unit_of_work(&mut cx, |cx| -> WorkResult<()> {
                cx.session()?;
                Ok(())
            })
            .unwrap();
        assert!(provider.has_begun(&cx));
        assert_eq!(engine.count(closed), 0);
        provider.end(&mut cx).unwrap();
    }

    #[test]
    fn test_unit_of_work_panic_ends_session() {
        let (engine, provider) = provider();
        provider.start().unwrap();
        let mut cx = provider.context();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: WorkResult<()> = provider.unit_of_work(&mut cx, |_| panic!("boom"));
        }));

        assert!(result.is_err());
        assert!(!provider.has_begun(&cx));
        assert_eq!(engine.count(closed), 1);
    }

    #[test]
    fn test_dropped_context_closes_session() {
        let (engine, provider) = provider();
        provider.start().unwrap();

        {
            let mut cx = provider.context();
            provider.begin(&mut cx).unwrap();
        }
        assert_eq!(engine.count(closed), 1);
    }
}
