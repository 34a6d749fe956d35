//! The in-memory engine and its shared state.

use crate::store::{Mutation, Store};
use crate::table::MemoryTable;
use crate::transaction::MemoryTransaction;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use pipestore_core::{
    Config, Context, ErrorClassifier, Model, StorageError, StorageResult, StrictClassifier,
    SurrogateKey, Transactable, TransactionId,
};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Longest single wait on the store lock before the context is re-checked.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) struct Shared {
    pub(crate) config: Config,
    store: RwLock<Store>,
    sequences: Mutex<HashMap<String, u64>>,
    open_sessions: AtomicUsize,
    next_txid: AtomicU64,
    available: AtomicBool,
    pub(crate) classifier: Arc<dyn ErrorClassifier>,
}

impl Shared {
    pub(crate) fn ensure_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::transient("engine unavailable"))
        }
    }

    /// Acquires the store for reading, waiting no longer than `ctx` allows.
    pub(crate) fn read(&self, ctx: &Context) -> StorageResult<RwLockReadGuard<'_, Store>> {
        self.ensure_available()?;
        loop {
            let wait = self.lock_wait(ctx)?;
            if let Some(guard) = self.store.try_read_for(wait) {
                return Ok(guard);
            }
        }
    }

    /// Acquires the store for writing, waiting no longer than `ctx` allows.
    pub(crate) fn write(&self, ctx: &Context) -> StorageResult<RwLockWriteGuard<'_, Store>> {
        self.ensure_available()?;
        loop {
            let wait = self.lock_wait(ctx)?;
            if let Some(guard) = self.store.try_write_for(wait) {
                return Ok(guard);
            }
        }
    }

    fn lock_wait(&self, ctx: &Context) -> StorageResult<Duration> {
        ctx.check()?;
        Ok(ctx
            .remaining()
            .map_or(LOCK_POLL_INTERVAL, |left| left.min(LOCK_POLL_INTERVAL)))
    }

    /// Reserves `count` consecutive keys for `collection`.
    ///
    /// Reserved keys are never handed out again, even if the rows that
    /// received them are rolled back.
    pub(crate) fn reserve_keys(&self, collection: &str, count: usize) -> StorageResult<Range<u64>> {
        let mut sequences = self.sequences.lock();
        let last = sequences.entry(collection.to_string()).or_insert(0);
        let start = last.saturating_add(1);
        if count == 0 {
            return Ok(start..start);
        }
        let end = u64::try_from(count)
            .ok()
            .and_then(|n| start.checked_add(n))
            .ok_or_else(|| {
                StorageError::resource_exhausted(format!("key space of {collection} exhausted"))
            })?;
        *last = end - 1;
        Ok(start..end)
    }

    /// Advances the sequence of `collection` past an explicitly chosen key.
    pub(crate) fn observe_key(&self, collection: &str, key: SurrogateKey) {
        let mut sequences = self.sequences.lock();
        let last = sequences.entry(collection.to_string()).or_insert(0);
        *last = (*last).max(key.as_u64());
    }

    /// Applies staged mutations atomically.
    pub(crate) fn commit(&self, ctx: &Context, mutations: &[Mutation]) -> StorageResult<()> {
        self.ensure_available()?;
        if mutations.is_empty() {
            return ctx.check();
        }
        let mut store = self.write(ctx)?;
        store.apply(mutations)
    }
}

/// Releases an open-transaction slot when dropped.
pub(crate) struct Session {
    shared: Arc<Shared>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.open_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Reference engine holding every collection in memory.
///
/// Cloning is cheap; clones share the same data.
///
/// # Example
///
/// ```rust
/// use pipestore_core::{Context, Transactable, Transaction};
/// use pipestore_memory::MemoryEngine;
///
/// let engine = MemoryEngine::new();
/// let ctx = Context::background();
/// let deleted = engine
///     .in_transaction(&ctx, |txn| txn.exec(&ctx, "DELETE FROM blocks", &[]))
///     .unwrap();
/// assert_eq!(deleted, 0);
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an engine with `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::build(config, Arc::new(StrictClassifier))
    }

    /// Creates an engine whose transactions classify errors with
    /// `classifier`.
    #[must_use]
    pub fn with_classifier(config: Config, classifier: impl ErrorClassifier + 'static) -> Self {
        Self::build(config, Arc::new(classifier))
    }

    fn build(config: Config, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store: RwLock::new(Store::default()),
                sequences: Mutex::new(HashMap::new()),
                open_sessions: AtomicUsize::new(0),
                next_txid: AtomicU64::new(1),
                available: AtomicBool::new(true),
                classifier,
            }),
        }
    }

    /// Returns the table accessor for `M`.
    #[must_use]
    pub fn table<M: Model>(&self) -> MemoryTable<M> {
        MemoryTable::new(Arc::clone(&self.shared))
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Number of transactions currently holding a session.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::Acquire)
    }

    /// Number of committed rows in `collection`.
    #[must_use]
    pub fn row_count(&self, collection: &str) -> usize {
        self.shared.store.read().len(collection)
    }

    /// Simulates losing (`false`) or regaining (`true`) the connection.
    ///
    /// While unavailable every operation touching stored data fails with a
    /// transient error.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
        debug!(available, "engine availability changed");
    }

    fn acquire_session(&self) -> StorageResult<Session> {
        let max = self.shared.config.max_open_transactions;
        self.shared
            .open_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                self.shared.config.allows_transaction(open).then_some(open + 1)
            })
            .map_err(|open| {
                StorageError::resource_exhausted(format!(
                    "{open} of {max} transactions already open"
                ))
            })?;
        Ok(Session {
            shared: Arc::clone(&self.shared),
        })
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.shared.config)
            .field("open_transactions", &self.open_transactions())
            .field("available", &self.shared.available.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Transactable for MemoryEngine {
    type Transaction = MemoryTransaction;

    fn begin_transaction(&self, ctx: &Context) -> StorageResult<MemoryTransaction> {
        ctx.check()?;
        self.shared.ensure_available()?;
        let session = self.acquire_session()?;
        let id = TransactionId::new(self.shared.next_txid.fetch_add(1, Ordering::AcqRel));
        debug!(txid = %id, open = self.open_transactions(), "transaction started");
        Ok(MemoryTransaction::new(
            id,
            Arc::clone(&self.shared),
            ctx.clone(),
            session,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipestore_core::Transaction;

    #[test]
    fn session_limit() {
        let engine = MemoryEngine::with_config(Config::new().max_open_transactions(2));
        let ctx = Context::background();

        let first = engine.begin_transaction(&ctx).unwrap();
        let second = engine.begin_transaction(&ctx).unwrap();
        let err = engine.begin_transaction(&ctx).unwrap_err();
        assert!(matches!(err, StorageError::ResourceExhausted { .. }));
        assert_eq!(engine.open_transactions(), 2);

        first.close(&ctx).unwrap();
        assert_eq!(engine.open_transactions(), 1);
        drop(second);
        assert_eq!(engine.open_transactions(), 0);
        engine.begin_transaction(&ctx).unwrap().close(&ctx).unwrap();
    }

    #[test]
    fn transaction_ids_increase() {
        let engine = MemoryEngine::new();
        let ctx = Context::background();
        let a = engine.begin_transaction(&ctx).unwrap();
        let b = engine.begin_transaction(&ctx).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn begin_honors_context_and_availability() {
        let engine = MemoryEngine::new();
        let (ctx, token) = Context::background().with_cancel();
        token.cancel();
        assert!(engine.begin_transaction(&ctx).unwrap_err().is_cancelled());

        engine.set_available(false);
        let err = engine.begin_transaction(&Context::background()).unwrap_err();
        assert_eq!(err.kind(), pipestore_core::ErrorKind::Transient);
        assert_eq!(engine.open_transactions(), 0);
    }

    #[test]
    fn key_reservation_skips_observed_keys() {
        let engine = MemoryEngine::new();
        let shared = &engine.shared;
        assert_eq!(shared.reserve_keys("ops", 3).unwrap(), 1..4);
        shared.observe_key("ops", SurrogateKey::new(10));
        shared.observe_key("ops", SurrogateKey::new(5));
        assert_eq!(shared.reserve_keys("ops", 2).unwrap(), 11..13);
        assert_eq!(shared.reserve_keys("ops", 0).unwrap(), 13..13);
        assert_eq!(shared.reserve_keys("blocks", 1).unwrap(), 1..2);
    }

    #[test]
    fn key_space_exhaustion() {
        let engine = MemoryEngine::new();
        engine.shared.observe_key("ops", SurrogateKey::new(u64::MAX - 1));
        let err = engine.shared.reserve_keys("ops", 1).unwrap_err();
        assert!(matches!(err, StorageError::ResourceExhausted { .. }));
    }

    #[test]
    fn write_lock_wait_respects_deadline() {
        let engine = MemoryEngine::new();
        let _reader = engine.shared.store.read();
        let ctx = Context::background().with_timeout(Duration::from_millis(30));
        let err = engine.shared.write(&ctx).err().unwrap();
        assert!(matches!(err, StorageError::DeadlineExceeded));
    }
}
