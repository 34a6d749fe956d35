//! Staged transactions over the in-memory store.

use crate::engine::{Session, Shared};
use crate::statement::Statement;
use crate::store::{KeyFilter, Mutation, Store};
use bytes::Bytes;
use pipestore_core::codec::{encode_row, RawRow, RowReader};
use pipestore_core::{
    Context, Model, StorageError, StorageResult, SurrogateKey, Transaction, TransactionId,
    TransactionState, Value,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Keys whose visibility this transaction has changed: `true` if staged
/// for insertion, `false` if staged for deletion.
type Overlay = BTreeMap<SurrogateKey, bool>;

/// A transaction of [`MemoryEngine`](crate::MemoryEngine).
///
/// Mutations are validated when staged against the committed rows plus
/// the transaction's own staged changes, and applied together at
/// [`flush`](Transaction::flush). A flush re-validates everything against
/// the rows committed at that moment, so a conflicting commit by another
/// transaction makes the whole flush fail.
pub struct MemoryTransaction {
    id: TransactionId,
    shared: Arc<Shared>,
    ctx: Context,
    state: TransactionState,
    pending: Vec<Mutation>,
    overlay: HashMap<String, Overlay>,
    session: Option<Session>,
}

impl MemoryTransaction {
    pub(crate) fn new(
        id: TransactionId,
        shared: Arc<Shared>,
        ctx: Context,
        session: Session,
    ) -> Self {
        Self {
            id,
            shared,
            ctx,
            state: TransactionState::Open,
            pending: Vec::new(),
            overlay: HashMap::new(),
            session: Some(session),
        }
    }

    /// Returns the transaction identifier.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Number of staged mutations.
    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.pending.len()
    }

    /// Checks both the context the transaction was opened with and the one
    /// passed to the current call.
    fn check(&self, ctx: &Context) -> StorageResult<()> {
        self.ctx.check()?;
        ctx.check()
    }

    fn ensure_writable(&self, ctx: &Context) -> StorageResult<()> {
        self.state.ensure_open()?;
        self.check(ctx)
    }

    fn discard(&mut self) {
        self.pending.clear();
        self.overlay.clear();
    }

    fn visible(&self, store: &Store, collection: &str, key: SurrogateKey) -> bool {
        self.overlay
            .get(collection)
            .and_then(|overlay| overlay.get(&key))
            .copied()
            .unwrap_or_else(|| store.contains(collection, key))
    }

    /// Keys visible to this transaction that match `filter`.
    fn visible_keys(
        &self,
        store: &Store,
        collection: &str,
        filter: Option<KeyFilter>,
    ) -> BTreeSet<SurrogateKey> {
        let matches = |key: &SurrogateKey| filter.map_or(true, |f| f.matches(*key));
        let overlay = self.overlay.get(collection);
        let mut keys: BTreeSet<SurrogateKey> = match (store.rows(collection), filter) {
            (None, _) => BTreeSet::new(),
            (Some(rows), Some(f)) => rows.range(f.range()).map(|(k, _)| *k).collect(),
            (Some(rows), None) => rows.keys().copied().collect(),
        };
        if let Some(overlay) = overlay {
            for (key, present) in overlay {
                if *present {
                    keys.insert(*key);
                } else {
                    keys.remove(key);
                }
            }
        }
        keys.retain(matches);
        keys
    }

    /// Rejects explicit keys that repeat or that are already visible.
    fn check_new_keys(
        &self,
        ctx: &Context,
        collection: &str,
        keys: &[SurrogateKey],
    ) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let store = self.shared.read(ctx)?;
        let mut seen = HashSet::with_capacity(keys.len());
        for key in keys {
            if !seen.insert(*key) || self.visible(&store, collection, *key) {
                return Err(StorageError::constraint_violation(
                    collection,
                    format!("duplicate key {key}"),
                ));
            }
        }
        Ok(())
    }

    /// Reserves keys for `unassigned` rows after accounting for explicit
    /// ones.
    fn assign_keys(
        &self,
        collection: &str,
        explicit: &[SurrogateKey],
        unassigned: usize,
    ) -> StorageResult<Range<u64>> {
        if let Some(max) = explicit.iter().max() {
            self.shared.observe_key(collection, *max);
        }
        self.shared.reserve_keys(collection, unassigned)
    }

    fn stage_insert(&mut self, collection: &str, rows: Vec<(SurrogateKey, Bytes)>) {
        let overlay = self.overlay.entry(collection.to_string()).or_default();
        for (key, _) in &rows {
            overlay.insert(*key, true);
        }
        trace!(txid = %self.id, collection, rows = rows.len(), "insert staged");
        self.pending.push(Mutation::Insert {
            collection: collection.to_string(),
            rows,
        });
    }

    fn stage_models<M: Model>(&mut self, ctx: &Context, models: &mut [M]) -> StorageResult<()> {
        let name = M::table_name();
        let explicit: Vec<SurrogateKey> = models
            .iter()
            .map(Model::key)
            .filter(|k| k.is_assigned())
            .collect();
        self.check_new_keys(ctx, name, &explicit)?;
        let mut fresh = self.assign_keys(name, &explicit, models.len() - explicit.len())?;

        let interval = self.shared.config.cancellation_check_interval.max(1);
        let mut rows = Vec::with_capacity(models.len());
        for (i, model) in models.iter_mut().enumerate() {
            if i > 0 && i % interval == 0 {
                self.check(ctx)?;
            }
            if !model.key().is_assigned() {
                let key = fresh
                    .next()
                    .map(SurrogateKey::new)
                    .ok_or_else(|| StorageError::fatal("reserved key range too short"))?;
                model.set_key(key);
            }
            rows.push((model.key(), encode_row(&*model)?));
        }
        self.stage_insert(name, rows);
        Ok(())
    }

    fn stage_delete(
        &mut self,
        ctx: &Context,
        collection: String,
        filter: Option<KeyFilter>,
    ) -> StorageResult<u64> {
        let affected = {
            let store = self.shared.read(ctx)?;
            self.visible_keys(&store, &collection, filter)
        };
        let overlay = self.overlay.entry(collection.clone()).or_default();
        for key in &affected {
            overlay.insert(*key, false);
        }
        let count = affected.len() as u64;
        trace!(txid = %self.id, collection = %collection, rows = count, "delete staged");
        if count > 0 {
            self.pending.push(Mutation::Delete {
                collection,
                keys: affected,
            });
        }
        Ok(count)
    }

    fn read_stream(&self, ctx: &Context, reader: &mut dyn Read) -> StorageResult<Vec<RawRow>> {
        let interval = self.shared.config.cancellation_check_interval.max(1);
        let mut rows = Vec::new();
        let stream = RowReader::with_capacity(self.shared.config.copy_buffer_size, reader);
        for (i, row) in stream.enumerate() {
            if i % interval == 0 {
                self.check(ctx)?;
            }
            rows.push(row?);
        }
        Ok(rows)
    }
}

impl Transaction for MemoryTransaction {
    fn add<M: Model>(&mut self, ctx: &Context, model: &mut M) -> StorageResult<()> {
        self.bulk_save(ctx, std::slice::from_mut(model))
    }

    fn update<M: Model>(&mut self, ctx: &Context, model: &M) -> StorageResult<()> {
        self.ensure_writable(ctx)?;
        let name = M::table_name();
        let key = model.key();
        {
            let store = self.shared.read(ctx)?;
            if !self.visible(&store, name, key) {
                return Err(StorageError::not_found(name, key));
            }
        }
        let payload = encode_row(model)?;
        trace!(txid = %self.id, collection = name, %key, "update staged");
        self.pending.push(Mutation::Update {
            collection: name.to_string(),
            key,
            payload,
        });
        Ok(())
    }

    fn bulk_save<M: Model>(&mut self, ctx: &Context, models: &mut [M]) -> StorageResult<()> {
        self.ensure_writable(ctx)?;
        if models.is_empty() {
            return Ok(());
        }
        let originals: Vec<SurrogateKey> = models.iter().map(Model::key).collect();
        let result = self.stage_models(ctx, models);
        if result.is_err() {
            for (model, key) in models.iter_mut().zip(originals) {
                model.set_key(key);
            }
        }
        result
    }

    fn copy_from(
        &mut self,
        ctx: &Context,
        reader: &mut dyn Read,
        query: &str,
        args: &[Value],
    ) -> StorageResult<u64> {
        self.ensure_writable(ctx)?;
        let Statement::Copy { collection } = Statement::parse(query, args)? else {
            return Err(StorageError::invalid_statement(
                "copy_from expects COPY <collection> FROM STDIN",
            ));
        };

        let mut raw = self.read_stream(ctx, reader)?;
        let keys = raw
            .iter()
            .map(RawRow::key)
            .collect::<StorageResult<Vec<Option<SurrogateKey>>>>()?;
        let explicit: Vec<SurrogateKey> = keys.iter().flatten().copied().collect();
        self.check_new_keys(ctx, &collection, &explicit)?;
        let mut fresh = self.assign_keys(&collection, &explicit, raw.len() - explicit.len())?;

        let mut rows = Vec::with_capacity(raw.len());
        for (row, key) in raw.iter_mut().zip(keys) {
            let key = match key {
                Some(key) => key,
                None => {
                    let key = fresh
                        .next()
                        .map(SurrogateKey::new)
                        .ok_or_else(|| StorageError::fatal("reserved key range too short"))?;
                    row.set_key(key);
                    key
                }
            };
            rows.push((key, row.encode()?));
        }

        let count = rows.len() as u64;
        if count > 0 {
            self.stage_insert(&collection, rows);
        }
        debug!(txid = %self.id, collection = %collection, rows = count, "copy staged");
        Ok(count)
    }

    fn exec(&mut self, ctx: &Context, query: &str, params: &[Value]) -> StorageResult<u64> {
        self.ensure_writable(ctx)?;
        match Statement::parse(query, params)? {
            Statement::Delete { collection, filter } => self.stage_delete(ctx, collection, filter),
            Statement::Truncate { collection } => self.stage_delete(ctx, collection, None),
            Statement::Copy { .. } => Err(StorageError::invalid_statement(
                "COPY statements run through copy_from",
            )),
        }
    }

    fn flush(&mut self, ctx: &Context) -> StorageResult<()> {
        self.state.ensure_open()?;
        let rows: usize = self.pending.iter().map(Mutation::row_count).sum();
        let result = self
            .check(ctx)
            .and_then(|()| self.shared.commit(ctx, &self.pending));
        let mutations = self.pending.len();
        self.discard();

        match result {
            Ok(()) => {
                self.state = TransactionState::Committed;
                debug!(txid = %self.id, mutations, rows, "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::Failed;
                debug!(txid = %self.id, mutations, error = %err, "commit failed");
                Err(err)
            }
        }
    }

    fn rollback(&mut self, _ctx: &Context) -> StorageResult<()> {
        self.state.ensure_can_roll_back()?;
        let mutations = self.pending.len();
        self.discard();
        self.state = TransactionState::RolledBack;
        debug!(txid = %self.id, mutations, "transaction rolled back");
        Ok(())
    }

    fn close(mut self, _ctx: &Context) -> StorageResult<()> {
        if self.state.is_open() && !self.pending.is_empty() {
            debug!(
                txid = %self.id,
                mutations = self.pending.len(),
                "closing open transaction, staged mutations discarded"
            );
        }
        self.discard();
        self.session = None;
        trace!(txid = %self.id, state = %self.state, "transaction closed");
        Ok(())
    }

    fn handle_error(&mut self, _ctx: &Context, err: StorageError) -> StorageError {
        let classified = self.shared.classifier.classify(err);
        debug!(
            txid = %self.id,
            recoverable = classified.is_recoverable(),
            error = %classified,
            "transaction error classified"
        );
        classified
    }

    fn state(&self) -> TransactionState {
        self.state
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!(txid = %self.id, state = %self.state, "transaction dropped without close");
        }
    }
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
