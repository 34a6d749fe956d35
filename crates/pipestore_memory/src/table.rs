//! Table accessor over committed rows.

use crate::engine::Shared;
use bytes::Bytes;
use pipestore_core::codec::{decode_row, encode_row};
use pipestore_core::{
    Comparator, Context, CursorQuery, Model, OffsetQuery, SortOrder, StorageError, StorageResult,
    SurrogateKey, Table,
};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Reads and writes committed rows of `M` outside any transaction.
///
/// Writes through a table are visible immediately.
pub struct MemoryTable<M> {
    shared: Arc<Shared>,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for MemoryTable<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _marker: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for MemoryTable<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTable")
            .field("model", &std::any::type_name::<M>())
            .finish()
    }
}

impl<M: Model> MemoryTable<M> {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    fn decode(key: SurrogateKey, payload: &[u8]) -> StorageResult<M> {
        let mut model: M = decode_row(payload)?;
        model.set_key(key);
        Ok(model)
    }

    /// Decodes selected rows, checking `ctx` every configured interval.
    fn collect<'a>(
        &self,
        ctx: &Context,
        rows: impl Iterator<Item = (SurrogateKey, &'a Bytes)>,
    ) -> StorageResult<Vec<M>> {
        let interval = self.shared.config.cancellation_check_interval.max(1);
        let mut models = Vec::new();
        for (i, (key, payload)) in rows.enumerate() {
            if i > 0 && i % interval == 0 {
                ctx.check()?;
            }
            models.push(Self::decode(key, payload)?);
        }
        Ok(models)
    }

    /// Assigns the key and inserts under one write guard.
    fn insert(&self, ctx: &Context, model: &mut M) -> StorageResult<()> {
        let name = M::table_name();
        let mut store = self.shared.write(ctx)?;
        let key = if model.key().is_assigned() {
            self.shared.observe_key(name, model.key());
            model.key()
        } else {
            let fresh = self.shared.reserve_keys(name, 1)?;
            SurrogateKey::new(fresh.start)
        };
        model.set_key(key);
        let payload = encode_row(&*model)?;
        store.insert(name, key, payload)?;
        drop(store);
        trace!(collection = name, %key, "row saved");
        Ok(())
    }
}

impl<M: Model> Table<M> for MemoryTable<M> {
    fn get_by_id(&self, ctx: &Context, id: SurrogateKey) -> StorageResult<M> {
        let name = M::table_name();
        let store = self.shared.read(ctx)?;
        let payload = store
            .get(name, id)
            .ok_or_else(|| StorageError::not_found(name, id))?;
        Self::decode(id, payload)
    }

    fn save(&self, ctx: &Context, model: &mut M) -> StorageResult<()> {
        ctx.check()?;
        let original = model.key();
        let result = self.insert(ctx, model);
        if result.is_err() {
            model.set_key(original);
        }
        result
    }

    fn update(&self, ctx: &Context, model: &M) -> StorageResult<()> {
        let name = M::table_name();
        let payload = encode_row(model)?;
        self.shared
            .write(ctx)?
            .replace(name, model.key(), payload)?;
        trace!(collection = name, key = %model.key(), "row updated");
        Ok(())
    }

    fn list(
        &self,
        ctx: &Context,
        limit: u64,
        offset: u64,
        order: SortOrder,
    ) -> StorageResult<Vec<M>> {
        let store = self.shared.read(ctx)?;
        let Some(rows) = store.rows(M::table_name()) else {
            return Ok(Vec::new());
        };
        self.collect(ctx, OffsetQuery::new(limit, offset, order).select(rows))
    }

    fn cursor_list(
        &self,
        ctx: &Context,
        id: SurrogateKey,
        limit: u64,
        order: SortOrder,
        cmp: Comparator,
    ) -> StorageResult<Vec<M>> {
        let store = self.shared.read(ctx)?;
        let Some(rows) = store.rows(M::table_name()) else {
            return Ok(Vec::new());
        };
        self.collect(ctx, CursorQuery::new(id, limit, order, cmp).select(rows))
    }

    fn last_id(&self, ctx: &Context) -> StorageResult<Option<SurrogateKey>> {
        Ok(self.shared.read(ctx)?.last_key(M::table_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryEngine;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Head {
        #[serde(default)]
        id: SurrogateKey,
        level: u64,
    }

    impl Model for Head {
        fn table_name() -> &'static str {
            "heads"
        }

        fn key(&self) -> SurrogateKey {
            self.id
        }

        fn set_key(&mut self, key: SurrogateKey) {
            self.id = key;
        }
    }

    fn head(level: u64) -> Head {
        Head {
            id: SurrogateKey::UNASSIGNED,
            level,
        }
    }

    fn seeded(count: u64) -> (MemoryEngine, MemoryTable<Head>) {
        let engine = MemoryEngine::new();
        let table = engine.table::<Head>();
        let ctx = Context::background();
        for level in 1..=count {
            table.save(&ctx, &mut head(level)).unwrap();
        }
        (engine, table)
    }

    fn levels(models: &[Head]) -> Vec<u64> {
        models.iter().map(|h| h.level).collect()
    }

    #[test]
    fn save_assigns_increasing_keys() {
        let (_engine, table) = seeded(0);
        let ctx = Context::background();
        let mut a = head(1);
        let mut b = head(2);
        table.save(&ctx, &mut a).unwrap();
        table.save(&ctx, &mut b).unwrap();
        assert!(a.id.is_assigned());
        assert!(b.id > a.id);
        assert_eq!(table.get_by_id(&ctx, b.id).unwrap(), b);
    }

    #[test]
    fn save_duplicate_explicit_key_keeps_model_untouched() {
        let (_engine, table) = seeded(2);
        let ctx = Context::background();
        let mut dup = Head {
            id: SurrogateKey::new(2),
            level: 99,
        };
        let err = table.save(&ctx, &mut dup).unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation { .. }));
        assert_eq!(dup.id, SurrogateKey::new(2));
        assert_eq!(table.get_by_id(&ctx, SurrogateKey::new(2)).unwrap().level, 2);
    }

    #[test]
    fn explicit_key_advances_sequence() {
        let (_engine, table) = seeded(0);
        let ctx = Context::background();
        let mut pinned = Head {
            id: SurrogateKey::new(40),
            level: 40,
        };
        table.save(&ctx, &mut pinned).unwrap();
        let mut next = head(41);
        table.save(&ctx, &mut next).unwrap();
        assert_eq!(next.id, SurrogateKey::new(41));
    }

    #[test]
    fn auto_keys_survive_racing_explicit_saves() {
        let (_engine, table) = seeded(0);
        let failed = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let ctx = Context::background();
                    for level in 0..200 {
                        if table.save(&ctx, &mut head(level)).is_err() {
                            failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
            scope.spawn(|| {
                let ctx = Context::background();
                for _ in 0..400 {
                    let next = table.last_id(&ctx).unwrap().map_or(1, |k| k.as_u64() + 1);
                    let mut pinned = Head {
                        id: SurrogateKey::new(next),
                        level: 0,
                    };
                    let _ = table.save(&ctx, &mut pinned);
                }
            });
        });
        assert_eq!(failed.into_inner(), 0);
    }

    #[test]
    fn missing_row_is_no_rows() {
        let (_engine, table) = seeded(1);
        let ctx = Context::background();
        let err = table.get_by_id(&ctx, SurrogateKey::new(7)).unwrap_err();
        assert!(table.is_no_rows(&err));

        let err = table.update(&ctx, &head(3)).unwrap_err();
        assert!(table.is_no_rows(&err));
    }

    #[test]
    fn update_replaces_row() {
        let (_engine, table) = seeded(3);
        let ctx = Context::background();
        let mut second = table.get_by_id(&ctx, SurrogateKey::new(2)).unwrap();
        second.level = 200;
        table.update(&ctx, &second).unwrap();
        assert_eq!(table.get_by_id(&ctx, second.id).unwrap().level, 200);
    }

    #[test]
    fn list_pages() {
        let (_engine, table) = seeded(5);
        let ctx = Context::background();
        assert_eq!(levels(&table.list(&ctx, 2, 1, SortOrder::Asc).unwrap()), vec![2, 3]);
        assert_eq!(levels(&table.list(&ctx, 2, 0, SortOrder::Desc).unwrap()), vec![5, 4]);
        assert!(table.list(&ctx, 0, 0, SortOrder::Asc).unwrap().is_empty());
        assert!(table.list(&ctx, 10, 5, SortOrder::Asc).unwrap().is_empty());
    }

    #[test]
    fn cursor_pages() {
        let (_engine, table) = seeded(6);
        let ctx = Context::background();
        let page = table
            .cursor_list(&ctx, SurrogateKey::new(5), 2, SortOrder::Desc, Comparator::Lt)
            .unwrap();
        assert_eq!(levels(&page), vec![4, 3]);

        let page = table
            .cursor_list(&ctx, SurrogateKey::new(1), 10, SortOrder::Asc, Comparator::Gt)
            .unwrap();
        assert_eq!(levels(&page), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn empty_collection() {
        let (_engine, table) = seeded(0);
        let ctx = Context::background();
        assert_eq!(table.last_id(&ctx).unwrap(), None);
        assert!(table.list(&ctx, 10, 0, SortOrder::Asc).unwrap().is_empty());
        assert!(table
            .cursor_list(&ctx, SurrogateKey::UNASSIGNED, 10, SortOrder::Asc, Comparator::Gte)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn last_id_is_greatest_key() {
        let (_engine, table) = seeded(4);
        assert_eq!(
            table.last_id(&Context::background()).unwrap(),
            Some(SurrogateKey::new(4))
        );
    }

    #[test]
    fn cancelled_context_fails_reads() {
        let (_engine, table) = seeded(3);
        let (ctx, token) = Context::background().with_cancel();
        token.cancel();
        assert!(table.list(&ctx, 10, 0, SortOrder::Asc).unwrap_err().is_cancelled());
        assert!(table.last_id(&ctx).unwrap_err().is_cancelled());
    }

    #[test]
    fn unavailable_engine_is_transient() {
        let (engine, table) = seeded(1);
        engine.set_available(false);
        let err = table.get_by_id(&Context::background(), SurrogateKey::new(1)).unwrap_err();
        assert_eq!(err.kind(), pipestore_core::ErrorKind::Transient);
    }
}
