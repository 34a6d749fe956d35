//! Behavioral checks every engine adapter must pass.
//!
//! An adapter implements [`Fixture`] for its engine and runs the suite from
//! an integration test:
//!
//! ```rust,ignore
//! use pipestore_testkit::conformance::ConformanceSuite;
//!
//! #[test]
//! fn conformance() {
//!     ConformanceSuite::new(MyEngine::with_config).run_all();
//! }
//! ```
//!
//! Each check builds fresh engines through the factory and panics with a
//! descriptive message on the first violation.

use crate::fixtures::{blocks, keys_of, snapshot, Block, Operation};
use crate::generators::StagedOp;
use pipestore_core::{
    Comparator, Config, Context, ErrorKind, Model, SortOrder, StorageError, StorageResult,
    SurrogateKey, Table, Transactable, Transaction, TransactionState, Value,
};

/// An engine under test: a transaction factory that also hands out tables.
pub trait Fixture: Transactable + Sized {
    /// Table accessor type for `M`.
    type Accessor<M: Model>: Table<M>;

    /// Returns the table accessor for `M`.
    fn table<M: Model>(&self) -> Self::Accessor<M>;
}

fn ctx() -> Context {
    Context::background()
}

fn cancelled() -> Context {
    let (ctx, token) = Context::background().with_cancel();
    token.cancel();
    ctx
}

/// Runs the conformance checks against engines built by a factory.
pub struct ConformanceSuite<F> {
    factory: F,
}

impl<B, F> ConformanceSuite<F>
where
    B: Fixture,
    F: Fn(Config) -> B,
{
    /// Creates a suite building engines with `factory`.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    fn fresh(&self) -> B {
        (self.factory)(Config::default())
    }

    /// Builds an engine holding `count` committed blocks with keys
    /// `1..=count`.
    fn seeded(&self, count: u64) -> B {
        let engine = self.fresh();
        let table = engine.table::<Block>();
        for mut block in blocks(count) {
            table.save(&ctx(), &mut block).expect("seed save");
        }
        engine
    }

    /// Runs every check.
    pub fn run_all(&self) {
        self.save_then_get_returns_equal_entity();
        self.keys_start_at_one_and_increase();
        self.missing_key_is_no_rows();
        self.last_id_tracks_greatest_key();
        self.update_replaces_row();
        self.offset_listing();
        self.cursor_listing_after_reference();
        self.cursor_listing_on_empty_collection();
        self.cursor_walk_visits_every_row_once();
        self.collections_are_independent();
        self.staged_mutations_invisible_until_flush();
        self.rollback_leaves_collection_unchanged();
        self.flush_is_atomic();
        self.finalized_transaction_rejects_mutations();
        self.close_without_flush_discards();
        self.exec_delete_and_truncate();
        self.exec_acts_on_transaction_view();
        self.copy_from_ingests_stream();
        self.in_transaction_commits_or_rolls_back();
        self.cancelled_context_fails_everything();
        self.session_limit_is_enforced();
    }

    /// `get_by_id` after `save` returns an equal entity.
    pub fn save_then_get_returns_equal_entity(&self) {
        let engine = self.fresh();
        let table = engine.table::<Operation>();
        let mut op = Operation::new(7, "transaction", -1_500);
        table.save(&ctx(), &mut op).expect("save");
        assert!(op.id.is_assigned(), "save must write the key back");
        assert_eq!(table.get_by_id(&ctx(), op.id).expect("get"), op);
    }

    /// Saving three entities yields keys 1, 2 and 3.
    pub fn keys_start_at_one_and_increase(&self) {
        let engine = self.seeded(3);
        let rows = snapshot(&engine.table::<Block>()).expect("list");
        assert_eq!(
            keys_of(&rows),
            vec![SurrogateKey::new(1), SurrogateKey::new(2), SurrogateKey::new(3)]
        );
    }

    /// Reading a never-saved key reports no rows.
    pub fn missing_key_is_no_rows(&self) {
        let engine = self.seeded(2);
        let table = engine.table::<Block>();
        let err = table
            .get_by_id(&ctx(), SurrogateKey::new(99))
            .expect_err("missing key must fail");
        assert!(table.is_no_rows(&err), "expected no-rows, got {err}");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    /// `last_id` is `None` when empty and the greatest key otherwise.
    pub fn last_id_tracks_greatest_key(&self) {
        let engine = self.fresh();
        let table = engine.table::<Block>();
        assert_eq!(table.last_id(&ctx()).expect("last_id"), None);

        let mut pinned = Block {
            id: SurrogateKey::new(500),
            ..Block::at_level(1)
        };
        table.save(&ctx(), &mut pinned).expect("save pinned");
        let mut next = Block::at_level(2);
        table.save(&ctx(), &mut next).expect("save next");
        assert!(next.id > pinned.id, "keys must not go backwards");
        assert_eq!(table.last_id(&ctx()).expect("last_id"), Some(next.id));
    }

    /// `update` replaces a row and fails for unknown keys.
    pub fn update_replaces_row(&self) {
        let engine = self.seeded(3);
        let table = engine.table::<Block>();
        let mut block = table.get_by_id(&ctx(), SurrogateKey::new(2)).expect("get");
        block.hash = "rewritten".into();
        table.update(&ctx(), &block).expect("update");
        assert_eq!(table.get_by_id(&ctx(), block.id).expect("get").hash, "rewritten");

        let ghost = Block {
            id: SurrogateKey::new(42),
            ..Block::at_level(42)
        };
        let err = table.update(&ctx(), &ghost).expect_err("update of unknown key");
        assert!(err.is_no_rows(), "expected no-rows, got {err}");
    }

    /// Offset listing honors limit, offset and order.
    pub fn offset_listing(&self) {
        let engine = self.seeded(5);
        let table = engine.table::<Block>();
        let levels = |rows: Vec<Block>| rows.into_iter().map(|b| b.level).collect::<Vec<_>>();

        let page = table.list(&ctx(), 2, 1, SortOrder::Asc).expect("list");
        assert_eq!(levels(page), vec![2, 3]);
        let page = table.list(&ctx(), 3, 0, SortOrder::Desc).expect("list");
        assert_eq!(levels(page), vec![5, 4, 3]);
        assert!(table.list(&ctx(), 0, 0, SortOrder::Asc).expect("list").is_empty());
        assert!(table.list(&ctx(), 5, 5, SortOrder::Asc).expect("list").is_empty());
    }

    /// Keys 1..=3 saved; `cursor_list(1, 10, asc, >)` returns 2 and 3.
    pub fn cursor_listing_after_reference(&self) {
        let engine = self.seeded(3);
        let table = engine.table::<Block>();
        let page = table
            .cursor_list(&ctx(), SurrogateKey::new(1), 10, SortOrder::Asc, Comparator::Gt)
            .expect("cursor_list");
        assert_eq!(keys_of(&page), vec![SurrogateKey::new(2), SurrogateKey::new(3)]);

        let page = table
            .cursor_list(&ctx(), SurrogateKey::new(3), 1, SortOrder::Desc, Comparator::Lte)
            .expect("cursor_list");
        assert_eq!(keys_of(&page), vec![SurrogateKey::new(3)]);
    }

    /// Every comparator and order yields nothing on an empty collection.
    pub fn cursor_listing_on_empty_collection(&self) {
        let engine = self.fresh();
        let table = engine.table::<Block>();
        for cmp in Comparator::ALL {
            for order in [SortOrder::Asc, SortOrder::Desc] {
                let page = table
                    .cursor_list(&ctx(), SurrogateKey::new(1), 10, order, cmp)
                    .expect("cursor_list");
                assert!(page.is_empty(), "{cmp} {order} returned rows");
            }
        }
    }

    /// Walking with `>` cursors returns each row once, in key order.
    pub fn cursor_walk_visits_every_row_once(&self) {
        let engine = self.seeded(23);
        let table = engine.table::<Block>();
        let mut cursor = SurrogateKey::UNASSIGNED;
        let mut seen = Vec::new();
        loop {
            let page = table
                .cursor_list(&ctx(), cursor, 5, SortOrder::Asc, Comparator::Gt)
                .expect("cursor_list");
            assert!(page.len() <= 5, "page larger than limit");
            let Some(last) = page.last() else { break };
            cursor = last.id;
            seen.extend(keys_of(&page));
        }
        let all = keys_of(&snapshot(&table).expect("list"));
        assert_eq!(seen, all);
    }

    /// Two entity types never see each other's rows.
    pub fn collections_are_independent(&self) {
        let engine = self.seeded(4);
        let ops = engine.table::<Operation>();
        assert_eq!(ops.last_id(&ctx()).expect("last_id"), None);
        let mut op = Operation::new(1, "reveal", 0);
        ops.save(&ctx(), &mut op).expect("save");
        assert_eq!(op.id, SurrogateKey::new(1), "sequences are per collection");
        assert_eq!(snapshot(&engine.table::<Block>()).expect("list").len(), 4);
    }

    /// Rows staged in a transaction appear only after `flush`.
    pub fn staged_mutations_invisible_until_flush(&self) {
        let engine = self.fresh();
        let table = engine.table::<Block>();
        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        let mut block = Block::at_level(1);
        txn.add(&ctx(), &mut block).expect("add");
        assert!(block.id.is_assigned(), "add must write the key back");
        let mut batch = blocks(3);
        txn.bulk_save(&ctx(), &mut batch).expect("bulk_save");
        assert!(table.get_by_id(&ctx(), block.id).is_err(), "staged row leaked");
        assert!(snapshot(&table).expect("list").is_empty());

        txn.flush(&ctx()).expect("flush");
        assert_eq!(txn.state(), TransactionState::Committed);
        txn.close(&ctx()).expect("close");
        assert_eq!(table.get_by_id(&ctx(), block.id).expect("get"), block);
        assert_eq!(snapshot(&table).expect("list").len(), 4);
    }

    /// Add, update and bulk save followed by rollback change nothing.
    pub fn rollback_leaves_collection_unchanged(&self) {
        let engine = self.seeded(3);
        let before = snapshot(&engine.table::<Block>()).expect("list");
        self.rollback_restores(
            &engine,
            &[
                StagedOp::Add(Block::at_level(10)),
                StagedOp::Update {
                    index: 1,
                    level: 77,
                },
                StagedOp::BulkSave(blocks(4)),
                StagedOp::DeleteFrom(2),
            ],
        );
        assert_eq!(snapshot(&engine.table::<Block>()).expect("list"), before);
    }

    /// Applies `ops` in a transaction, rolls it back and checks that the
    /// committed blocks are unchanged.
    pub fn rollback_restores(&self, engine: &B, ops: &[StagedOp]) {
        let table = engine.table::<Block>();
        let before = snapshot(&table).expect("list");
        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        let mut visible = before.clone();
        for op in ops {
            apply_staged(&mut txn, &mut visible, op).expect("staging");
        }
        txn.rollback(&ctx()).expect("rollback");
        txn.close(&ctx()).expect("close");
        assert_eq!(snapshot(&table).expect("list"), before, "rollback leaked rows");
    }

    /// A flush that fails on its last insert publishes none of the batch.
    pub fn flush_is_atomic(&self) {
        let engine = self.seeded(2);
        let table = engine.table::<Block>();
        let before = snapshot(&table).expect("list");

        let mut loser = engine.begin_transaction(&ctx()).expect("begin");
        let mut batch = blocks(5);
        loser.bulk_save(&ctx(), &mut batch).expect("bulk_save");
        let contested = SurrogateKey::new(1_000);
        loser
            .add(&ctx(), &mut Block { id: contested, ..Block::at_level(9) })
            .expect("add contested");

        let mut winner = engine.begin_transaction(&ctx()).expect("begin");
        winner
            .add(&ctx(), &mut Block { id: contested, ..Block::at_level(8) })
            .expect("add winner");
        winner.flush(&ctx()).expect("winner flush");
        winner.close(&ctx()).expect("close");

        let err = loser.flush(&ctx()).expect_err("conflicting flush must fail");
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation, "got {err}");
        loser.rollback(&ctx()).expect("rollback after failed flush");
        loser.close(&ctx()).expect("close");

        let after = snapshot(&table).expect("list");
        assert_eq!(after.len(), before.len() + 1, "partial flush visible");
        for block in &batch {
            assert!(table.get_by_id(&ctx(), block.id).is_err(), "partial flush visible");
        }
    }

    /// Committed and rolled back transactions reject further work.
    pub fn finalized_transaction_rejects_mutations(&self) {
        let engine = self.fresh();
        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        txn.flush(&ctx()).expect("flush");
        assert_eq!(
            txn.add(&ctx(), &mut Block::at_level(1)).expect_err("add after flush").kind(),
            ErrorKind::Invalid
        );
        assert!(txn.flush(&ctx()).is_err(), "double flush");
        assert!(txn.rollback(&ctx()).is_err(), "rollback after flush");
        txn.close(&ctx()).expect("close");

        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        txn.rollback(&ctx()).expect("rollback");
        assert!(txn.exec(&ctx(), "TRUNCATE blocks", &[]).is_err());
        assert!(txn.flush(&ctx()).is_err(), "flush after rollback");
        txn.close(&ctx()).expect("close");
    }

    /// Closing an open transaction discards its staged mutations.
    pub fn close_without_flush_discards(&self) {
        let engine = self.fresh();
        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        txn.bulk_save(&ctx(), &mut blocks(3)).expect("bulk_save");
        txn.close(&ctx()).expect("close");
        assert!(snapshot(&engine.table::<Block>()).expect("list").is_empty());
    }

    /// `exec` deletes and truncates, reporting affected rows.
    pub fn exec_delete_and_truncate(&self) {
        let engine = self.seeded(6);
        let deleted = engine
            .in_transaction(&ctx(), |txn| {
                txn.exec(&ctx(), "DELETE FROM blocks WHERE id > $1", &[Value::from(4u64)])
            })
            .expect("delete");
        assert_eq!(deleted, 2);
        let table = engine.table::<Block>();
        assert_eq!(table.last_id(&ctx()).expect("last_id"), Some(SurrogateKey::new(4)));

        let truncated = engine
            .in_transaction(&ctx(), |txn| txn.exec(&ctx(), "TRUNCATE TABLE $1", &[Value::from("blocks")]))
            .expect("truncate");
        assert_eq!(truncated, 4);
        assert_eq!(table.last_id(&ctx()).expect("last_id"), None);

        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        let err = txn
            .exec(&ctx(), "DROP TABLE blocks", &[])
            .expect_err("unsupported statement");
        assert_eq!(err.kind(), ErrorKind::Invalid);
        txn.close(&ctx()).expect("close");
    }

    /// A staged delete removes the rows it counted, not rows committed by
    /// others after it was staged, and a key re-added after a truncate
    /// still conflicts with a concurrent commit at flush.
    pub fn exec_acts_on_transaction_view(&self) {
        let engine = self.seeded(2);
        let table = engine.table::<Block>();

        let mut first = engine.begin_transaction(&ctx()).expect("begin");
        let deleted = first
            .exec(&ctx(), "DELETE FROM blocks WHERE id >= $1", &[Value::from(1u64)])
            .expect("delete");
        assert_eq!(deleted, 2);
        engine
            .in_transaction(&ctx(), |txn| txn.bulk_save(&ctx(), &mut blocks(3)))
            .expect("concurrent commit");
        first.flush(&ctx()).expect("flush");
        first.close(&ctx()).expect("close");
        assert_eq!(
            keys_of(&snapshot(&table).expect("list")),
            vec![SurrogateKey::new(3), SurrogateKey::new(4), SurrogateKey::new(5)],
            "delete reached rows committed after staging"
        );

        let contested = SurrogateKey::new(100);
        let mut first = engine.begin_transaction(&ctx()).expect("begin");
        let truncated = first.exec(&ctx(), "TRUNCATE blocks", &[]).expect("truncate");
        assert_eq!(truncated, 3);
        first
            .add(&ctx(), &mut Block { id: contested, ..Block::at_level(1) })
            .expect("add after truncate");
        engine
            .in_transaction(&ctx(), |txn| {
                txn.add(&ctx(), &mut Block { id: contested, ..Block::at_level(2) })
            })
            .expect("concurrent commit");

        let err = first.flush(&ctx()).expect_err("conflicting flush must fail");
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation, "got {err}");
        first.rollback(&ctx()).expect("rollback after failed flush");
        first.close(&ctx()).expect("close");
        assert_eq!(snapshot(&table).expect("list").len(), 4, "partial flush visible");
        assert_eq!(table.get_by_id(&ctx(), contested).expect("get").level, 2);
    }

    /// `copy_from` loads every row of a stream at flush.
    pub fn copy_from_ingests_stream(&self) {
        let engine = self.seeded(2);
        let mut stream = Vec::new();
        let incoming = blocks(4);
        pipestore_core::codec::write_rows(&mut stream, &incoming).expect("encode stream");

        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        let loaded = txn
            .copy_from(&ctx(), &mut stream.as_slice(), "COPY blocks FROM STDIN", &[])
            .expect("copy_from");
        assert_eq!(loaded, 4);
        assert_eq!(snapshot(&engine.table::<Block>()).expect("list").len(), 2);
        txn.flush(&ctx()).expect("flush");
        txn.close(&ctx()).expect("close");

        let rows = snapshot(&engine.table::<Block>()).expect("list");
        assert_eq!(rows.len(), 6);
        let levels: Vec<u64> = rows.iter().map(|b| b.level).collect();
        assert_eq!(levels, vec![1, 2, 1, 2, 3, 4]);
    }

    /// The scoped helper flushes on success and rolls back on error.
    pub fn in_transaction_commits_or_rolls_back(&self) {
        let engine = self.fresh();
        let key = engine
            .in_transaction(&ctx(), |txn| {
                let mut block = Block::at_level(1);
                txn.add(&ctx(), &mut block)?;
                Ok(block.id)
            })
            .expect("commit");

        let err = engine
            .in_transaction(&ctx(), |txn| {
                txn.add(&ctx(), &mut Block::at_level(2))?;
                Err::<(), _>(StorageError::fatal("handler failed"))
            })
            .expect_err("handler error must surface");
        assert_eq!(err.kind(), ErrorKind::Fatal);

        let rows = snapshot(&engine.table::<Block>()).expect("list");
        assert_eq!(keys_of(&rows), vec![key]);
    }

    /// A cancelled context fails every operation and changes nothing.
    pub fn cancelled_context_fails_everything(&self) {
        let engine = self.seeded(3);
        let table = engine.table::<Block>();
        let before = snapshot(&table).expect("list");
        let done = cancelled();
        let is_cancelled = |result: StorageResult<()>| {
            matches!(result, Err(ref e) if e.kind() == ErrorKind::Cancelled)
        };

        assert!(is_cancelled(table.get_by_id(&done, SurrogateKey::new(1)).map(drop)));
        assert!(is_cancelled(table.save(&done, &mut Block::at_level(4))));
        assert!(is_cancelled(table.update(&done, &before[0])));
        assert!(is_cancelled(table.list(&done, 10, 0, SortOrder::Asc).map(drop)));
        assert!(is_cancelled(
            table
                .cursor_list(&done, SurrogateKey::UNASSIGNED, 10, SortOrder::Asc, Comparator::Gt)
                .map(drop)
        ));
        assert!(is_cancelled(table.last_id(&done).map(drop)));
        assert!(is_cancelled(engine.begin_transaction(&done).map(drop)));

        let mut txn = engine.begin_transaction(&ctx()).expect("begin");
        assert!(is_cancelled(txn.add(&done, &mut Block::at_level(5))));
        assert!(is_cancelled(txn.bulk_save(&done, &mut blocks(2))));
        assert!(is_cancelled(txn.update(&done, &before[0])));
        assert!(is_cancelled(txn.exec(&done, "TRUNCATE blocks", &[]).map(drop)));
        assert!(is_cancelled(
            txn.copy_from(&done, &mut std::io::empty(), "COPY blocks FROM STDIN", &[])
                .map(drop)
        ));
        assert!(is_cancelled(txn.flush(&done)));
        txn.rollback(&ctx()).expect("rollback");
        txn.close(&ctx()).expect("close");

        assert_eq!(snapshot(&table).expect("list"), before);
    }

    /// Opening more than the configured number of transactions fails until
    /// one is released.
    pub fn session_limit_is_enforced(&self) {
        let engine = (self.factory)(Config::new().max_open_transactions(2));
        let first = engine.begin_transaction(&ctx()).expect("first");
        let second = engine.begin_transaction(&ctx()).expect("second");
        let err = engine
            .begin_transaction(&ctx())
            .map(drop)
            .expect_err("third must fail");
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

        first.close(&ctx()).expect("close");
        let third = engine.begin_transaction(&ctx()).expect("slot freed by close");
        drop(second);
        let fourth = engine.begin_transaction(&ctx()).expect("slot freed by drop");
        third.close(&ctx()).expect("close");
        fourth.close(&ctx()).expect("close");
    }
}

/// Stages `op` in `txn`, tracking the blocks the transaction can see in
/// `visible`.
pub fn apply_staged<T: Transaction>(
    txn: &mut T,
    visible: &mut Vec<Block>,
    op: &StagedOp,
) -> StorageResult<()> {
    let ctx = Context::background();
    match op {
        StagedOp::Add(block) => {
            let mut block = block.clone();
            txn.add(&ctx, &mut block)?;
            visible.push(block);
        }
        StagedOp::BulkSave(batch) => {
            let mut batch = batch.clone();
            txn.bulk_save(&ctx, &mut batch)?;
            visible.extend(batch);
        }
        StagedOp::Update { index, level } => {
            if !visible.is_empty() {
                let len = visible.len();
                let target = &mut visible[index % len];
                target.level = *level;
                txn.update(&ctx, &*target)?;
            }
        }
        StagedOp::DeleteFrom(key) => {
            let deleted = txn.exec(
                &ctx,
                "DELETE FROM blocks WHERE id >= $1",
                &[Value::from(*key)],
            )?;
            let before = visible.len();
            visible.retain(|b| b.id.as_u64() < *key);
            assert_eq!(deleted as usize, before - visible.len(), "delete count");
        }
    }
    Ok(())
}
