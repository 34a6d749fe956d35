//! Property-based test generators using proptest.

use crate::fixtures::{Block, Operation};
use pipestore_core::{Comparator, SortOrder, SurrogateKey};
use proptest::prelude::*;

/// Strategy for unsaved blocks.
pub fn block_strategy() -> impl Strategy<Value = Block> {
    (1u64..1_000_000, any::<u32>()).prop_map(|(level, salt)| Block {
        hash: format!("B{level:016x}{salt:08x}"),
        ..Block::at_level(level)
    })
}

/// Strategy for unsaved operations.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    (
        1u64..1_000_000,
        prop_oneof![
            Just("transaction"),
            Just("origination"),
            Just("delegation"),
            Just("reveal"),
        ],
        any::<i64>(),
    )
        .prop_map(|(level, kind, amount)| Operation::new(level, kind, amount))
}

/// Strategy for any comparator.
pub fn comparator_strategy() -> impl Strategy<Value = Comparator> {
    prop::sample::select(Comparator::ALL.to_vec())
}

/// Strategy for either sort order.
pub fn sort_order_strategy() -> impl Strategy<Value = SortOrder> {
    prop_oneof![Just(SortOrder::Asc), Just(SortOrder::Desc)]
}

/// Strategy for reference keys, including the unassigned placeholder.
pub fn reference_key_strategy(max: u64) -> impl Strategy<Value = SurrogateKey> {
    (0..=max).prop_map(SurrogateKey::new)
}

/// A mutation applied inside a transaction by property tests.
#[derive(Debug, Clone)]
pub enum StagedOp {
    /// Stage an insert of one block.
    Add(Block),
    /// Stage a batch of blocks.
    BulkSave(Vec<Block>),
    /// Stage a level change of the `n`-th visible block, modulo the
    /// number of blocks (skipped when there are none).
    Update {
        /// Index into the visible blocks.
        index: usize,
        /// New level.
        level: u64,
    },
    /// Stage `DELETE FROM blocks WHERE id >= <key>`.
    DeleteFrom(u64),
}

/// Strategy for a single staged mutation.
pub fn staged_op_strategy() -> impl Strategy<Value = StagedOp> {
    prop_oneof![
        4 => block_strategy().prop_map(StagedOp::Add),
        2 => prop::collection::vec(block_strategy(), 0..8).prop_map(StagedOp::BulkSave),
        2 => (any::<usize>(), 1u64..1_000_000)
            .prop_map(|(index, level)| StagedOp::Update { index, level }),
        1 => (1u64..40).prop_map(StagedOp::DeleteFrom),
    ]
}

/// Strategy for a sequence of staged mutations.
pub fn staged_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StagedOp>> {
    prop::collection::vec(staged_op_strategy(), 0..max_len)
}
