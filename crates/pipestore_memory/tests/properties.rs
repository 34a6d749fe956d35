mod common;

use common::Engine;
use pipestore_core::{Context, SortOrder, SurrogateKey, Table, Transactable, Transaction};
use pipestore_testkit::conformance::{apply_staged, ConformanceSuite};
use pipestore_testkit::fixtures::{blocks, keys_of, snapshot, Block};
use pipestore_testkit::generators::{
    block_strategy, comparator_strategy, reference_key_strategy, sort_order_strategy,
    staged_ops_strategy,
};
use pipestore_testkit::Fixture;
use proptest::prelude::*;

fn seeded(count: u64) -> Engine {
    let engine = Engine::new();
    engine
        .in_transaction(&Context::background(), |txn| {
            txn.bulk_save(&Context::background(), &mut blocks(count))
        })
        .unwrap();
    engine
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cursor_list_matches_filtered_scan(
        count in 0u64..40,
        reference in reference_key_strategy(45),
        limit in 0u64..15,
        cmp in comparator_strategy(),
        order in sort_order_strategy(),
    ) {
        let engine = seeded(count);
        let table = engine.table::<Block>();
        let page = table
            .cursor_list(&Context::background(), reference, limit, order, cmp)
            .unwrap();

        let mut expected: Vec<SurrogateKey> = keys_of(&snapshot(&table).unwrap())
            .into_iter()
            .filter(|k| cmp.matches(*k, reference))
            .collect();
        if order == SortOrder::Desc {
            expected.reverse();
        }
        expected.truncate(limit as usize);
        prop_assert_eq!(keys_of(&page), expected);
    }

    #[test]
    fn rollback_restores_committed_rows(
        count in 0u64..10,
        ops in staged_ops_strategy(12),
    ) {
        let engine = seeded(count);
        ConformanceSuite::new(Engine::with_config).rollback_restores(&engine, &ops);
    }

    #[test]
    fn flush_publishes_exactly_the_staged_view(
        count in 0u64..10,
        ops in staged_ops_strategy(12),
    ) {
        let engine = seeded(count);
        let table = engine.table::<Block>();
        let ctx = Context::background();
        let mut visible = snapshot(&table).unwrap();

        let mut txn = engine.begin_transaction(&ctx).unwrap();
        for op in &ops {
            apply_staged(&mut txn, &mut visible, op).unwrap();
        }
        txn.flush(&ctx).unwrap();
        txn.close(&ctx).unwrap();

        visible.sort_by_key(|b| b.id);
        prop_assert_eq!(snapshot(&table).unwrap(), visible);
    }

    #[test]
    fn saved_keys_increase(batch in prop::collection::vec(block_strategy(), 1..20)) {
        let engine = Engine::new();
        let table = engine.table::<Block>();
        let ctx = Context::background();
        let mut previous = SurrogateKey::UNASSIGNED;
        for mut block in batch {
            table.save(&ctx, &mut block).unwrap();
            prop_assert!(block.id > previous);
            previous = block.id;
            prop_assert_eq!(table.get_by_id(&ctx, block.id).unwrap(), block);
        }
        prop_assert_eq!(table.last_id(&ctx).unwrap(), Some(previous));
    }
}
