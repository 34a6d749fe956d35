//! Offset and keyset pagination.
//!
//! Both queries order rows solely by surrogate key. Engines holding rows in
//! an ordered map use [`OffsetQuery::select`] and [`CursorQuery::select`];
//! relational adapters use the `render` methods to build their clauses.

use crate::ordering::{Comparator, SortOrder};
use crate::types::SurrogateKey;
use std::collections::BTreeMap;

fn limit_to_usize(limit: u64) -> usize {
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// `LIMIT n OFFSET m` listing.
///
/// Cost grows with the offset; use [`CursorQuery`] for large collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetQuery {
    /// Maximum number of rows returned.
    pub limit: u64,
    /// Number of rows skipped.
    pub offset: u64,
    /// Direction.
    pub order: SortOrder,
}

impl OffsetQuery {
    /// Creates a new offset query.
    #[must_use]
    pub const fn new(limit: u64, offset: u64, order: SortOrder) -> Self {
        Self {
            limit,
            offset,
            order,
        }
    }

    /// Returns the selected entries of `rows` in listing order.
    pub fn select<'a, V>(
        &self,
        rows: &'a BTreeMap<SurrogateKey, V>,
    ) -> Box<dyn Iterator<Item = (SurrogateKey, &'a V)> + 'a> {
        let limit = limit_to_usize(self.limit);
        let offset = limit_to_usize(self.offset);
        let entries = rows.iter().map(|(k, v)| (*k, v));
        match self.order {
            SortOrder::Asc => Box::new(entries.skip(offset).take(limit)),
            SortOrder::Desc => Box::new(entries.rev().skip(offset).take(limit)),
        }
    }

    /// Renders `ORDER BY <column> <dir> LIMIT <n> OFFSET <m>`.
    #[must_use]
    pub fn render(&self, column: &str) -> String {
        format!(
            "ORDER BY {column} {} LIMIT {} OFFSET {}",
            self.order.keyword(),
            self.limit,
            self.offset
        )
    }
}

/// Keyset listing: rows with `key <comparator> reference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorQuery {
    /// Key the predicate compares against.
    pub reference: SurrogateKey,
    /// Maximum number of rows returned.
    pub limit: u64,
    /// Direction.
    pub order: SortOrder,
    /// Predicate operator.
    pub comparator: Comparator,
}

impl CursorQuery {
    /// Creates a new cursor query.
    #[must_use]
    pub const fn new(
        reference: SurrogateKey,
        limit: u64,
        order: SortOrder,
        comparator: Comparator,
    ) -> Self {
        Self {
            reference,
            limit,
            order,
            comparator,
        }
    }

    /// Returns `true` if `key` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, key: SurrogateKey) -> bool {
        self.comparator.matches(key, self.reference)
    }

    /// Returns the selected entries of `rows` in listing order.
    ///
    /// Only the key range that can match is visited, so the cost does not
    /// depend on how far into the collection the reference key lies.
    pub fn select<'a, V>(
        &self,
        rows: &'a BTreeMap<SurrogateKey, V>,
    ) -> Box<dyn Iterator<Item = (SurrogateKey, &'a V)> + 'a> {
        let limit = limit_to_usize(self.limit);
        let query = *self;
        let entries = rows
            .range(self.comparator.key_range(self.reference))
            .filter(move |(k, _)| query.matches(**k))
            .map(|(k, v)| (*k, v));
        match self.order {
            SortOrder::Asc => Box::new(entries.take(limit)),
            SortOrder::Desc => Box::new(entries.rev().take(limit)),
        }
    }

    /// Cursor for the page following `last_key`, the final key of the
    /// current page.
    ///
    /// Only meaningful for the strict range comparators used when walking a
    /// collection (`>` ascending, `<` descending).
    #[must_use]
    pub fn after(&self, last_key: SurrogateKey) -> Self {
        Self {
            reference: last_key,
            ..*self
        }
    }

    /// Renders `<column> <op> <placeholder> ORDER BY <column> <dir> LIMIT <n>`.
    #[must_use]
    pub fn render(&self, column: &str, placeholder: &str) -> String {
        format!(
            "{column} {} {placeholder} ORDER BY {column} {} LIMIT {}",
            self.comparator,
            self.order.keyword(),
            self.limit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(keys: impl IntoIterator<Item = u64>) -> BTreeMap<SurrogateKey, u64> {
        keys.into_iter().map(|k| (SurrogateKey::new(k), k * 10)).collect()
    }

    fn keys<'a>(it: impl Iterator<Item = (SurrogateKey, &'a u64)>) -> Vec<u64> {
        it.map(|(k, _)| k.as_u64()).collect()
    }

    #[test]
    fn offset_ascending_and_descending() {
        let rows = rows(1..=5);
        let asc = OffsetQuery::new(2, 1, SortOrder::Asc);
        assert_eq!(keys(asc.select(&rows)), vec![2, 3]);

        let desc = OffsetQuery::new(2, 1, SortOrder::Desc);
        assert_eq!(keys(desc.select(&rows)), vec![4, 3]);
    }

    #[test]
    fn offset_past_end_is_empty() {
        let rows = rows(1..=3);
        assert!(keys(OffsetQuery::new(10, 3, SortOrder::Asc).select(&rows)).is_empty());
        assert!(keys(OffsetQuery::new(0, 0, SortOrder::Asc).select(&rows)).is_empty());
    }

    #[test]
    fn cursor_greater_ascending() {
        let rows = rows(1..=3);
        let q = CursorQuery::new(SurrogateKey::new(1), 10, SortOrder::Asc, Comparator::Gt);
        assert_eq!(keys(q.select(&rows)), vec![2, 3]);
    }

    #[test]
    fn cursor_less_descending() {
        let rows = rows(1..=6);
        let q = CursorQuery::new(SurrogateKey::new(5), 2, SortOrder::Desc, Comparator::Lt);
        assert_eq!(keys(q.select(&rows)), vec![4, 3]);
    }

    #[test]
    fn cursor_zero_gte_starts_at_first_row() {
        let rows = rows([3, 8, 9]);
        let q = CursorQuery::new(SurrogateKey::new(0), 2, SortOrder::Asc, Comparator::Gte);
        assert_eq!(keys(q.select(&rows)), vec![3, 8]);
    }

    #[test]
    fn cursor_not_equal_skips_reference() {
        let rows = rows(1..=4);
        let q = CursorQuery::new(SurrogateKey::new(2), 10, SortOrder::Desc, Comparator::Neq);
        assert_eq!(keys(q.select(&rows)), vec![4, 3, 1]);
    }

    #[test]
    fn cursor_beyond_all_keys_is_empty() {
        let rows = rows(1..=4);
        let q = CursorQuery::new(SurrogateKey::new(4), 10, SortOrder::Asc, Comparator::Gt);
        assert!(keys(q.select(&rows)).is_empty());
    }

    #[test]
    fn empty_collection_is_empty_for_every_comparator() {
        let rows = rows([]);
        for cmp in Comparator::ALL {
            for order in [SortOrder::Asc, SortOrder::Desc] {
                let q = CursorQuery::new(SurrogateKey::new(3), 10, order, cmp);
                assert!(keys(q.select(&rows)).is_empty());
            }
        }
    }

    #[test]
    fn walking_pages_visits_every_row_once() {
        let rows = rows((1..=23).map(|k| k * 3));
        let mut query = CursorQuery::new(SurrogateKey::UNASSIGNED, 5, SortOrder::Asc, Comparator::Gt);
        let mut seen = Vec::new();
        loop {
            let page = keys(query.select(&rows));
            let Some(&last) = page.last() else { break };
            seen.extend(page);
            query = query.after(SurrogateKey::new(last));
        }
        assert_eq!(seen, rows.keys().map(|k| k.as_u64()).collect::<Vec<_>>());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn comparator() -> impl Strategy<Value = Comparator> {
            prop::sample::select(Comparator::ALL.to_vec())
        }

        fn order() -> impl Strategy<Value = SortOrder> {
            prop_oneof![Just(SortOrder::Asc), Just(SortOrder::Desc)]
        }

        proptest! {
            #[test]
            fn cursor_select_matches_full_scan(
                key_set in prop::collection::btree_set(1u64..200, 0..60),
                reference in 0u64..210,
                limit in 0u64..20,
                cmp in comparator(),
                order in order(),
            ) {
                let rows = rows(key_set);
                let query = CursorQuery::new(SurrogateKey::new(reference), limit, order, cmp);

                let mut expected: Vec<u64> = rows
                    .keys()
                    .map(|k| k.as_u64())
                    .filter(|k| cmp.matches(SurrogateKey::new(*k), SurrogateKey::new(reference)))
                    .collect();
                if order == SortOrder::Desc {
                    expected.reverse();
                }
                expected.truncate(limit as usize);

                prop_assert_eq!(keys(query.select(&rows)), expected);
            }

            #[test]
            fn offset_pages_partition_the_collection(
                key_set in prop::collection::btree_set(1u64..500, 0..80),
                page in 1u64..15,
            ) {
                let rows = rows(key_set);
                let mut seen = Vec::new();
                let mut offset = 0;
                loop {
                    let batch = keys(OffsetQuery::new(page, offset, SortOrder::Asc).select(&rows));
                    if batch.is_empty() {
                        break;
                    }
                    offset += batch.len() as u64;
                    seen.extend(batch);
                }
                prop_assert_eq!(seen, rows.keys().map(|k| k.as_u64()).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn render_clauses() {
        let q = CursorQuery::new(SurrogateKey::new(10), 50, SortOrder::Desc, Comparator::Lte);
        assert_eq!(q.render("id", "$1"), "id <= $1 ORDER BY id DESC LIMIT 50");

        let o = OffsetQuery::new(20, 40, SortOrder::Asc);
        assert_eq!(o.render("id"), "ORDER BY id ASC LIMIT 20 OFFSET 40");
    }
}
