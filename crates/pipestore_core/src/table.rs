//! Entity table contract.

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::model::Model;
use crate::ordering::{Comparator, SortOrder};
use crate::types::SurrogateKey;

/// Accessor for the collection of one entity type.
///
/// Tables hold no mutable state of their own; every call goes straight to
/// the engine and auto-commits. Reads are safe to issue concurrently from
/// any number of threads.
///
/// # Example
///
/// ```rust,ignore
/// let blocks = engine.table::<Block>();
/// let ctx = Context::background();
///
/// let mut block = Block::new(100);
/// blocks.save(&ctx, &mut block)?;
///
/// // Walk the collection page by page.
/// let mut last = SurrogateKey::UNASSIGNED;
/// loop {
///     let page = blocks.cursor_list(&ctx, last, 500, SortOrder::Asc, Comparator::Gt)?;
///     let Some(tail) = page.last() else { break };
///     last = tail.key();
///     // ... process page
/// }
/// ```
pub trait Table<M: Model>: Send + Sync {
    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns an error for which [`Table::is_no_rows`] is `true` when no
    /// row has `id`.
    fn get_by_id(&self, ctx: &Context, id: SurrogateKey) -> StorageResult<M>;

    /// Inserts `model` as a new row.
    ///
    /// An unassigned key is replaced by the next key of the collection and
    /// written back into `model`.
    ///
    /// # Errors
    ///
    /// Returns a constraint violation if `model` carries a key that is
    /// already taken or cannot be encoded.
    fn save(&self, ctx: &Context, model: &mut M) -> StorageResult<()>;

    /// Replaces the row with `model`'s key.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if no such row exists.
    fn update(&self, ctx: &Context, model: &M) -> StorageResult<()>;

    /// Lists up to `limit` rows after skipping `offset`, by key.
    ///
    /// Intended for small, bounded scans.
    fn list(
        &self,
        ctx: &Context,
        limit: u64,
        offset: u64,
        order: SortOrder,
    ) -> StorageResult<Vec<M>>;

    /// Lists up to `limit` rows whose key satisfies `key <cmp> id`.
    ///
    /// Returns an empty vector, not an error, when nothing matches.
    fn cursor_list(
        &self,
        ctx: &Context,
        id: SurrogateKey,
        limit: u64,
        order: SortOrder,
        cmp: Comparator,
    ) -> StorageResult<Vec<M>>;

    /// Largest key in the collection, `None` when it is empty.
    fn last_id(&self, ctx: &Context) -> StorageResult<Option<SurrogateKey>>;

    /// Returns `true` if `err` means "no matching row".
    fn is_no_rows(&self, err: &StorageError) -> bool {
        err.is_no_rows()
    }
}
