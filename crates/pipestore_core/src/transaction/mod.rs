//! Transaction protocol.
//!
//! A transaction is opened by a [`Transactable`] factory, stages any number
//! of mutations, is finalized by exactly one of [`Transaction::flush`] or
//! [`Transaction::rollback`], and is always released with
//! [`Transaction::close`]:
//!
//! ```text
//! Open --add/update/bulk_save/copy_from/exec--> Open
//! Open --flush--> Committed --close--> (released)
//! Open --rollback--> RolledBack --close--> (released)
//! Open --close--> (implicit rollback, released)
//! ```
//!
//! Staged mutations, including `bulk_save`, `copy_from` and `exec`, become
//! visible together at `flush` or not at all.

mod classify;
mod state;

pub use classify::{ErrorClassifier, StrictClassifier, TransientClassifier};
pub use state::TransactionState;

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::model::Model;
use crate::value::Value;
use std::io::Read;
use tracing::warn;

/// A scoped unit of work over staged mutations.
///
/// Transactions are owned by a single caller; mutating methods take
/// `&mut self`, so concurrent use of one transaction does not compile.
/// Engines must release the session when a transaction is dropped without
/// [`Transaction::close`], so panics cannot leak sessions.
pub trait Transaction: Send {
    /// Stages an insert of `model`. The assigned key is written back into
    /// `model` immediately; the row is visible only after `flush`.
    fn add<M: Model>(&mut self, ctx: &Context, model: &mut M) -> StorageResult<()>;

    /// Stages a replacement of the row with `model`'s key.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the key is neither committed nor staged.
    fn update<M: Model>(&mut self, ctx: &Context, model: &M) -> StorageResult<()>;

    /// Stages all of `models` as one batch.
    ///
    /// Either the whole batch is staged or nothing is.
    fn bulk_save<M: Model>(&mut self, ctx: &Context, models: &mut [M]) -> StorageResult<()>;

    /// Loads serialized rows from `reader` into the collection named by
    /// `query`, staged as one batch. Returns the number of rows read.
    fn copy_from(
        &mut self,
        ctx: &Context,
        reader: &mut dyn Read,
        query: &str,
        args: &[Value],
    ) -> StorageResult<u64>;

    /// Stages an engine-native parameterized statement and returns the
    /// number of rows it affects.
    fn exec(&mut self, ctx: &Context, query: &str, params: &[Value]) -> StorageResult<u64>;

    /// Applies every staged mutation atomically.
    fn flush(&mut self, ctx: &Context) -> StorageResult<()>;

    /// Discards every staged mutation.
    fn rollback(&mut self, ctx: &Context) -> StorageResult<()>;

    /// Releases the transaction's session. An unfinished transaction is
    /// rolled back implicitly.
    fn close(self, ctx: &Context) -> StorageResult<()>
    where
        Self: Sized;

    /// Classifies a failure raised by one of this transaction's mutations.
    ///
    /// Returns `err` unchanged when the caller must roll back, or a
    /// recoverable wrapper when it may continue.
    fn handle_error(&mut self, ctx: &Context, err: StorageError) -> StorageError;

    /// Current lifecycle state.
    fn state(&self) -> TransactionState;
}

/// Factory for transactions.
pub trait Transactable: Send + Sync {
    /// Transaction type produced by this factory.
    type Transaction: Transaction;

    /// Opens a new transaction bound to `ctx`.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot allocate a session.
    fn begin_transaction(&self, ctx: &Context) -> StorageResult<Self::Transaction>;

    /// Runs `f` inside a transaction.
    ///
    /// Flushes when `f` succeeds, rolls back when `f` or the flush fails,
    /// and closes the transaction on every path.
    fn in_transaction<R, F>(&self, ctx: &Context, f: F) -> StorageResult<R>
    where
        Self: Sized,
        F: FnOnce(&mut Self::Transaction) -> StorageResult<R>,
    {
        let mut txn = self.begin_transaction(ctx)?;
        let outcome = f(&mut txn).and_then(|value| txn.flush(ctx).map(|()| value));

        match outcome {
            Ok(value) => {
                txn.close(ctx)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback(ctx) {
                    warn!(error = %rollback_err, "rollback failed");
                }
                if let Err(close_err) = txn.close(ctx) {
                    warn!(error = %close_err, "close failed");
                }
                Err(err)
            }
        }
    }
}
