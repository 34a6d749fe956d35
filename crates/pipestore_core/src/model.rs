//! Entity contract.

use crate::types::SurrogateKey;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for domain types that can be persisted through a [`crate::Table`]
/// or a [`crate::Transaction`].
///
/// Implementors must provide:
/// - `table_name()`: the collection the type lives in
/// - `key()` / `set_key()`: access to the surrogate key the engine assigns
///
/// Rows are produced with serde, so the surrogate key should serialize
/// under the [`crate::codec::KEY_COLUMN`] field. That keeps rows written by
/// `save` and rows loaded by `copy_from` interchangeable.
///
/// # Example
///
/// ```rust
/// use pipestore_core::{Model, SurrogateKey};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Block {
///     id: SurrogateKey,
///     height: u64,
/// }
///
/// impl Model for Block {
///     fn table_name() -> &'static str {
///         "blocks"
///     }
///
///     fn key(&self) -> SurrogateKey {
///         self.id
///     }
///
///     fn set_key(&mut self, key: SurrogateKey) {
///         self.id = key;
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the collection identifier.
    ///
    /// Must be stable for the lifetime of the type and unique among the
    /// collections of one engine.
    fn table_name() -> &'static str;

    /// Returns the surrogate key, [`SurrogateKey::UNASSIGNED`] before the
    /// entity was first saved.
    fn key(&self) -> SurrogateKey;

    /// Stores the surrogate key assigned by the engine.
    fn set_key(&mut self, key: SurrogateKey);
}
