//! Sample models shaped like indexer output.

use pipestore_core::{Context, Model, SortOrder, StorageResult, SurrogateKey, Table};
use serde::{Deserialize, Serialize};

/// A chain block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Surrogate key.
    #[serde(default)]
    pub id: SurrogateKey,
    /// Chain level.
    pub level: u64,
    /// Block hash.
    pub hash: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl Block {
    /// Creates an unsaved block at `level` with a derived hash.
    pub fn at_level(level: u64) -> Self {
        Self {
            id: SurrogateKey::UNASSIGNED,
            level,
            hash: format!("B{level:016x}"),
            timestamp: 1_600_000_000 + level as i64 * 30,
        }
    }
}

impl Model for Block {
    fn table_name() -> &'static str {
        "blocks"
    }

    fn key(&self) -> SurrogateKey {
        self.id
    }

    fn set_key(&mut self, key: SurrogateKey) {
        self.id = key;
    }
}

/// An operation included in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Surrogate key.
    #[serde(default)]
    pub id: SurrogateKey,
    /// Level of the including block.
    pub level: u64,
    /// Operation kind, e.g. `transaction` or `origination`.
    pub kind: String,
    /// Amount moved, in the smallest unit.
    pub amount: i64,
}

impl Operation {
    /// Creates an unsaved operation.
    pub fn new(level: u64, kind: &str, amount: i64) -> Self {
        Self {
            id: SurrogateKey::UNASSIGNED,
            level,
            kind: kind.to_string(),
            amount,
        }
    }
}

impl Model for Operation {
    fn table_name() -> &'static str {
        "operations"
    }

    fn key(&self) -> SurrogateKey {
        self.id
    }

    fn set_key(&mut self, key: SurrogateKey) {
        self.id = key;
    }
}

/// Unsaved blocks for levels `1..=count`.
pub fn blocks(count: u64) -> Vec<Block> {
    (1..=count).map(Block::at_level).collect()
}

/// Keys of `models`, in order.
pub fn keys_of<M: Model>(models: &[M]) -> Vec<SurrogateKey> {
    models.iter().map(Model::key).collect()
}

/// Every committed row of `M`, ascending by key.
pub fn snapshot<M: Model, T: Table<M>>(table: &T) -> StorageResult<Vec<M>> {
    table.list(&Context::background(), u64::MAX, 0, SortOrder::Asc)
}
