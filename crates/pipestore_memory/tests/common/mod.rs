#![allow(dead_code)]

use pipestore_core::{Config, Context, Model, StorageResult, Transactable};
use pipestore_memory::{MemoryEngine, MemoryTable, MemoryTransaction};
use pipestore_testkit::Fixture;

/// Wraps the engine so the test kit's traits can be implemented here.
#[derive(Debug, Clone)]
pub struct Engine(pub MemoryEngine);

impl Engine {
    pub fn new() -> Self {
        Self(MemoryEngine::new())
    }

    pub fn with_config(config: Config) -> Self {
        Self(MemoryEngine::with_config(config))
    }
}

impl Transactable for Engine {
    type Transaction = MemoryTransaction;

    fn begin_transaction(&self, ctx: &Context) -> StorageResult<MemoryTransaction> {
        self.0.begin_transaction(ctx)
    }
}

impl Fixture for Engine {
    type Accessor<M: Model> = MemoryTable<M>;

    fn table<M: Model>(&self) -> MemoryTable<M> {
        self.0.table()
    }
}
