//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use pipestore_core::codec::write_rows;
use pipestore_core::{Context, Transactable, Transaction};
use pipestore_memory::MemoryEngine;
use pipestore_testkit::fixtures::{blocks, Block};

/// Builds an engine holding `count` committed blocks.
pub fn seeded_engine(count: u64) -> MemoryEngine {
    let engine = MemoryEngine::new();
    let ctx = Context::background();
    engine
        .in_transaction(&ctx, |txn| txn.bulk_save(&ctx, &mut blocks(count)))
        .expect("seed engine");
    engine
}

/// Encodes `count` unsaved blocks as a `copy_from` stream.
pub fn block_stream(count: u64) -> Vec<u8> {
    let mut stream = Vec::new();
    write_rows(&mut stream, &blocks(count)).expect("encode stream");
    stream
}

/// Unsaved blocks for a batch benchmark.
pub fn batch(count: u64) -> Vec<Block> {
    blocks(count)
}
