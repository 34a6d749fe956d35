//! # pipestore memory engine
//!
//! Reference implementation of the pipestore contracts, holding every
//! collection in process memory.
//!
//! - [`MemoryEngine`] opens transactions and hands out tables
//! - [`MemoryTable`] reads and writes committed rows directly
//! - [`MemoryTransaction`] stages mutations and applies them atomically
//!
//! Rows are stored CBOR-encoded, so models go through the same
//! serialization path a persistent engine would use.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod statement;
mod store;
mod table;
mod transaction;

pub use engine::MemoryEngine;
pub use table::MemoryTable;
pub use transaction::MemoryTransaction;
