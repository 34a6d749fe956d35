//! # pipestore core
//!
//! Storage-access contracts for indexing pipelines.
//!
//! This crate provides:
//! - The entity contract ([`Model`]) and surrogate keys
//! - Sort order and comparator vocabulary for keyset predicates
//! - The per-entity [`Table`] accessor contract
//! - The [`Transaction`] protocol and its [`Transactable`] factory
//! - Cancellation and deadline propagation ([`Context`])
//! - Offset and keyset pagination shared by engine adapters
//! - Row encoding for entities and ingestion streams
//!
//! It does not implement a storage engine; see `pipestore_memory` for the
//! reference in-memory engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod config;
mod context;
mod error;
mod model;
mod ordering;
mod query;
mod table;
mod transaction;
mod types;
mod value;

pub use config::Config;
pub use context::{CancellationToken, Context};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use model::Model;
pub use ordering::{Comparator, ParseOrderingError, SortOrder};
pub use query::{CursorQuery, OffsetQuery};
pub use table::Table;
pub use transaction::{
    ErrorClassifier, StrictClassifier, Transactable, Transaction, TransactionState,
    TransientClassifier,
};
pub use types::{SurrogateKey, TransactionId};
pub use value::Value;
