//! Committed row storage and atomic application of staged mutations.

use bytes::Bytes;
use pipestore_core::{Comparator, StorageError, StorageResult, SurrogateKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Rows of one collection, ordered by key.
pub(crate) type Rows = BTreeMap<SurrogateKey, Bytes>;

/// Key predicate of a staged delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct KeyFilter {
    pub(crate) comparator: Comparator,
    pub(crate) reference: SurrogateKey,
}

impl KeyFilter {
    pub(crate) fn matches(self, key: SurrogateKey) -> bool {
        self.comparator.matches(key, self.reference)
    }

    pub(crate) fn range(self) -> (Bound<SurrogateKey>, Bound<SurrogateKey>) {
        self.comparator.key_range(self.reference)
    }
}

/// A mutation staged by a transaction, applied at flush.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    /// Insert rows with pre-assigned keys. Fails on an existing key.
    Insert {
        collection: String,
        rows: Vec<(SurrogateKey, Bytes)>,
    },
    /// Replace an existing row. Fails if the row is gone.
    Update {
        collection: String,
        key: SurrogateKey,
        payload: Bytes,
    },
    /// Remove exactly these rows. Fails if any of them is gone.
    Delete {
        collection: String,
        keys: BTreeSet<SurrogateKey>,
    },
}

impl Mutation {
    /// Number of rows carried by the mutation.
    pub(crate) fn row_count(&self) -> usize {
        match self {
            Mutation::Insert { rows, .. } => rows.len(),
            Mutation::Update { .. } => 1,
            Mutation::Delete { keys, .. } => keys.len(),
        }
    }
}

enum Undo {
    Inserted {
        collection: String,
        key: SurrogateKey,
    },
    Replaced {
        collection: String,
        key: SurrogateKey,
        previous: Bytes,
    },
    Removed {
        collection: String,
        key: SurrogateKey,
        previous: Bytes,
    },
}

/// All committed collections.
#[derive(Debug, Default)]
pub(crate) struct Store {
    collections: HashMap<String, Rows>,
}

impl Store {
    pub(crate) fn rows(&self, collection: &str) -> Option<&Rows> {
        self.collections.get(collection)
    }

    pub(crate) fn get(&self, collection: &str, key: SurrogateKey) -> Option<&Bytes> {
        self.rows(collection).and_then(|rows| rows.get(&key))
    }

    pub(crate) fn contains(&self, collection: &str, key: SurrogateKey) -> bool {
        self.get(collection, key).is_some()
    }

    pub(crate) fn last_key(&self, collection: &str) -> Option<SurrogateKey> {
        self.rows(collection)
            .and_then(|rows| rows.last_key_value())
            .map(|(key, _)| *key)
    }

    pub(crate) fn len(&self, collection: &str) -> usize {
        self.rows(collection).map_or(0, BTreeMap::len)
    }

    /// Inserts a new row.
    pub(crate) fn insert(
        &mut self,
        collection: &str,
        key: SurrogateKey,
        payload: Bytes,
    ) -> StorageResult<()> {
        let rows = self.collections.entry(collection.to_string()).or_default();
        if rows.contains_key(&key) {
            return Err(StorageError::constraint_violation(
                collection,
                format!("duplicate key {key}"),
            ));
        }
        rows.insert(key, payload);
        Ok(())
    }

    /// Replaces an existing row and returns the previous payload.
    pub(crate) fn replace(
        &mut self,
        collection: &str,
        key: SurrogateKey,
        payload: Bytes,
    ) -> StorageResult<Bytes> {
        self.collections
            .get_mut(collection)
            .and_then(|rows| rows.get_mut(&key))
            .map(|slot| std::mem::replace(slot, payload))
            .ok_or_else(|| StorageError::not_found(collection, key))
    }

    /// Removes an existing row and returns its payload.
    pub(crate) fn remove(&mut self, collection: &str, key: SurrogateKey) -> StorageResult<Bytes> {
        self.collections
            .get_mut(collection)
            .and_then(|rows| rows.remove(&key))
            .ok_or_else(|| StorageError::not_found(collection, key))
    }

    /// Applies `mutations` in order, all or nothing.
    ///
    /// On the first failure every change made so far is reverted and the
    /// error is returned.
    pub(crate) fn apply(&mut self, mutations: &[Mutation]) -> StorageResult<()> {
        let mut undo = Vec::new();
        for mutation in mutations {
            if let Err(err) = self.apply_one(mutation, &mut undo) {
                self.revert(undo);
                return Err(err);
            }
        }
        Ok(())
    }

    fn apply_one(&mut self, mutation: &Mutation, undo: &mut Vec<Undo>) -> StorageResult<()> {
        match mutation {
            Mutation::Insert { collection, rows } => {
                for (key, payload) in rows {
                    self.insert(collection, *key, payload.clone())?;
                    undo.push(Undo::Inserted {
                        collection: collection.clone(),
                        key: *key,
                    });
                }
            }
            Mutation::Update {
                collection,
                key,
                payload,
            } => {
                let previous = self.replace(collection, *key, payload.clone())?;
                undo.push(Undo::Replaced {
                    collection: collection.clone(),
                    key: *key,
                    previous,
                });
            }
            Mutation::Delete { collection, keys } => {
                for key in keys {
                    let previous = self.remove(collection, *key)?;
                    undo.push(Undo::Removed {
                        collection: collection.clone(),
                        key: *key,
                        previous,
                    });
                }
            }
        }
        Ok(())
    }

    fn revert(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            match step {
                Undo::Inserted { collection, key } => {
                    if let Some(rows) = self.collections.get_mut(&collection) {
                        rows.remove(&key);
                    }
                }
                Undo::Replaced {
                    collection,
                    key,
                    previous,
                }
                | Undo::Removed {
                    collection,
                    key,
                    previous,
                } => {
                    self.collections
                        .entry(collection)
                        .or_default()
                        .insert(key, previous);
                }
            }
        }
    }
}
