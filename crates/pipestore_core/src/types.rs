//! Core type definitions for pipestore.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-assigned identifier of a persisted row.
///
/// Keys are assigned in non-decreasing order within a collection and are
/// never reused. The value `0` is reserved to mean "not yet assigned".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SurrogateKey(pub u64);

impl SurrogateKey {
    /// The placeholder carried by models that were never persisted.
    pub const UNASSIGNED: Self = Self(0);

    /// The largest representable key.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a key from its raw value.
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if the key was assigned by an engine.
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }

    /// Returns the key following this one, saturating at [`Self::MAX`].
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SurrogateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SurrogateKey {
    fn from(key: u64) -> Self {
        Self(key)
    }
}

impl From<SurrogateKey> for u64 {
    fn from(key: SurrogateKey) -> Self {
        key.0
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_key() {
        assert!(!SurrogateKey::UNASSIGNED.is_assigned());
        assert!(SurrogateKey::new(1).is_assigned());
        assert_eq!(SurrogateKey::default(), SurrogateKey::UNASSIGNED);
    }

    #[test]
    fn next_saturates() {
        assert_eq!(SurrogateKey::new(5).next(), SurrogateKey::new(6));
        assert_eq!(SurrogateKey::MAX.next(), SurrogateKey::MAX);
    }

    #[test]
    fn key_serializes_as_plain_integer() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&SurrogateKey::new(7), &mut bytes).unwrap();
        let raw: u64 = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(raw, 7);
    }

    #[test]
    fn transaction_id_display() {
        let t = TransactionId::new(42);
        assert_eq!(format!("{t}"), "txn:42");
        assert!(TransactionId::new(1) < TransactionId::new(2));
    }
}
