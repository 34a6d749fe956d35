//! Transaction lifecycle state.

use crate::error::{StorageError, StorageResult};
use std::fmt;

/// State of a transaction.
///
/// `Closed` is not represented: closing consumes the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is open and can stage mutations.
    Open,
    /// Staged mutations were applied by `flush`.
    Committed,
    /// Staged mutations were discarded by `rollback`.
    RolledBack,
    /// A `flush` failed and applied nothing; only `rollback` and `close`
    /// remain valid.
    Failed,
}

impl TransactionState {
    /// Checks if the transaction is still open.
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Ensures the transaction can stage mutations or flush.
    pub fn ensure_open(self) -> StorageResult<()> {
        match self {
            Self::Open => Ok(()),
            Self::Committed => Err(StorageError::invalid_operation(
                "transaction already committed",
            )),
            Self::RolledBack => Err(StorageError::invalid_operation(
                "transaction already rolled back",
            )),
            Self::Failed => Err(StorageError::invalid_operation(
                "transaction failed to commit and must be rolled back",
            )),
        }
    }

    /// Ensures the transaction can be rolled back.
    pub fn ensure_can_roll_back(self) -> StorageResult<()> {
        match self {
            Self::Open | Self::Failed => Ok(()),
            Self::Committed => Err(StorageError::invalid_operation(
                "transaction already committed",
            )),
            Self::RolledBack => Err(StorageError::invalid_operation(
                "transaction already rolled back",
            )),
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_open_accepts_mutations() {
        assert!(TransactionState::Open.ensure_open().is_ok());
        for state in [
            TransactionState::Committed,
            TransactionState::RolledBack,
            TransactionState::Failed,
        ] {
            assert!(state.ensure_open().is_err(), "{state}");
        }
    }

    #[test]
    fn failed_can_roll_back() {
        assert!(TransactionState::Failed.ensure_can_roll_back().is_ok());
        assert!(TransactionState::Open.ensure_can_roll_back().is_ok());
        assert!(TransactionState::Committed.ensure_can_roll_back().is_err());
        assert!(TransactionState::RolledBack.ensure_can_roll_back().is_err());
    }
}
