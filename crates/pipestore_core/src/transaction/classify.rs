//! Error classification strategies for `Transaction::handle_error`.

use crate::error::{ErrorKind, StorageError};

/// Decides whether a mid-transaction failure may be continued past.
///
/// Returning the error unchanged tells the caller to roll back. Returning
/// it wrapped with [`StorageError::into_recoverable`] tells the caller the
/// transaction is still usable.
pub trait ErrorClassifier: Send + Sync {
    /// Classifies `err`.
    fn classify(&self, err: StorageError) -> StorageError;
}

impl<F> ErrorClassifier for F
where
    F: Fn(StorageError) -> StorageError + Send + Sync,
{
    fn classify(&self, err: StorageError) -> StorageError {
        self(err)
    }
}

/// Treats every failure as fatal for the transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictClassifier;

impl ErrorClassifier for StrictClassifier {
    fn classify(&self, err: StorageError) -> StorageError {
        err
    }
}

/// Softens transient engine failures; everything else is returned as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientClassifier;

impl ErrorClassifier for TransientClassifier {
    fn classify(&self, err: StorageError) -> StorageError {
        if err.kind() == ErrorKind::Transient {
            err.into_recoverable()
        } else {
            err
        }
    }
}
