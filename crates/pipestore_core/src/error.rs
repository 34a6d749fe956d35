//! Error types for pipestore.
//!
//! Engine adapters translate their native failures into [`StorageError`]
//! so pipeline code never depends on engine-specific error types.

use crate::types::SurrogateKey;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No row matched a point lookup or update.
    NotFound,
    /// Uniqueness, foreign-key or type mismatch at the engine.
    ConstraintViolation,
    /// The context was cancelled or its deadline elapsed.
    Cancelled,
    /// The engine could not allocate a session.
    ResourceExhausted,
    /// Possibly retryable engine failure (connection loss and similar).
    Transient,
    /// Unrecoverable engine failure.
    Fatal,
    /// The caller misused the API (bad statement, finished transaction).
    Invalid,
}

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No row with the given key.
    #[error("no rows in {collection} for key {key}")]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The key that was not found.
        key: SurrogateKey,
    },

    /// A row violated an engine-level constraint.
    #[error("constraint violation in {collection}: {message}")]
    ConstraintViolation {
        /// The collection the row belongs to.
        collection: String,
        /// Description of the violation.
        message: String,
    },

    /// The operation's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's context deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The engine could not allocate a session.
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// Description of the exhausted resource.
        message: String,
    },

    /// A possibly retryable engine failure.
    #[error("transient engine error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// An unrecoverable engine failure.
    #[error("fatal engine error: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },

    /// A row could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// I/O error while reading an ingestion stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A raw statement could not be parsed or bound.
    #[error("invalid statement: {message}")]
    InvalidStatement {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// An error an error classifier decided the caller may continue past.
    #[error("recoverable: {0}")]
    Recoverable(Box<StorageError>),
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(collection: impl Into<String>, key: SurrogateKey) -> Self {
        Self::NotFound {
            collection: collection.into(),
            key,
        }
    }

    /// Creates a constraint violation error.
    pub fn constraint_violation(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates a resource exhausted error.
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            message: message.into(),
        }
    }

    /// Creates a transient engine error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a fatal engine error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates an invalid statement error.
    pub fn invalid_statement(message: impl Into<String>) -> Self {
        Self::InvalidStatement {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Wraps this error as recoverable. Wrapping twice is a no-op.
    #[must_use]
    pub fn into_recoverable(self) -> Self {
        match self {
            Self::Recoverable(_) => self,
            other => Self::Recoverable(Box::new(other)),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ConstraintViolation { .. } | Self::Codec { .. } => {
                ErrorKind::ConstraintViolation
            }
            Self::Cancelled | Self::DeadlineExceeded => ErrorKind::Cancelled,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Transient { .. } | Self::Io(_) => ErrorKind::Transient,
            Self::Fatal { .. } => ErrorKind::Fatal,
            Self::InvalidStatement { .. } | Self::InvalidOperation { .. } => ErrorKind::Invalid,
            Self::Recoverable(inner) => inner.kind(),
        }
    }

    /// Returns `true` if no row matched.
    ///
    /// A recoverable wrapper is not a "no rows" condition; callers that
    /// soften errors have already decided how to proceed.
    #[must_use]
    pub fn is_no_rows(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the error is a cancellation or deadline failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Returns `true` if a classifier marked the error as recoverable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }
}
