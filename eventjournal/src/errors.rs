//! Error types for the journal.
//!
//! Two layers:
//!
//! - [`BackendError`]: what a [`StreamBackend`](crate::StreamBackend) reports.
//! - [`JournalError`]: what callers of the load-decide-append cycle and the
//!   command handler see. It unifies backend failures with the domain failure of
//!   the decision function so a single exhaustive `match` covers every outcome.
//!
//! Every failure is terminal for the invocation that produced it. Nothing in
//! this crate retries on its own; see [`retry_on_conflict`](crate::retry_on_conflict)
//! for the caller-side helper.

use crate::types::{StreamName, StreamVersion};
use thiserror::Error;

/// Identifies the backend operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Loading the history of a stream.
    Load,
    /// Appending a batch to a stream.
    Append,
    /// Beginning a database transaction.
    BeginTransaction,
    /// Acquiring the per-stream append lock.
    LockStream,
    /// Committing a database transaction.
    CommitTransaction,
    /// Applying the storage schema.
    Migrate,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Append => write!(f, "append"),
            Self::BeginTransaction => write!(f, "begin_transaction"),
            Self::LockStream => write!(f, "lock_stream"),
            Self::CommitTransaction => write!(f, "commit_transaction"),
            Self::Migrate => write!(f, "migrate"),
        }
    }
}

/// Failures reported by a stream backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The stream has never been written to.
    #[error("stream '{0}' not found")]
    StreamNotFound(StreamName),

    /// The stream's current version no longer matches the version the pending
    /// write was computed from. Nothing was written.
    #[error("version conflict on stream '{stream}': expected {expected}, but current is {actual}")]
    VersionConflict {
        /// The stream with the conflict.
        stream: StreamName,
        /// The version the write was computed from.
        expected: StreamVersion,
        /// The version the backend holds.
        actual: StreamVersion,
    },

    /// An event could not be encoded for storage.
    #[error("failed to serialize event for stream '{stream}': {detail}")]
    SerializationFailed {
        /// The stream being written.
        stream: StreamName,
        /// What went wrong.
        detail: String,
    },

    /// A stored event could not be decoded into the requested type.
    #[error("failed to deserialize event for stream '{stream}': {detail}")]
    DeserializationFailed {
        /// The stream being read.
        stream: StreamName,
        /// What went wrong.
        detail: String,
    },

    /// Infrastructure failure (connection loss, timeout, poisoned lock).
    #[error("{operation} operation failed: {detail}")]
    StoreFailure {
        /// The operation that failed.
        operation: Operation,
        /// What went wrong.
        detail: String,
    },
}

impl BackendError {
    /// Whether this is a [`BackendError::VersionConflict`].
    pub const fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Every way a load-decide-append cycle or a command can fail.
///
/// `F` is the domain failure type of the decision function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalError<F> {
    /// A stream that must exist does not.
    #[error("stream '{0}' not found")]
    StreamNotFound(StreamName),

    /// Optimistic concurrency check failed at write time. Reloading and
    /// deciding again may succeed.
    #[error("version conflict on stream '{stream}': expected {expected}, but current is {actual}")]
    VersionConflict {
        /// The stream with the conflict.
        stream: StreamName,
        /// The version the write was computed from.
        expected: StreamVersion,
        /// The version the backend holds.
        actual: StreamVersion,
    },

    /// The decision function rejected the command. Nothing was written.
    #[error("execution failed: {0}")]
    ExecutionFailure(F),

    /// The backend failed for a reason other than the two above.
    #[error("backend failure: {0}")]
    Backend(BackendError),
}

impl<F> JournalError<F> {
    /// Whether this is a [`JournalError::VersionConflict`].
    pub const fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// The domain failure, if the decision function produced one.
    pub fn into_execution_failure(self) -> Option<F> {
        match self {
            Self::ExecutionFailure(failure) => Some(failure),
            Self::StreamNotFound(_) | Self::VersionConflict { .. } | Self::Backend(_) => None,
        }
    }
}

impl<F> From<BackendError> for JournalError<F> {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::StreamNotFound(stream) => Self::StreamNotFound(stream),
            BackendError::VersionConflict {
                stream,
                expected,
                actual,
            } => Self::VersionConflict {
                stream,
                expected,
                actual,
            },
            other @ (BackendError::SerializationFailed { .. }
            | BackendError::DeserializationFailed { .. }
            | BackendError::StoreFailure { .. }) => Self::Backend(other),
        }
    }
}
