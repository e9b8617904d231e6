//! Error types for work unit operations.

use crate::transaction::{AccessType, CollectionKind};
use crate::types::{CollectionId, WorkUnitId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while driving a work unit.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The collection does not exist and creation was not allowed, or the
    /// participant does not belong to the unit.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name or ID of the collection.
        name: String,
    },

    /// The collection exists but has a different kind than asserted.
    #[error("collection {name} is of kind {actual}, expected {expected}")]
    TypeMismatch {
        /// Name of the collection.
        name: String,
        /// Kind the caller asserted.
        expected: CollectionKind,
        /// Kind the collection actually has.
        actual: CollectionKind,
    },

    /// The unit cannot take another write or write-capable collection.
    #[error("unit {unit} rejected the operation: {reason}")]
    TooManyOperations {
        /// The unit that rejected the request.
        unit: WorkUnitId,
        /// Which limit was hit.
        reason: String,
    },

    /// The document exceeds the configured size limit.
    #[error("document of {size} bytes exceeds the limit of {limit} bytes")]
    DocumentTooLarge {
        /// Encoded document size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A collection lock could not be acquired.
    #[error("failed to lock collection {collection} for {access}: {reason}")]
    LockFailed {
        /// The collection that could not be locked.
        collection: CollectionId,
        /// The requested access type.
        access: AccessType,
        /// Why the lock was not granted.
        reason: String,
    },

    /// The participant's access type does not permit the operation.
    #[error("access denied on collection {collection}: granted {granted}")]
    AccessDenied {
        /// The collection written to.
        collection: CollectionId,
        /// Access granted to the participant.
        granted: AccessType,
    },

    /// Commit failed; the unit has been rolled back.
    #[error("commit of {unit} failed: {reason}")]
    CommitFailed {
        /// The unit whose commit failed.
        unit: WorkUnitId,
        /// Description of the failure.
        reason: String,
    },

    /// Operation attempted in the wrong lifecycle state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Document encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The journal is corrupted or could not be written.
    #[error("journal error: {message}")]
    Journal {
        /// Description of the failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result codes surfaced to callers that need a flat status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Operation succeeded.
    Ok,
    /// Collection or participant not found.
    NotFound,
    /// Collection kind mismatch.
    TypeMismatch,
    /// Write limit of the unit exceeded.
    TooManyOperations,
    /// Lock acquisition failed.
    LockFailed,
    /// Access type does not permit the operation.
    AccessDenied,
    /// Commit failed and the unit was rolled back.
    CommitFailed,
    /// Wrong lifecycle state.
    InvalidState,
    /// Journal, codec or I/O failure outside of commit.
    Internal,
}

impl ErrorCode {
    /// Returns the code for an operation result.
    pub fn of<T>(result: &CoreResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(err) => err.code(),
        }
    }
}

impl CoreError {
    /// Creates a collection not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Creates a too many operations error.
    pub fn too_many_operations(unit: WorkUnitId, reason: impl Into<String>) -> Self {
        Self::TooManyOperations {
            unit,
            reason: reason.into(),
        }
    }

    /// Creates a commit failed error.
    pub fn commit_failed(unit: WorkUnitId, reason: impl Into<String>) -> Self {
        Self::CommitFailed {
            unit,
            reason: reason.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a journal error.
    pub fn journal(message: impl Into<String>) -> Self {
        Self::Journal {
            message: message.into(),
        }
    }

    /// Returns the flat result code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CollectionNotFound { .. } => ErrorCode::NotFound,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::TooManyOperations { .. } => ErrorCode::TooManyOperations,
            Self::LockFailed { .. } => ErrorCode::LockFailed,
            Self::AccessDenied { .. } => ErrorCode::AccessDenied,
            Self::CommitFailed { .. } => ErrorCode::CommitFailed,
            Self::InvalidState { .. } | Self::DocumentTooLarge { .. } => ErrorCode::InvalidState,
            Self::Codec { .. } | Self::Journal { .. } | Self::Io(_) => ErrorCode::Internal,
        }
    }

    /// Whether retrying the same operation on the same unit can succeed.
    ///
    /// Only lock contention is retryable; a failed commit requires a new unit.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_variants() {
        assert_eq!(CoreError::not_found("x").code(), ErrorCode::NotFound);
        assert_eq!(
            CoreError::invalid_state("done").code(),
            ErrorCode::InvalidState
        );
        assert_eq!(
            CoreError::journal("torn").code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn code_of_result() {
        let ok: CoreResult<()> = Ok(());
        assert_eq!(ErrorCode::of(&ok), ErrorCode::Ok);

        let err: CoreResult<()> = Err(CoreError::commit_failed(WorkUnitId::new(3), "disk"));
        assert_eq!(ErrorCode::of(&err), ErrorCode::CommitFailed);
    }

    #[test]
    fn only_lock_errors_are_retryable() {
        let lock = CoreError::LockFailed {
            collection: CollectionId::new(1),
            access: AccessType::Write,
            reason: "held".into(),
        };
        assert!(lock.is_retryable());
        assert!(!CoreError::commit_failed(WorkUnitId::new(1), "x").is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = CoreError::AccessDenied {
            collection: CollectionId::new(7),
            granted: AccessType::Read,
        };
        assert_eq!(err.to_string(), "access denied on collection col:7: granted read");
    }
}
