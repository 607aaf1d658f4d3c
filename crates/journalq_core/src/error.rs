//! Error types for journal operations.

use crate::types::{RecordId, SegmentId, TransactionId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying file write, read or flush failure.
    #[error("storage error: {0}")]
    Storage(#[from] journalq_storage::StorageError),

    /// I/O error outside a sequential file (directory, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record failed checksum or framing validation.
    #[error("corrupt record in {segment} at offset {offset}: {message}")]
    CorruptRecord {
        /// Segment holding the record.
        segment: SegmentId,
        /// Offset of the record within the segment.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// An ADD would make a record id live twice.
    #[error("duplicate record id {id}")]
    DuplicateId {
        /// The conflicting record id.
        id: RecordId,
    },

    /// An UPDATE or DELETE referenced an id that is not visible.
    #[error("unknown record id {id}")]
    UnknownRecord {
        /// The referenced record id.
        id: RecordId,
    },

    /// A prepare, commit or rollback referenced an unknown transaction.
    #[error("unknown transaction {id}")]
    UnknownTransaction {
        /// The referenced transaction id.
        id: TransactionId,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Invalid segment header or file format.
    #[error("invalid journal format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Replay found records that cannot come from a valid history.
    #[error("inconsistent journal: {message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },

    /// An encoded record does not fit in an empty segment.
    #[error("record of {size} bytes exceeds segment capacity of {capacity} bytes")]
    RecordTooLarge {
        /// Encoded record size.
        size: usize,
        /// Usable segment capacity.
        capacity: u64,
    },

    /// The journal hit a storage failure and refuses further writes.
    #[error("journal failed after a storage error; restart required")]
    JournalFailed,

    /// Another process holds the journal directory.
    #[error("journal locked: another process has exclusive access")]
    JournalLocked,

    /// Configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(segment: SegmentId, offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            segment,
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an inconsistency error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns whether this error came from the storage layer.
    ///
    /// Storage errors put the journal into its failed state; every other
    /// error is a contract violation by the caller and leaves it usable.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_classified() {
        let storage = CoreError::from(journalq_storage::StorageError::Closed("f".into()));
        assert!(storage.is_storage());
        assert!(!CoreError::DuplicateId { id: RecordId::new(1) }.is_storage());
        assert!(!CoreError::JournalFailed.is_storage());
    }

    #[test]
    fn messages_name_the_ids() {
        let err = CoreError::corrupt_record(SegmentId::new(3), 42, "checksum mismatch");
        assert_eq!(
            err.to_string(),
            "corrupt record in seg:3 at offset 42: checksum mismatch"
        );
        let err = CoreError::UnknownTransaction {
            id: TransactionId::new(100),
        };
        assert_eq!(err.to_string(), "unknown transaction tx:100");
    }
}
