//! Core type definitions for the journal.

use serde::Serialize;
use std::fmt;

/// Caller-assigned identifier of a journal record.
///
/// The journal never invents record ids; see [`crate::IdGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Creates a new record ID.
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

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

/// Identifier for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
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
        write!(f, "tx:{}", self.0)
    }
}

/// Sequence number of a segment file.
///
/// Segment IDs increase monotonically in creation order and are never
/// reused; a pooled file gets a fresh ID when it is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next segment ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// A live record as reconstructed by replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// Record id.
    pub id: RecordId,
    /// Application-defined sub-kind given at ADD time.
    pub user_record_type: u8,
    /// Current body (the last UPDATE's, or the ADD's).
    pub body: Vec<u8>,
}

/// An operation withheld inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    /// Add a record.
    Add {
        /// Record id.
        id: RecordId,
        /// Application-defined sub-kind.
        user_record_type: u8,
        /// Record body.
        body: Vec<u8>,
    },
    /// Replace a record's body.
    Update {
        /// Record id.
        id: RecordId,
        /// New body.
        body: Vec<u8>,
    },
    /// Delete a record.
    Delete {
        /// Record id.
        id: RecordId,
    },
}

impl PendingOperation {
    /// Returns the record id the operation targets.
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        match self {
            Self::Add { id, .. } | Self::Update { id, .. } | Self::Delete { id } => *id,
        }
    }
}

/// A transaction that was prepared but not resolved when the journal was
/// loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTransaction {
    /// Transaction id.
    pub id: TransactionId,
    /// Opaque data given to prepare (typically an XA branch id).
    pub data: Vec<u8>,
    /// Operations in the order they were appended.
    pub operations: Vec<PendingOperation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(RecordId::new(7).to_string(), "rec:7");
        assert_eq!(TransactionId::new(100).to_string(), "tx:100");
        assert_eq!(SegmentId::new(3).to_string(), "seg:3");
    }

    #[test]
    fn segment_id_next() {
        let s = SegmentId::new(5);
        assert_eq!(s.next().as_u64(), 6);
        assert!(s < s.next());
    }

    #[test]
    fn pending_operation_targets() {
        let op = PendingOperation::Update {
            id: RecordId::new(9),
            body: vec![1],
        };
        assert_eq!(op.record_id(), RecordId::new(9));
        assert_eq!(
            PendingOperation::Delete { id: RecordId::new(2) }.record_id(),
            RecordId::new(2)
        );
    }
}
