//! Journal record types and binary codec.
//!
//! ## Record Format
//!
//! ```text
//! | type (1) | id (8) | body_len (4) | body (N) | user_type (1, ADD only) | txid (8, tx only) | crc32 (4) |
//! ```
//!
//! All integers are little-endian and always present for the record types
//! that carry them, zero or not. The CRC-32 covers every preceding byte of
//! the record.
//!
//! For PREPARE, COMMIT and ROLLBACK the `id` field holds the number of
//! operations the transaction had appended when the record was written, and
//! the body holds the prepare data (empty for COMMIT and ROLLBACK).

use crate::types::{PendingOperation, RecordId, TransactionId};
use thiserror::Error;

/// Size of the fixed prefix: type (1) + id (8) + body length (4).
pub const RECORD_PREFIX_SIZE: usize = 13;

/// Size of the trailing checksum.
pub const CHECKSUM_SIZE: usize = 4;

const USER_TYPE_SIZE: usize = 1;
const TXID_SIZE: usize = 8;

/// Type tag of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Add a record outside a transaction.
    Add = 1,
    /// Update a record outside a transaction.
    Update = 2,
    /// Delete a record outside a transaction.
    Delete = 3,
    /// Add a record inside a transaction.
    AddTx = 11,
    /// Update a record inside a transaction.
    UpdateTx = 12,
    /// Delete a record inside a transaction.
    DeleteTx = 13,
    /// Prepare a transaction.
    Prepare = 21,
    /// Commit a transaction.
    Commit = 22,
    /// Roll back a transaction.
    Rollback = 23,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Add),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            11 => Some(Self::AddTx),
            12 => Some(Self::UpdateTx),
            13 => Some(Self::DeleteTx),
            21 => Some(Self::Prepare),
            22 => Some(Self::Commit),
            23 => Some(Self::Rollback),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether records of this type carry a transaction id.
    #[must_use]
    pub const fn has_txid(self) -> bool {
        !matches!(self, Self::Add | Self::Update | Self::Delete)
    }

    /// Whether records of this type carry a user record type.
    #[must_use]
    pub const fn has_user_type(self) -> bool {
        matches!(self, Self::Add | Self::AddTx)
    }

    /// Total encoded size of a record of this type with a body of
    /// `body_len` bytes.
    #[must_use]
    pub const fn encoded_size(self, body_len: usize) -> usize {
        let mut size = RECORD_PREFIX_SIZE + body_len + CHECKSUM_SIZE;
        if self.has_user_type() {
            size += USER_TYPE_SIZE;
        }
        if self.has_txid() {
            size += TXID_SIZE;
        }
        size
    }
}

/// Reasons a byte sequence is not a valid record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Fewer bytes are available than the record needs.
    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the record needs.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The type byte is not a known record type.
    #[error("unknown record type {0}")]
    UnknownType(u8),

    /// The stored checksum does not match the contents.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },
}

/// A record in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Add a record.
    Add {
        /// Record id.
        id: RecordId,
        /// Application-defined sub-kind.
        user_record_type: u8,
        /// Record body.
        body: Vec<u8>,
        /// Owning transaction, if any.
        txid: Option<TransactionId>,
    },

    /// Replace a record's body.
    Update {
        /// Record id.
        id: RecordId,
        /// New body.
        body: Vec<u8>,
        /// Owning transaction, if any.
        txid: Option<TransactionId>,
    },

    /// Delete a record.
    Delete {
        /// Record id.
        id: RecordId,
        /// Owning transaction, if any.
        txid: Option<TransactionId>,
    },

    /// Prepare a transaction (first phase of two-phase commit).
    Prepare {
        /// Transaction id.
        txid: TransactionId,
        /// Operations appended by the transaction so far.
        operation_count: u64,
        /// Opaque prepare data.
        data: Vec<u8>,
    },

    /// Commit a transaction.
    Commit {
        /// Transaction id.
        txid: TransactionId,
        /// Operations appended by the transaction.
        operation_count: u64,
    },

    /// Roll back a transaction.
    Rollback {
        /// Transaction id.
        txid: TransactionId,
        /// Operations appended by the transaction.
        operation_count: u64,
    },
}

impl JournalRecord {
    /// Builds the record for a transactional pending operation.
    #[must_use]
    pub fn from_operation(op: &PendingOperation, txid: TransactionId) -> Self {
        match op {
            PendingOperation::Add {
                id,
                user_record_type,
                body,
            } => Self::Add {
                id: *id,
                user_record_type: *user_record_type,
                body: body.clone(),
                txid: Some(txid),
            },
            PendingOperation::Update { id, body } => Self::Update {
                id: *id,
                body: body.clone(),
                txid: Some(txid),
            },
            PendingOperation::Delete { id } => Self::Delete {
                id: *id,
                txid: Some(txid),
            },
        }
    }

    /// Returns the pending operation a data record describes, or `None` for
    /// transaction control records.
    #[must_use]
    pub fn to_operation(&self) -> Option<PendingOperation> {
        match self {
            Self::Add {
                id,
                user_record_type,
                body,
                ..
            } => Some(PendingOperation::Add {
                id: *id,
                user_record_type: *user_record_type,
                body: body.clone(),
            }),
            Self::Update { id, body, .. } => Some(PendingOperation::Update {
                id: *id,
                body: body.clone(),
            }),
            Self::Delete { id, .. } => Some(PendingOperation::Delete { id: *id }),
            Self::Prepare { .. } | Self::Commit { .. } | Self::Rollback { .. } => None,
        }
    }

    /// Returns the wire type of this record.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Add { txid: None, .. } => RecordType::Add,
            Self::Add { txid: Some(_), .. } => RecordType::AddTx,
            Self::Update { txid: None, .. } => RecordType::Update,
            Self::Update { txid: Some(_), .. } => RecordType::UpdateTx,
            Self::Delete { txid: None, .. } => RecordType::Delete,
            Self::Delete { txid: Some(_), .. } => RecordType::DeleteTx,
            Self::Prepare { .. } => RecordType::Prepare,
            Self::Commit { .. } => RecordType::Commit,
            Self::Rollback { .. } => RecordType::Rollback,
        }
    }

    /// Returns the transaction this record belongs to.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Add { txid, .. } | Self::Update { txid, .. } | Self::Delete { txid, .. } => {
                *txid
            }
            Self::Prepare { txid, .. } | Self::Commit { txid, .. } | Self::Rollback { txid, .. } => {
                Some(*txid)
            }
        }
    }

    /// Returns the record id for data records.
    #[must_use]
    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            Self::Add { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => Some(*id),
            Self::Prepare { .. } | Self::Commit { .. } | Self::Rollback { .. } => None,
        }
    }

    fn id_field(&self) -> u64 {
        match self {
            Self::Add { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => {
                id.as_u64()
            }
            Self::Prepare {
                operation_count, ..
            }
            | Self::Commit {
                operation_count, ..
            }
            | Self::Rollback {
                operation_count, ..
            } => *operation_count,
        }
    }

    fn body(&self) -> &[u8] {
        match self {
            Self::Add { body, .. } | Self::Update { body, .. } => body,
            Self::Prepare { data, .. } => data,
            Self::Delete { .. } | Self::Commit { .. } | Self::Rollback { .. } => &[],
        }
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.record_type().encoded_size(self.body().len())
    }

    /// Encodes the record to bytes.
    ///
    /// The body must fit in a `u32` length; the journal rejects larger
    /// records against the segment capacity before encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let record_type = self.record_type();
        let body = self.body();
        debug_assert!(u32::try_from(body.len()).is_ok());
        let body_len = body.len() as u32;

        let mut buf = Vec::with_capacity(record_type.encoded_size(body.len()));
        buf.push(record_type.as_byte());
        buf.extend_from_slice(&self.id_field().to_le_bytes());
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(body);

        if let Self::Add {
            user_record_type, ..
        } = self
        {
            buf.push(*user_record_type);
        }
        if record_type.has_txid() {
            let txid = self.txid().map_or(0, TransactionId::as_u64);
            buf.extend_from_slice(&txid.to_le_bytes());
        }

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Reads the type and total length of the record starting at `data`.
    ///
    /// Needs only the fixed prefix, so callers can learn how many bytes to
    /// fetch before decoding.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if fewer than [`RECORD_PREFIX_SIZE`] bytes are
    /// available, or `UnknownType` for an unrecognized type byte.
    pub fn peek_len(data: &[u8]) -> Result<(RecordType, usize), RecordError> {
        if data.len() < RECORD_PREFIX_SIZE {
            return Err(RecordError::Truncated {
                needed: RECORD_PREFIX_SIZE,
                available: data.len(),
            });
        }
        let record_type =
            RecordType::from_byte(data[0]).ok_or(RecordError::UnknownType(data[0]))?;
        let body_len = read_u32(data, 9) as usize;
        Ok((record_type, record_type.encoded_size(body_len)))
    }

    /// Decodes one record from the start of `data`.
    ///
    /// Returns the record and its encoded length. The checksum is verified
    /// before any field is interpreted.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` when `data` ends before the record does,
    /// `UnknownType` for an unrecognized type byte, and `ChecksumMismatch`
    /// when the stored CRC does not match.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), RecordError> {
        let (record_type, total_len) = Self::peek_len(data)?;
        if data.len() < total_len {
            return Err(RecordError::Truncated {
                needed: total_len,
                available: data.len(),
            });
        }

        let crc_start = total_len - CHECKSUM_SIZE;
        let expected = read_u32(data, crc_start);
        let actual = compute_crc32(&data[..crc_start]);
        if expected != actual {
            return Err(RecordError::ChecksumMismatch { expected, actual });
        }

        let id_field = read_u64(data, 1);
        let body_len = read_u32(data, 9) as usize;
        let body = data[RECORD_PREFIX_SIZE..RECORD_PREFIX_SIZE + body_len].to_vec();
        let mut cursor = RECORD_PREFIX_SIZE + body_len;

        let user_record_type = if record_type.has_user_type() {
            cursor += USER_TYPE_SIZE;
            data[cursor - 1]
        } else {
            0
        };
        // Zero for non-transactional types, which never read it.
        let tx = if record_type.has_txid() {
            TransactionId::new(read_u64(data, cursor))
        } else {
            TransactionId::new(0)
        };
        let txid = record_type.has_txid().then_some(tx);

        let id = RecordId::new(id_field);
        let record = match record_type {
            RecordType::Add | RecordType::AddTx => Self::Add {
                id,
                user_record_type,
                body,
                txid,
            },
            RecordType::Update | RecordType::UpdateTx => Self::Update { id, body, txid },
            RecordType::Delete | RecordType::DeleteTx => Self::Delete { id, txid },
            RecordType::Prepare => Self::Prepare {
                txid: tx,
                operation_count: id_field,
                data: body,
            },
            RecordType::Commit => Self::Commit {
                txid: tx,
                operation_count: id_field,
            },
            RecordType::Rollback => Self::Rollback {
                txid: tx,
                operation_count: id_field,
            },
        };

        Ok((record, total_len))
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Computes the CRC-32 (IEEE) checksum used by records and segment headers.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
