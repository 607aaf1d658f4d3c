//! # journalq core
//!
//! Segmented, transactional, crash-recoverable journal for a message broker.
//!
//! This crate provides:
//! - A checksummed binary record codec
//! - Fixed-capacity segment files with rollover, pooling and reclamation
//! - Prepare/commit/rollback transactions withheld until commit
//! - Replay on startup that rebuilds the live records and in-doubt
//!   transactions, tolerating a torn tail in the newest segment
//! - Group commit so concurrent sync writers share flushes
//!
//! ## Example
//!
//! ```rust
//! use journalq_core::{IdGenerator, Journal, JournalConfig, TransactionId};
//! use journalq_storage::InMemoryFactory;
//! use std::sync::Arc;
//!
//! let factory = Arc::new(InMemoryFactory::new());
//! let journal = Journal::new(JournalConfig::default(), factory, Arc::new(IdGenerator::default()));
//! journal.start().unwrap();
//! journal.load().unwrap();
//!
//! let ids = journal.id_generator();
//! let (a, b) = (ids.next_id(), ids.next_id());
//! journal.append_add(a, 1, b"message", None).unwrap();
//!
//! let tx = TransactionId::new(100);
//! journal.append_add_transactional(tx, b, 1, b"pending").unwrap();
//! journal.prepare(tx, b"xid", None).unwrap();
//! journal.commit(tx, None).unwrap();
//!
//! assert_eq!(journal.stats().live_records, 2);
//! journal.stop().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod group_commit;
mod id;
mod index;
mod journal;
mod loader;
mod record;
mod segment;
mod transaction;
mod types;

pub use config::{JournalConfig, MIN_SEGMENT_SIZE};
pub use dir::JournalDir;
pub use error::{CoreError, CoreResult};
pub use id::IdGenerator;
pub use index::RecordIndex;
pub use journal::{Journal, JournalState, JournalStats};
pub use loader::LoadResult;
pub use record::{compute_crc32, JournalRecord, RecordError, RecordType};
pub use segment::{
    parse_segment_file_name, segment_file_name, JournalFileManager, RecordPosition,
    SegmentHeader, SegmentRecordIterator, SegmentState, SegmentStats, SEGMENT_HEADER_SIZE,
    SEGMENT_MAGIC, SEGMENT_VERSION,
};
pub use transaction::{
    Completion, JournalTransaction, TransactionOutcome, TransactionState, TransactionTracker,
};
pub use types::{PendingOperation, PreparedTransaction, RecordId, RecordInfo, SegmentId, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
