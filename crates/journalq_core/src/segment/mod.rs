//! Segment files of the journal.
//!
//! A segment is one fixed-capacity file: a header followed by a packed run
//! of records. Segments are only ever appended to; whole segments are
//! reclaimed once replay no longer needs any record in them.
//!
//! ## File Layout
//!
//! ```text
//! <dir>/
//! ├─ LOCK
//! ├─ journal-00000000000000000001.jrn   # header-only: pooled for reuse
//! ├─ journal-00000000000000000004.jrn   # data segment
//! └─ journal-00000000000000000007.jrn   # active data segment
//! ```

mod file;
mod header;
mod iterator;
mod manager;

pub use file::{RecordPosition, SegmentState, SegmentStats};
pub use header::{
    parse_segment_file_name, segment_file_name, SegmentHeader, SEGMENT_HEADER_SIZE,
    SEGMENT_MAGIC, SEGMENT_VERSION,
};
pub use iterator::SegmentRecordIterator;
pub use manager::JournalFileManager;
pub(crate) use manager::PinnedSegment;
