//! A single segment and its reclamation bookkeeping.

use crate::types::SegmentId;
use journalq_storage::SequentialFile;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Location of a record in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordPosition {
    /// Segment holding the record.
    pub segment: SegmentId,
    /// Byte offset of the record within the segment.
    pub offset: u64,
}

/// Lifecycle state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Current write target.
    Active,
    /// Closed for writes; holds live records or is still referenced.
    Full,
    /// Eligible for reclamation but its intent lock was busy.
    CandidateForReclaim,
    /// Returned to the free pool or deleted.
    Reclaimed,
}

/// Snapshot of one segment's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentStats {
    /// Segment id.
    pub id: SegmentId,
    /// File name.
    pub file_name: String,
    /// Lifecycle state.
    pub state: SegmentState,
    /// Bytes written, header included.
    pub size: u64,
    /// Records still needed by replay.
    pub live: u64,
    /// Records ever written.
    pub total: u64,
    /// Older segments this one must outlive.
    pub references: Vec<SegmentId>,
}

/// A data segment owned by the file manager.
///
/// `live` counts records in this segment that replay still needs: ADD and
/// UPDATE records of live ids, plus every record of a transaction that has
/// not terminated. `references` counts, per older segment, the records here
/// (deletes and transaction terminators) whose meaning depends on that
/// segment still being replayed first.
#[derive(Debug)]
pub(crate) struct JournalSegment {
    id: SegmentId,
    file: Arc<dyn SequentialFile>,
    state: SegmentState,
    write_offset: u64,
    live: u64,
    total: u64,
    references: BTreeMap<SegmentId, u64>,
    intent: Arc<RwLock<()>>,
}

impl JournalSegment {
    pub(crate) fn new(id: SegmentId, file: Arc<dyn SequentialFile>, write_offset: u64) -> Self {
        Self {
            id,
            file,
            state: SegmentState::Full,
            write_offset,
            live: 0,
            total: 0,
            references: BTreeMap::new(),
            intent: Arc::new(RwLock::new(())),
        }
    }

    pub(crate) fn id(&self) -> SegmentId {
        self.id
    }

    pub(crate) fn file(&self) -> &Arc<dyn SequentialFile> {
        &self.file
    }

    pub(crate) fn set_state(&mut self, state: SegmentState) {
        self.state = state;
    }

    pub(crate) fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub(crate) fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    pub(crate) fn live(&self) -> u64 {
        self.live
    }

    pub(crate) fn count_record(&mut self, counts_live: bool) {
        self.total += 1;
        if counts_live {
            self.live += 1;
        }
    }

    pub(crate) fn decrement_live(&mut self) {
        self.live = self.live.saturating_sub(1);
    }

    pub(crate) fn add_reference(&mut self, older: SegmentId) {
        *self.references.entry(older).or_insert(0) += 1;
    }

    pub(crate) fn references(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.references.keys().copied()
    }

    /// Shared side is held by readers; reclamation takes the exclusive side.
    pub(crate) fn intent_lock(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.intent)
    }

    pub(crate) fn stats(&self) -> SegmentStats {
        SegmentStats {
            id: self.id,
            file_name: self.file.name(),
            state: self.state,
            size: self.write_offset,
            live: self.live,
            total: self.total,
            references: self.references.keys().copied().collect(),
        }
    }
}
