//! Journal file manager: segment allocation, rollover and reclamation.

use crate::config::JournalConfig;
use crate::error::{CoreError, CoreResult};
use crate::segment::file::{JournalSegment, RecordPosition, SegmentState, SegmentStats};
use crate::segment::header::{
    parse_segment_file_name, segment_file_name, SegmentHeader, SEGMENT_HEADER_SIZE,
};
use crate::types::SegmentId;
use journalq_storage::{SequentialFile, SequentialFileFactory};
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::RawRwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a physical append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AppendOutcome {
    /// Where the record landed.
    pub position: RecordPosition,
    /// Whether the previous active segment was synced and closed for writes
    /// to make room.
    pub rolled_over: bool,
}

/// A segment pinned for reading.
///
/// Holding the read guard keeps the segment from being reclaimed until the
/// reader drops it.
pub(crate) struct PinnedSegment {
    pub id: SegmentId,
    pub file: Arc<dyn SequentialFile>,
    _guard: ArcRwLockReadGuard<RawRwLock, ()>,
}

/// Owns the ordered set of segment files.
///
/// The manager maps appends onto the active segment, rolls to a new segment
/// (reusing a pooled file when one is available) when a record does not fit,
/// and reclaims whole segments once replay no longer needs them.
///
/// Segment files are header-only when pooled; a file with at least one record
/// after its header is a data segment.
#[derive(Debug)]
pub struct JournalFileManager {
    config: JournalConfig,
    factory: Arc<dyn SequentialFileFactory>,
    segments: BTreeMap<SegmentId, JournalSegment>,
    active: Option<SegmentId>,
    free: VecDeque<Arc<dyn SequentialFile>>,
    next_id: SegmentId,
}

impl JournalFileManager {
    /// Creates a manager; nothing is touched until [`JournalFileManager::open`].
    #[must_use]
    pub fn new(config: JournalConfig, factory: Arc<dyn SequentialFileFactory>) -> Self {
        Self {
            config,
            factory,
            segments: BTreeMap::new(),
            active: None,
            free: VecDeque::new(),
            next_id: SegmentId::new(1),
        }
    }

    /// Opens every existing segment file and tops up the free pool.
    ///
    /// Header-only files join the free pool. A file whose header was torn
    /// during creation is reinitialized as a free file. Every other file
    /// becomes a `Full` data segment awaiting replay.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a bad header on a data segment and any
    /// storage error.
    pub fn open(&mut self) -> CoreResult<()> {
        let prefix = self.config.file_prefix.clone();
        let extension = self.config.file_extension.clone();
        let mut max_id = SegmentId::new(0);

        for name in self.factory.list_files(&prefix, &extension)? {
            let Some(name_id) = parse_segment_file_name(&name, &prefix, &extension) else {
                warn!(file = %name, "skipping file with unrecognized segment name");
                continue;
            };
            max_id = max_id.max(name_id);

            let file = self.factory.create_file(&name)?;
            file.open()?;
            let size = file.size()?;

            if size < SEGMENT_HEADER_SIZE {
                warn!(file = %name, size, "reinitializing segment with torn header");
                file.truncate(0)?;
                file.write(&SegmentHeader::new(name_id).encode(), true)?;
                self.free.push_back(file);
                continue;
            }

            let header_bytes = file.read_at(0, SEGMENT_HEADER_SIZE as usize)?;
            let header = SegmentHeader::decode(&header_bytes).map_err(|e| {
                CoreError::invalid_format(format!("{name}: {e}"))
            })?;
            max_id = max_id.max(header.segment_id);

            if size == SEGMENT_HEADER_SIZE {
                self.free.push_back(file);
                continue;
            }
            if header.segment_id != name_id {
                return Err(CoreError::invalid_format(format!(
                    "{name}: header names {} but file name names {name_id}",
                    header.segment_id
                )));
            }

            self.segments
                .insert(name_id, JournalSegment::new(name_id, file, size));
        }

        self.next_id = max_id.next();
        self.fill_free_pool()?;

        debug!(
            data_segments = self.segments.len(),
            free_segments = self.free.len(),
            next_segment = %self.next_id,
            "opened journal files"
        );
        Ok(())
    }

    /// Data segments in creation order.
    pub(crate) fn data_segments(&self) -> Vec<(SegmentId, Arc<dyn SequentialFile>)> {
        self.segments
            .values()
            .map(|s| (s.id(), Arc::clone(s.file())))
            .collect()
    }

    /// Cuts a segment back to `offset`, discarding a torn tail.
    pub(crate) fn truncate_segment(&mut self, id: SegmentId, offset: u64) -> CoreResult<()> {
        let segment = self.segment_mut(id)?;
        segment.file().truncate(offset)?;
        segment.set_write_offset(offset);
        Ok(())
    }

    /// Makes the newest data segment the write target after replay.
    pub(crate) fn activate_newest(&mut self) {
        if let Some((&id, segment)) = self.segments.iter_mut().next_back() {
            segment.set_state(SegmentState::Active);
            self.active = Some(id);
        }
    }

    /// Usable bytes in an empty segment.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.config.segment_size - SEGMENT_HEADER_SIZE
    }

    /// Checks that a record of `size` bytes fits in an empty segment.
    pub(crate) fn check_fits(&self, size: usize) -> CoreResult<()> {
        if size as u64 > self.capacity() {
            return Err(CoreError::RecordTooLarge {
                size,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Writes an encoded record to the active segment, rolling over first
    /// if it does not fit.
    ///
    /// The write is not synced; durability is the caller's concern.
    pub(crate) fn append(&mut self, bytes: &[u8], counts_live: bool) -> CoreResult<AppendOutcome> {
        self.check_fits(bytes.len())?;
        let len = bytes.len() as u64;

        let needs_roll = match self.active.and_then(|id| self.segments.get(&id)) {
            Some(segment) => segment.write_offset() + len > self.config.segment_size,
            None => true,
        };
        let rolled_over = if needs_roll {
            let had_active = self.active.is_some();
            self.roll()?;
            had_active
        } else {
            false
        };

        let id = self
            .active
            .ok_or_else(|| CoreError::invalid_operation("no active segment"))?;
        let segment = self.segment_mut(id)?;
        let offset = segment.file().write(bytes, false)?;
        segment.set_write_offset(offset + len);
        segment.count_record(counts_live);

        Ok(AppendOutcome {
            position: RecordPosition {
                segment: id,
                offset,
            },
            rolled_over,
        })
    }

    /// Counts a record found by replay.
    pub(crate) fn count_replayed(&mut self, segment: SegmentId, counts_live: bool) -> CoreResult<()> {
        self.segment_mut(segment)?.count_record(counts_live);
        Ok(())
    }

    /// Marks one record in `segment` as no longer needed by replay.
    pub(crate) fn decrement_live(&mut self, segment: SegmentId) {
        if let Some(segment) = self.segments.get_mut(&segment) {
            segment.decrement_live();
        }
    }

    /// Records that `from` must not be reclaimed before `older`.
    pub(crate) fn add_reference(&mut self, from: SegmentId, older: SegmentId) {
        if from == older {
            return;
        }
        if let Some(segment) = self.segments.get_mut(&from) {
            segment.add_reference(older);
        }
    }

    /// Reclaims every segment replay no longer needs.
    ///
    /// Runs oldest-first so reclaiming a segment can unblock a newer one
    /// that referenced it within the same pass. A segment being read stays
    /// `CandidateForReclaim` and is retried on the next pass.
    ///
    /// The records that released a segment may still be buffered in the
    /// active segment, so the active segment is synced before the first
    /// segment is released. Every other segment was synced at rollover.
    /// A non-empty result therefore means everything written so far is
    /// durable.
    ///
    /// Returns the ids reclaimed.
    pub(crate) fn reclaim(&mut self) -> CoreResult<Vec<SegmentId>> {
        let mut reclaimed = Vec::new();
        let mut synced = false;
        let ids: Vec<SegmentId> = self.segments.keys().copied().collect();

        for id in ids {
            if Some(id) == self.active {
                continue;
            }
            let Some(segment) = self.segments.get(&id) else {
                continue;
            };
            if segment.live() > 0 || segment.references().any(|r| self.segments.contains_key(&r)) {
                continue;
            }

            let intent = segment.intent_lock();
            let Some(_guard) = intent.try_write() else {
                debug!(segment = %id, "segment busy, deferring reclamation");
                if let Some(segment) = self.segments.get_mut(&id) {
                    segment.set_state(SegmentState::CandidateForReclaim);
                }
                continue;
            };

            if !synced {
                if let Some(file) = self.active_file() {
                    file.sync()?;
                }
                synced = true;
            }
            let Some(mut segment) = self.segments.remove(&id) else {
                continue;
            };
            segment.set_state(SegmentState::Reclaimed);
            self.release(segment.file())?;
            reclaimed.push(id);
        }

        if !reclaimed.is_empty() {
            debug!(segments = ?reclaimed, free_segments = self.free.len(), "reclaimed segments");
        }
        Ok(reclaimed)
    }

    /// The active segment's file.
    pub(crate) fn active_file(&self) -> Option<Arc<dyn SequentialFile>> {
        self.active
            .and_then(|id| self.segments.get(&id))
            .map(|s| Arc::clone(s.file()))
    }

    /// Pins every data segment for reading, oldest first.
    pub(crate) fn pin_segments(&self) -> Vec<PinnedSegment> {
        self.segments
            .values()
            .map(|s| PinnedSegment {
                id: s.id(),
                file: Arc::clone(s.file()),
                _guard: s.intent_lock().read_arc(),
            })
            .collect()
    }

    /// Bookkeeping snapshot of every data segment, oldest first.
    #[must_use]
    pub fn stats(&self) -> Vec<SegmentStats> {
        self.segments.values().map(JournalSegment::stats).collect()
    }

    /// Number of pooled empty segments.
    #[must_use]
    pub fn free_segments(&self) -> usize {
        self.free.len()
    }

    /// Syncs the active segment and closes every file.
    pub(crate) fn close(&mut self) -> CoreResult<()> {
        if let Some(file) = self.active_file() {
            file.sync()?;
        }
        for segment in self.segments.values() {
            segment.file().close()?;
        }
        for file in &self.free {
            file.close()?;
        }
        self.segments.clear();
        self.free.clear();
        self.active = None;
        Ok(())
    }

    fn segment_mut(&mut self, id: SegmentId) -> CoreResult<&mut JournalSegment> {
        self.segments
            .get_mut(&id)
            .ok_or_else(|| CoreError::invalid_operation(format!("unknown segment {id}")))
    }

    /// Closes the active segment and makes a fresh one active.
    fn roll(&mut self) -> CoreResult<()> {
        if let Some(old) = self.active.take() {
            let segment = self.segment_mut(old)?;
            segment.file().sync()?;
            segment.set_state(SegmentState::Full);
        }

        let id = self.take_id();
        let name = self.file_name(id);
        let header = SegmentHeader::new(id).encode();

        let file = if let Some(file) = self.free.pop_front() {
            // Header first: a crash before the rename leaves a header-only
            // file, which the next open treats as free.
            file.truncate(0)?;
            file.write(&header, true)?;
            file.rename(&name)?;
            file
        } else {
            let file = self.factory.create_file(&name)?;
            file.open()?;
            file.write(&header, true)?;
            file
        };

        let mut segment = JournalSegment::new(id, file, SEGMENT_HEADER_SIZE);
        segment.set_state(SegmentState::Active);
        self.segments.insert(id, segment);
        self.active = Some(id);
        debug!(segment = %id, file = %name, "rolled over to new segment");

        self.fill_free_pool()
    }

    fn fill_free_pool(&mut self) -> CoreResult<()> {
        while self.free.len() < self.config.min_free_segments {
            let id = self.take_id();
            let file = self.factory.create_file(&self.file_name(id))?;
            file.open()?;
            file.write(&SegmentHeader::new(id).encode(), true)?;
            self.free.push_back(file);
        }
        Ok(())
    }

    fn release(&mut self, file: &Arc<dyn SequentialFile>) -> CoreResult<()> {
        if self.free.len() < self.config.max_free_segments {
            file.truncate(SEGMENT_HEADER_SIZE)?;
            self.free.push_back(Arc::clone(file));
        } else {
            file.delete()?;
        }
        Ok(())
    }

    fn take_id(&mut self) -> SegmentId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn file_name(&self, id: SegmentId) -> String {
        segment_file_name(&self.config.file_prefix, id, &self.config.file_extension)
    }
}
