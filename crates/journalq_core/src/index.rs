//! Live-record index and the rules that apply records to it.
//!
//! The same rules run on the append path and during replay, so the
//! reclamation counts rebuilt by a load match the ones a running journal
//! would have kept.
//!
//! ## Counting
//!
//! Every record counts as live in its segment when written, except
//! non-transactional DELETEs and transaction terminators. From then on:
//!
//! - a live id's ADD and its latest UPDATE stay live until the id is deleted
//! - an UPDATE releases the UPDATE it supersedes
//! - a DELETE releases those records and makes its own segment reference
//!   theirs, so it cannot be reclaimed while they can still be replayed
//! - a terminated transaction releases its own pending records (except ADD
//!   and UPDATE records a commit moved into the index), and the terminator's
//!   segment references every segment the transaction touched

use crate::error::{CoreError, CoreResult};
use crate::record::JournalRecord;
use crate::segment::{JournalFileManager, RecordPosition};
use crate::transaction::JournalTransaction;
use crate::types::{PendingOperation, RecordId, RecordInfo, SegmentId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct IndexEntry {
    user_record_type: u8,
    /// The ADD, then the latest UPDATE if there was one.
    positions: Vec<RecordPosition>,
    body: Option<Vec<u8>>,
}

/// Maps every live record id to the log positions that define it.
#[derive(Debug, Default)]
pub struct RecordIndex {
    records: HashMap<RecordId, IndexEntry>,
    retain_bodies: bool,
}

/// Whether a record counts toward its segment's live count when written.
pub(crate) fn counts_live(record: &JournalRecord) -> bool {
    !matches!(
        record,
        JournalRecord::Delete { txid: None, .. }
            | JournalRecord::Commit { .. }
            | JournalRecord::Rollback { .. }
    )
}

impl RecordIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index that also keeps record bodies, for replay.
    pub(crate) fn retaining_bodies() -> Self {
        Self {
            records: HashMap::new(),
            retain_bodies: true,
        }
    }

    /// Whether `id` is live.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Position of the record that last set `id`'s body.
    #[must_use]
    pub fn position(&self, id: RecordId) -> Option<RecordPosition> {
        self.records
            .get(&id)
            .and_then(|entry| entry.positions.last().copied())
    }

    /// Splits out the replayed records and drops the bodies the index kept.
    pub(crate) fn take_records(&mut self) -> BTreeMap<RecordId, RecordInfo> {
        self.retain_bodies = false;
        self.records
            .iter_mut()
            .map(|(&id, entry)| {
                let info = RecordInfo {
                    id,
                    user_record_type: entry.user_record_type,
                    body: entry.body.take().unwrap_or_default(),
                };
                (id, info)
            })
            .collect()
    }

    /// Makes `id` live, defined by the ADD at `position`.
    pub(crate) fn apply_add(
        &mut self,
        id: RecordId,
        user_record_type: u8,
        body: &[u8],
        position: RecordPosition,
    ) -> CoreResult<()> {
        if self.records.contains_key(&id) {
            return Err(CoreError::inconsistent(format!(
                "{id} added while already live"
            )));
        }
        self.records.insert(
            id,
            IndexEntry {
                user_record_type,
                positions: vec![position],
                body: self.retain_bodies.then(|| body.to_vec()),
            },
        );
        Ok(())
    }

    /// Applies an UPDATE at `position`.
    ///
    /// The UPDATE it supersedes, if any, is released; the ADD stays live.
    /// An update for an id that is no longer live is dropped and its record
    /// released. Returns whether it was applied.
    pub(crate) fn apply_update(
        &mut self,
        files: &mut JournalFileManager,
        id: RecordId,
        body: &[u8],
        position: RecordPosition,
    ) -> bool {
        match self.records.get_mut(&id) {
            Some(entry) => {
                if entry.positions.len() > 1 {
                    if let Some(superseded) = entry.positions.pop() {
                        files.decrement_live(superseded.segment);
                    }
                }
                entry.positions.push(position);
                if self.retain_bodies {
                    entry.body = Some(body.to_vec());
                }
                true
            }
            None => {
                files.decrement_live(position.segment);
                false
            }
        }
    }

    /// Applies a DELETE written to `delete_segment`.
    ///
    /// Returns whether `id` was live.
    pub(crate) fn apply_delete(
        &mut self,
        files: &mut JournalFileManager,
        id: RecordId,
        delete_segment: SegmentId,
    ) -> bool {
        match self.records.remove(&id) {
            Some(entry) => {
                release_positions(files, &entry.positions, delete_segment);
                true
            }
            None => false,
        }
    }

    /// Applies a committed transaction whose COMMIT landed at `terminator`.
    pub(crate) fn apply_commit(
        &mut self,
        files: &mut JournalFileManager,
        tx: &JournalTransaction,
        terminator: SegmentId,
    ) -> CoreResult<()> {
        for (op, position) in tx.operations() {
            match op {
                PendingOperation::Add {
                    id,
                    user_record_type,
                    body,
                } => self.apply_add(*id, *user_record_type, body, *position)?,
                PendingOperation::Update { id, body } => {
                    self.apply_update(files, *id, body, *position);
                }
                PendingOperation::Delete { id } => {
                    self.apply_delete(files, *id, position.segment);
                    files.decrement_live(position.segment);
                }
            }
        }
        finish_transaction(files, tx, terminator, false);
        Ok(())
    }
}

/// Releases a rolled-back transaction whose ROLLBACK landed at `terminator`.
pub(crate) fn apply_rollback(
    files: &mut JournalFileManager,
    tx: &JournalTransaction,
    terminator: SegmentId,
) {
    finish_transaction(files, tx, terminator, true);
}

/// Releases records that only mattered while their id was live.
pub(crate) fn release_positions(
    files: &mut JournalFileManager,
    positions: &[RecordPosition],
    shadowing_segment: SegmentId,
) {
    for position in positions {
        files.decrement_live(position.segment);
        files.add_reference(shadowing_segment, position.segment);
    }
}

fn finish_transaction(
    files: &mut JournalFileManager,
    tx: &JournalTransaction,
    terminator: SegmentId,
    release_operations: bool,
) {
    if release_operations {
        for (_, position) in tx.operations() {
            files.decrement_live(position.segment);
        }
    }
    if let Some(position) = tx.prepare_position() {
        files.decrement_live(position.segment);
    }
    for segment in tx.touched_segments() {
        files.add_reference(terminator, segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::types::TransactionId;
    use journalq_storage::InMemoryFactory;
    use std::sync::Arc;

    fn files() -> JournalFileManager {
        let config = JournalConfig::new().segment_size(4096).min_free_segments(0);
        let mut files = JournalFileManager::new(config, Arc::new(InMemoryFactory::new()));
        files.open().unwrap();
        files
    }

    fn write(files: &mut JournalFileManager, record: &JournalRecord) -> RecordPosition {
        files
            .append(&record.encode(), counts_live(record))
            .unwrap()
            .position
    }

    fn add(id: u64, body: &[u8]) -> JournalRecord {
        JournalRecord::Add {
            id: RecordId::new(id),
            user_record_type: 2,
            body: body.to_vec(),
            txid: None,
        }
    }

    fn live(files: &JournalFileManager) -> u64 {
        files.stats().iter().map(|s| s.live).sum()
    }

    #[test]
    fn counting_rule() {
        assert!(counts_live(&add(1, b"a")));
        assert!(!counts_live(&JournalRecord::Delete {
            id: RecordId::new(1),
            txid: None
        }));
        assert!(counts_live(&JournalRecord::Delete {
            id: RecordId::new(1),
            txid: Some(TransactionId::new(1))
        }));
        assert!(!counts_live(&JournalRecord::Commit {
            txid: TransactionId::new(1),
            operation_count: 0
        }));
    }

    #[test]
    fn add_update_delete_releases_everything() {
        let mut files = files();
        let mut index = RecordIndex::new();
        let id = RecordId::new(1);

        let p1 = write(&mut files, &add(1, b"a"));
        index.apply_add(id, 2, b"a", p1).unwrap();
        let update = JournalRecord::Update {
            id,
            body: b"b".to_vec(),
            txid: None,
        };
        let p2 = write(&mut files, &update);
        assert!(index.apply_update(&mut files, id, b"b", p2));
        assert_eq!(index.position(id), Some(p2));
        assert_eq!(live(&files), 2);

        let delete = JournalRecord::Delete { id, txid: None };
        let p3 = write(&mut files, &delete);
        assert!(index.apply_delete(&mut files, id, p3.segment));
        assert!(index.is_empty());
        assert_eq!(live(&files), 0);
    }

    #[test]
    fn update_releases_the_update_it_supersedes() {
        let mut files = files();
        let mut index = RecordIndex::new();
        let id = RecordId::new(1);

        let p1 = write(&mut files, &add(1, b"a"));
        index.apply_add(id, 2, b"a", p1).unwrap();
        let mut last = p1;
        for body in [b"b", b"c", b"d"] {
            let update = JournalRecord::Update {
                id,
                body: body.to_vec(),
                txid: None,
            };
            last = write(&mut files, &update);
            assert!(index.apply_update(&mut files, id, body, last));
            // the ADD plus the latest UPDATE
            assert_eq!(live(&files), 2);
        }
        assert_eq!(index.position(id), Some(last));

        let delete = JournalRecord::Delete { id, txid: None };
        let p = write(&mut files, &delete);
        assert!(index.apply_delete(&mut files, id, p.segment));
        assert_eq!(live(&files), 0);
    }

    #[test]
    fn duplicate_add_is_inconsistent() {
        let mut files = files();
        let mut index = RecordIndex::new();
        let p = write(&mut files, &add(1, b"a"));
        index.apply_add(RecordId::new(1), 0, b"a", p).unwrap();
        assert!(matches!(
            index.apply_add(RecordId::new(1), 0, b"a", p),
            Err(CoreError::Inconsistent { .. })
        ));
    }

    #[test]
    fn update_of_missing_id_is_dropped() {
        let mut files = files();
        let mut index = RecordIndex::new();
        let update = JournalRecord::Update {
            id: RecordId::new(9),
            body: Vec::new(),
            txid: None,
        };
        let p = write(&mut files, &update);
        assert!(!index.apply_update(&mut files, RecordId::new(9), b"", p));
        assert_eq!(live(&files), 0);
    }

    #[test]
    fn commit_moves_adds_and_releases_the_rest() {
        let mut files = files();
        let mut index = RecordIndex::new();
        let txid = TransactionId::new(7);
        let mut tx = JournalTransaction::new(txid);

        let op = PendingOperation::Add {
            id: RecordId::new(3),
            user_record_type: 1,
            body: b"c".to_vec(),
        };
        let p = write(&mut files, &JournalRecord::from_operation(&op, txid));
        tx.push(op, p).unwrap();
        let prepare = JournalRecord::Prepare {
            txid,
            operation_count: 1,
            data: Vec::new(),
        };
        let pp = write(&mut files, &prepare);
        tx.mark_prepared(pp, Vec::new()).unwrap();
        assert_eq!(live(&files), 2);

        let commit = JournalRecord::Commit {
            txid,
            operation_count: 1,
        };
        let pc = write(&mut files, &commit);
        index.apply_commit(&mut files, &tx, pc.segment).unwrap();

        assert!(index.contains(RecordId::new(3)));
        assert_eq!(live(&files), 1);
    }

    #[test]
    fn rollback_releases_all() {
        let mut files = files();
        let txid = TransactionId::new(7);
        let mut tx = JournalTransaction::new(txid);
        let op = PendingOperation::Delete { id: RecordId::new(1) };
        let p = write(&mut files, &JournalRecord::from_operation(&op, txid));
        tx.push(op, p).unwrap();

        apply_rollback(&mut files, &tx, p.segment);
        assert_eq!(live(&files), 0);
    }

    #[test]
    fn replay_index_keeps_bodies() {
        let mut files = files();
        let mut index = RecordIndex::retaining_bodies();
        let p1 = write(&mut files, &add(1, b"first"));
        index.apply_add(RecordId::new(1), 4, b"first", p1).unwrap();
        index.apply_update(&mut files, RecordId::new(1), b"second", p1);

        let records = index.take_records();
        let info = &records[&RecordId::new(1)];
        assert_eq!(info.body, b"second");
        assert_eq!(info.user_record_type, 4);
        assert!(index.contains(RecordId::new(1)));
    }
}
