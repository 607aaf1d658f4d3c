//! Load/replay engine.
//!
//! Replays every data segment oldest-first and rebuilds the live-record
//! index, the transaction tracker and the per-segment reclamation counts.
//!
//! ## Replay Rules
//!
//! - non-transactional records apply directly; a DELETE of an unknown id is
//!   ignored (its ADD lived in a reclaimed segment)
//! - an UPDATE of an unknown id is held until a later DELETE of that id; one
//!   never resolved is dropped at the end
//! - transactional records are buffered under their transaction until a
//!   COMMIT (apply in order) or ROLLBACK (discard)
//! - a COMMIT or ROLLBACK for a transaction with nothing buffered is a no-op
//! - a prepared transaction with no terminator is in-doubt; one never
//!   prepared is incomplete
//! - a corrupt record in the newest segment is a torn tail: replay stops
//!   there and the segment is truncated; anywhere else it is fatal

use crate::error::{CoreError, CoreResult};
use crate::index::{apply_rollback, counts_live, release_positions, RecordIndex};
use crate::record::JournalRecord;
use crate::segment::{JournalFileManager, RecordPosition, SegmentRecordIterator, SegmentStats};
use crate::transaction::{TransactionOutcome, TransactionState, TransactionTracker};
use crate::types::{PreparedTransaction, RecordId, RecordInfo, TransactionId};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// What a load reconstructed from the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadResult {
    /// Live records with their current bodies.
    pub records: BTreeMap<RecordId, RecordInfo>,
    /// Prepared transactions with no COMMIT or ROLLBACK, by id.
    pub prepared: Vec<PreparedTransaction>,
    /// Transactions that were never prepared nor terminated. Their effects
    /// were discarded and a ROLLBACK was written for each.
    pub incomplete: Vec<TransactionId>,
    /// Highest record id seen in any record.
    pub max_record_id: Option<RecordId>,
    /// Position where a torn tail was cut off, if one was found.
    pub torn_tail: Option<RecordPosition>,
    /// Records decoded.
    pub records_read: u64,
    /// Segment bookkeeping after load.
    pub segments: Vec<SegmentStats>,
}

/// State rebuilt by replay, handed to the journal.
#[derive(Debug)]
pub(crate) struct Replayed {
    pub index: RecordIndex,
    pub tracker: TransactionTracker,
    pub result: LoadResult,
}

/// Replays every data segment the manager opened.
pub(crate) fn replay(files: &mut JournalFileManager, history_limit: usize) -> CoreResult<Replayed> {
    let mut replay = Replay {
        index: RecordIndex::retaining_bodies(),
        tracker: TransactionTracker::new(history_limit),
        orphans: HashMap::new(),
        max_record_id: None,
        records_read: 0,
    };

    let segments = files.data_segments();
    let newest = segments.last().map(|(id, _)| *id);
    let mut torn_tail = None;

    for (segment, file) in segments {
        for item in SegmentRecordIterator::new(file, segment)? {
            match item {
                Ok((offset, record)) => {
                    replay.apply(files, RecordPosition { segment, offset }, record)?;
                }
                Err(CoreError::CorruptRecord {
                    offset, message, ..
                }) if Some(segment) == newest => {
                    warn!(%segment, offset, %message, "truncating torn tail of newest segment");
                    files.truncate_segment(segment, offset)?;
                    torn_tail = Some(RecordPosition { segment, offset });
                    break;
                }
                Err(e) => return Err(e),
            }
        }
    }

    replay.finish(files, torn_tail)
}

struct Replay {
    index: RecordIndex,
    tracker: TransactionTracker,
    /// Updates whose id was not live, awaiting a DELETE.
    orphans: HashMap<RecordId, Vec<RecordPosition>>,
    max_record_id: Option<RecordId>,
    records_read: u64,
}

impl Replay {
    fn apply(
        &mut self,
        files: &mut JournalFileManager,
        position: RecordPosition,
        record: JournalRecord,
    ) -> CoreResult<()> {
        self.records_read += 1;
        files.count_replayed(position.segment, counts_live(&record))?;
        if let Some(id) = record.record_id() {
            self.max_record_id = self.max_record_id.max(Some(id));
        }

        match record {
            JournalRecord::Add { txid: Some(txid), .. }
            | JournalRecord::Update { txid: Some(txid), .. }
            | JournalRecord::Delete { txid: Some(txid), .. } => {
                if self
                    .tracker
                    .get(txid)
                    .is_some_and(|tx| tx.state() == TransactionState::Prepared)
                {
                    return Err(CoreError::inconsistent(format!(
                        "operation for {txid} after its prepare at {}:{}",
                        position.segment, position.offset
                    )));
                }
                if let Some(op) = record.to_operation() {
                    self.tracker.record_operation(txid, op, position)?;
                }
            }
            JournalRecord::Add {
                id,
                user_record_type,
                body,
                txid: None,
            } => {
                self.index
                    .apply_add(id, user_record_type, &body, position)
                    .map_err(|e| at(e, position))?;
            }
            JournalRecord::Update {
                id,
                body,
                txid: None,
            } => {
                if self.index.contains(id) {
                    self.index.apply_update(files, id, &body, position);
                } else {
                    self.orphans.entry(id).or_default().push(position);
                }
            }
            JournalRecord::Delete { id, txid: None } => {
                if !self.index.apply_delete(files, id, position.segment) {
                    if let Some(positions) = self.orphans.remove(&id) {
                        release_positions(files, &positions, position.segment);
                    }
                }
            }
            JournalRecord::Prepare { txid, data, .. } => {
                if self.tracker.get(txid).is_some_and(|tx| tx.state() != TransactionState::Open) {
                    return Err(CoreError::inconsistent(format!(
                        "{txid} prepared twice, again at {}:{}",
                        position.segment, position.offset
                    )));
                }
                self.tracker.mark_prepared(txid, position, data)?;
            }
            JournalRecord::Commit { txid, .. } => {
                match self.tracker.complete(txid, TransactionOutcome::Committed) {
                    Some(tx) => self
                        .index
                        .apply_commit(files, &tx, position.segment)
                        .map_err(|e| at(e, position))?,
                    None => {
                        debug!(%txid, "commit with nothing buffered");
                        self.remember_if_unknown(txid, TransactionOutcome::Committed);
                    }
                }
            }
            JournalRecord::Rollback { txid, .. } => {
                match self.tracker.complete(txid, TransactionOutcome::RolledBack) {
                    Some(tx) => apply_rollback(files, &tx, position.segment),
                    None => {
                        debug!(%txid, "rollback with nothing buffered");
                        self.remember_if_unknown(txid, TransactionOutcome::RolledBack);
                    }
                }
            }
        }
        Ok(())
    }

    fn remember_if_unknown(&mut self, txid: TransactionId, outcome: TransactionOutcome) {
        if self.tracker.outcome(txid).is_none() {
            self.tracker.remember(txid, outcome);
        }
    }

    fn finish(
        mut self,
        files: &mut JournalFileManager,
        torn_tail: Option<RecordPosition>,
    ) -> CoreResult<Replayed> {
        for (id, positions) in self.orphans.drain() {
            debug!(%id, updates = positions.len(), "dropping updates of unknown record");
            for position in positions {
                files.decrement_live(position.segment);
            }
        }

        files.activate_newest();

        let result = LoadResult {
            records: self.index.take_records(),
            prepared: self.tracker.prepared(),
            incomplete: self.tracker.open_ids(),
            max_record_id: self.max_record_id,
            torn_tail,
            records_read: self.records_read,
            segments: Vec::new(),
        };

        Ok(Replayed {
            index: self.index,
            tracker: self.tracker,
            result,
        })
    }
}

fn at(err: CoreError, position: RecordPosition) -> CoreError {
    match err {
        CoreError::Inconsistent { message } => CoreError::inconsistent(format!(
            "{message} (at {}:{})",
            position.segment, position.offset
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JournalConfig;
    use crate::segment::SegmentHeader;
    use crate::types::{PendingOperation, SegmentId};
    use journalq_storage::InMemoryFactory;
    use std::sync::Arc;

    const SEGMENT: &str = "journal-00000000000000000001.jrn";

    fn write_segment(factory: &InMemoryFactory, name: &str, id: u64, records: &[JournalRecord]) {
        let mut data = SegmentHeader::new(SegmentId::new(id)).encode();
        for record in records {
            data.extend_from_slice(&record.encode());
        }
        factory.set_file_data(name, data);
    }

    fn load(factory: &InMemoryFactory) -> CoreResult<(JournalFileManager, Replayed)> {
        let config = JournalConfig::new().segment_size(4096).min_free_segments(0);
        let mut files = JournalFileManager::new(config, Arc::new(factory.clone()));
        files.open()?;
        let replayed = replay(&mut files, 16)?;
        Ok((files, replayed))
    }

    fn add(id: u64, body: &[u8], txid: Option<u64>) -> JournalRecord {
        JournalRecord::Add {
            id: RecordId::new(id),
            user_record_type: 1,
            body: body.to_vec(),
            txid: txid.map(TransactionId::new),
        }
    }

    fn delete(id: u64, txid: Option<u64>) -> JournalRecord {
        JournalRecord::Delete {
            id: RecordId::new(id),
            txid: txid.map(TransactionId::new),
        }
    }

    fn update(id: u64, body: &[u8]) -> JournalRecord {
        JournalRecord::Update {
            id: RecordId::new(id),
            body: body.to_vec(),
            txid: None,
        }
    }

    fn commit(txid: u64) -> JournalRecord {
        JournalRecord::Commit {
            txid: TransactionId::new(txid),
            operation_count: 0,
        }
    }

    fn prepare(txid: u64) -> JournalRecord {
        JournalRecord::Prepare {
            txid: TransactionId::new(txid),
            operation_count: 0,
            data: b"xid".to_vec(),
        }
    }

    #[test]
    fn replays_plain_operations() {
        let factory = InMemoryFactory::new();
        write_segment(
            &factory,
            SEGMENT,
            1,
            &[add(1, b"a", None), add(2, b"b", None), delete(1, None), update(2, b"bb")],
        );

        let (files, replayed) = load(&factory).unwrap();
        let records = &replayed.result.records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[&RecordId::new(2)].body, b"bb");
        assert_eq!(records[&RecordId::new(2)].user_record_type, 1);
        assert_eq!(replayed.result.max_record_id, Some(RecordId::new(2)));
        assert_eq!(replayed.result.records_read, 4);

        let stats = files.stats();
        assert_eq!(stats[0].total, 4);
        assert_eq!(stats[0].live, 2);
    }

    #[test]
    fn transactions_apply_only_on_commit() {
        let factory = InMemoryFactory::new();
        write_segment(
            &factory,
            SEGMENT,
            1,
            &[
                add(1, b"a", Some(10)),
                add(2, b"b", Some(20)),
                commit(10),
                JournalRecord::Rollback {
                    txid: TransactionId::new(20),
                    operation_count: 1,
                },
            ],
        );

        let (_, replayed) = load(&factory).unwrap();
        assert_eq!(
            replayed.result.records.keys().copied().collect::<Vec<_>>(),
            vec![RecordId::new(1)]
        );
        assert_eq!(
            replayed.tracker.outcome(TransactionId::new(20)),
            Some(TransactionOutcome::RolledBack)
        );
    }

    #[test]
    fn prepared_transaction_is_in_doubt() {
        let factory = InMemoryFactory::new();
        write_segment(
            &factory,
            SEGMENT,
            1,
            &[add(3, b"c", Some(100)), prepare(100)],
        );

        let (_, replayed) = load(&factory).unwrap();
        assert!(replayed.result.records.is_empty());
        assert_eq!(replayed.result.prepared.len(), 1);
        let prepared = &replayed.result.prepared[0];
        assert_eq!(prepared.id, TransactionId::new(100));
        assert_eq!(prepared.data, b"xid");
        assert_eq!(
            prepared.operations,
            vec![PendingOperation::Add {
                id: RecordId::new(3),
                user_record_type: 1,
                body: b"c".to_vec(),
            }]
        );
        assert!(replayed.result.incomplete.is_empty());
    }

    #[test]
    fn unprepared_transaction_is_incomplete() {
        let factory = InMemoryFactory::new();
        write_segment(&factory, SEGMENT, 1, &[add(3, b"c", Some(7))]);

        let (_, replayed) = load(&factory).unwrap();
        assert_eq!(replayed.result.incomplete, vec![TransactionId::new(7)]);
        assert!(replayed.result.prepared.is_empty());
    }

    #[test]
    fn operation_after_prepare_is_inconsistent() {
        let factory = InMemoryFactory::new();
        write_segment(
            &factory,
            SEGMENT,
            1,
            &[add(3, b"c", Some(7)), prepare(7), add(4, b"d", Some(7))],
        );

        assert!(matches!(load(&factory), Err(CoreError::Inconsistent { .. })));
    }

    #[test]
    fn duplicate_add_is_inconsistent() {
        let factory = InMemoryFactory::new();
        write_segment(&factory, SEGMENT, 1, &[add(1, b"a", None), add(1, b"a", None)]);

        let err = load(&factory).unwrap_err();
        assert!(err.to_string().contains("rec:1"));
    }

    #[test]
    fn unknown_commit_and_delete_are_ignored() {
        let factory = InMemoryFactory::new();
        write_segment(&factory, SEGMENT, 1, &[commit(55), delete(9, None)]);

        let (_, replayed) = load(&factory).unwrap();
        assert!(replayed.result.records.is_empty());
        assert_eq!(
            replayed.tracker.outcome(TransactionId::new(55)),
            Some(TransactionOutcome::Committed)
        );
    }

    #[test]
    fn orphan_update_resolved_by_delete() {
        let factory = InMemoryFactory::new();
        write_segment(&factory, SEGMENT, 1, &[update(4, b"x"), delete(4, None)]);

        let (files, replayed) = load(&factory).unwrap();
        assert!(replayed.result.records.is_empty());
        assert_eq!(files.stats()[0].live, 0);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let factory = InMemoryFactory::new();
        write_segment(&factory, SEGMENT, 1, &[add(1, b"a", None), add(2, b"b", None)]);
        let mut data = factory.file_data(SEGMENT).unwrap();
        let full = data.len();
        data.truncate(full - 2);
        factory.set_file_data(SEGMENT, data);

        let (_, replayed) = load(&factory).unwrap();
        assert_eq!(replayed.result.records.len(), 1);
        let tail = replayed.result.torn_tail.unwrap();
        assert_eq!(factory.file_data(SEGMENT).unwrap().len() as u64, tail.offset);
    }

    #[test]
    fn corruption_before_newest_segment_is_fatal() {
        let factory = InMemoryFactory::new();
        write_segment(&factory, SEGMENT, 1, &[add(1, b"a", None)]);
        write_segment(
            &factory,
            "journal-00000000000000000002.jrn",
            2,
            &[add(2, b"b", None)],
        );
        let mut data = factory.file_data(SEGMENT).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        factory.set_file_data(SEGMENT, data);

        assert!(matches!(load(&factory), Err(CoreError::CorruptRecord { .. })));
    }

    #[test]
    fn commit_in_later_segment_references_operations() {
        let factory = InMemoryFactory::new();
        write_segment(&factory, SEGMENT, 1, &[delete(1, Some(5))]);
        write_segment(
            &factory,
            "journal-00000000000000000002.jrn",
            2,
            &[commit(5)],
        );
        let (files, _) = load(&factory).unwrap();
        let stats = files.stats();
        assert_eq!(stats[0].live, 0);
        assert_eq!(stats[1].references, vec![SegmentId::new(1)]);
    }
}
