//! Restart and crash-recovery tests over a shared in-memory store.
//!
//! A "restart" stops the journal and builds a new one over the same
//! factory. A "crash" drops the journal without stopping it; a power loss
//! additionally throws away every byte that was never synced.

use journalq_core::{
    CoreError, IdGenerator, Journal, JournalConfig, LoadResult, PendingOperation, RecordId,
    SegmentId, TransactionId, SEGMENT_HEADER_SIZE,
};
use journalq_storage::InMemoryFactory;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn config() -> JournalConfig {
    JournalConfig::new()
        .segment_size(4096)
        .min_free_segments(1)
        .max_free_segments(2)
        .flush_interval(Duration::ZERO)
}

/// 512-byte segments; a record with a 100-byte body takes 118 bytes, so
/// four fit in one segment.
fn small_config() -> JournalConfig {
    config().segment_size(512)
}

fn open(factory: &InMemoryFactory, config: JournalConfig) -> (Journal, LoadResult) {
    let journal = Journal::new(
        config,
        Arc::new(factory.clone()),
        Arc::new(IdGenerator::default()),
    );
    journal.start().unwrap();
    let result = journal.load().unwrap();
    (journal, result)
}

fn bodies(result: &LoadResult) -> BTreeMap<u64, Vec<u8>> {
    result
        .records
        .iter()
        .map(|(id, info)| (id.as_u64(), info.body.clone()))
        .collect()
}

fn id(n: u64) -> RecordId {
    RecordId::new(n)
}

fn expected(entries: &[(u64, &[u8])]) -> BTreeMap<u64, Vec<u8>> {
    entries.iter().map(|(k, v)| (*k, v.to_vec())).collect()
}

fn segment_ids(journal: &Journal) -> Vec<SegmentId> {
    journal.stats().segments.iter().map(|s| s.id).collect()
}

fn power_loss(journal: Journal, factory: &InMemoryFactory) {
    drop(journal);
    factory.crash();
}

#[test]
fn add_delete_prepare_commit_across_restarts() {
    let factory = InMemoryFactory::new();

    let (journal, result) = open(&factory, config());
    assert!(result.records.is_empty());
    journal.append_add(id(1), 0, b"a", Some(true)).unwrap();
    journal.append_add(id(2), 0, b"b", Some(true)).unwrap();
    journal.append_delete(id(1), Some(true)).unwrap();
    journal.stop().unwrap();

    let (journal, result) = open(&factory, config());
    assert_eq!(bodies(&result), expected(&[(2, b"b")]));

    let tx = TransactionId::new(100);
    journal.append_add_transactional(tx, id(3), 0, b"c").unwrap();
    journal.prepare(tx, b"branch-100", Some(true)).unwrap();
    drop(journal);

    let (journal, result) = open(&factory, config());
    assert_eq!(bodies(&result), expected(&[(2, b"b")]));
    assert_eq!(result.prepared.len(), 1);
    let prepared = &result.prepared[0];
    assert_eq!(prepared.id, tx);
    assert_eq!(prepared.data, b"branch-100");
    assert_eq!(
        prepared.operations,
        vec![PendingOperation::Add {
            id: id(3),
            user_record_type: 0,
            body: b"c".to_vec(),
        }]
    );

    journal.commit(tx, Some(true)).unwrap();
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, config());
    assert_eq!(bodies(&result), expected(&[(2, b"b"), (3, b"c")]));
    assert!(result.prepared.is_empty());
}

#[test]
fn update_keeps_user_record_type() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    journal.append_add(id(1), 7, b"first", None).unwrap();
    journal.append_update(id(1), b"second", None).unwrap();
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, config());
    let info = &result.records[&id(1)];
    assert_eq!(info.user_record_type, 7);
    assert_eq!(info.body, b"second");
}

#[test]
fn prepared_rollback_discards_everything() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    journal.append_add(id(1), 0, b"keep", None).unwrap();

    let tx = TransactionId::new(5);
    journal.append_update_transactional(tx, id(1), b"changed").unwrap();
    journal.append_add_transactional(tx, id(2), 0, b"new").unwrap();
    journal.prepare(tx, b"", None).unwrap();
    drop(journal);

    let (journal, result) = open(&factory, config());
    assert_eq!(result.prepared.len(), 1);
    journal.rollback(tx, None).unwrap();
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, config());
    assert_eq!(bodies(&result), expected(&[(1, b"keep")]));
    assert!(result.prepared.is_empty());
}

#[test]
fn torn_tail_is_truncated_and_appends_continue() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    for n in 1..=10 {
        journal.append_add(id(n), 0, b"payload", Some(true)).unwrap();
    }
    let newest = journal.stats().segments.last().unwrap().file_name.clone();
    journal.stop().unwrap();

    let data = factory.file_data(&newest).unwrap();
    factory.set_file_data(&newest, data[..data.len() - 3].to_vec());

    let (journal, result) = open(&factory, config());
    assert_eq!(result.records.len(), 9);
    assert!(!result.records.contains_key(&id(10)));
    let torn = result.torn_tail.unwrap();
    assert!(torn.offset > SEGMENT_HEADER_SIZE);

    journal.append_add(id(11), 0, b"after", Some(true)).unwrap();
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, config());
    assert_eq!(result.records.len(), 10);
    assert!(result.records.contains_key(&id(11)));
    assert!(result.torn_tail.is_none());
}

#[test]
fn corruption_before_the_tail_is_fatal() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    for n in 1..=8 {
        journal.append_add(id(n), 0, &[n as u8; 100], Some(true)).unwrap();
    }
    let oldest = journal.stats().segments[0].file_name.clone();
    journal.stop().unwrap();

    let mut data = factory.file_data(&oldest).unwrap();
    data[SEGMENT_HEADER_SIZE as usize + 20] ^= 0xFF;
    factory.set_file_data(&oldest, data);

    let journal = Journal::new(
        small_config(),
        Arc::new(factory.clone()),
        Arc::new(IdGenerator::default()),
    );
    journal.start().unwrap();
    assert!(matches!(
        journal.load(),
        Err(CoreError::CorruptRecord { .. })
    ));
    assert!(journal.is_failed());
}

#[test]
fn recovery_across_many_segments() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    for n in 1..=40 {
        journal.append_add(id(n), 1, &[n as u8; 100], None).unwrap();
    }
    let before = segment_ids(&journal);
    assert_eq!(before.len(), 10);
    assert!(before.windows(2).all(|w| w[0] < w[1]));
    journal.stop().unwrap();

    let (journal, result) = open(&factory, small_config());
    assert_eq!(result.records.len(), 40);
    for (n, info) in &result.records {
        assert_eq!(info.body, vec![n.as_u64() as u8; 100]);
    }
    assert_eq!(result.segments.len(), 10);
    assert_eq!(result.max_record_id, Some(id(40)));
    assert_eq!(journal.id_generator().next_id(), id(41));
}

#[test]
fn reclaimed_segments_are_pooled_and_reused_with_higher_ids() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    for n in 1..=8 {
        journal.append_add(id(n), 0, &[0u8; 100], None).unwrap();
    }
    let first = segment_ids(&journal)[0];

    for n in 1..=4 {
        journal.append_delete(id(n), None).unwrap();
    }
    let stats = journal.stats();
    assert!(stats.segments.iter().all(|s| s.id != first));
    assert_eq!(stats.free_segments, 2);
    let highest = stats.segments.iter().map(|s| s.id).max().unwrap();

    for n in 9..=16 {
        journal.append_add(id(n), 0, &[0u8; 100], None).unwrap();
    }
    let newest = *segment_ids(&journal).last().unwrap();
    assert!(newest > highest);
    // data segments plus a bounded pool
    assert!(factory.file_names().len() <= journal.stats().segments.len() + 2);
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, small_config());
    let ids: Vec<u64> = result.records.keys().map(|id| id.as_u64()).collect();
    assert_eq!(ids, (5..=16).collect::<Vec<_>>());
}

#[test]
fn segment_with_delete_outlives_older_segment() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());

    // A: adds 1..=4, B: adds 5..=8 and the delete of 1
    for n in 1..=8 {
        journal.append_add(id(n), 0, &[0u8; 100], None).unwrap();
    }
    journal.append_delete(id(1), None).unwrap();
    // C: nothing but the deletes of 2 and 3
    journal.append_delete(id(2), None).unwrap();
    journal.append_delete(id(3), None).unwrap();
    // D: a large record pushes C out of the active slot
    journal.append_add(id(9), 0, &[0u8; 450], None).unwrap();

    let stats = journal.stats();
    assert_eq!(stats.segments.len(), 4);
    let (a, c) = (stats.segments[0].clone(), stats.segments[2].clone());
    assert_eq!(a.live, 1);
    assert_eq!(c.live, 0);
    assert_eq!(c.references, vec![a.id]);
    drop(journal);

    // C must survive: without it, replay would resurrect 2 and 3
    let (journal, result) = open(&factory, small_config());
    let ids: Vec<u64> = result.records.keys().map(|id| id.as_u64()).collect();
    assert_eq!(ids, vec![4, 5, 6, 7, 8, 9]);
    assert_eq!(result.segments.len(), 4);

    journal.append_delete(id(4), None).unwrap();
    let remaining = segment_ids(&journal);
    assert!(!remaining.contains(&a.id));
    assert!(!remaining.contains(&c.id));
    assert_eq!(remaining.len(), 2);
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, small_config());
    let ids: Vec<u64> = result.records.keys().map(|id| id.as_u64()).collect();
    assert_eq!(ids, vec![5, 6, 7, 8, 9]);
}

#[test]
fn committed_transaction_segments_are_reclaimed() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    let tx = TransactionId::new(1);
    for n in 1..=4 {
        journal
            .append_add_transactional(tx, id(n), 0, &[0u8; 90])
            .unwrap();
    }
    journal.commit(tx, None).unwrap();
    for n in 1..=4 {
        journal.append_delete(id(n), None).unwrap();
    }
    // push the active segment forward so everything before it can go
    journal.append_add(id(5), 0, &[0u8; 450], None).unwrap();
    journal.append_delete(id(5), None).unwrap();

    let stats = journal.stats();
    assert_eq!(stats.segments.len(), 1);
    assert_eq!(stats.live_records, 0);
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, small_config());
    assert!(result.records.is_empty());
}

#[test]
fn commit_is_idempotent_across_restart() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    let tx = TransactionId::new(42);
    journal.append_add_transactional(tx, id(1), 0, b"a").unwrap();
    journal.commit(tx, Some(true)).unwrap();
    journal.stop().unwrap();

    let (journal, result) = open(&factory, config());
    assert_eq!(result.records.len(), 1);
    journal.commit(tx, Some(true)).unwrap();
    assert!(matches!(
        journal.rollback(tx, None),
        Err(CoreError::InvalidOperation { .. })
    ));
    assert!(matches!(
        journal.commit(TransactionId::new(43), None),
        Err(CoreError::UnknownTransaction { .. })
    ));
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, config());
    assert_eq!(result.records.len(), 1);
}

#[test]
fn incomplete_transaction_is_rolled_back_at_load() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    let tx = TransactionId::new(9);
    journal.append_add_transactional(tx, id(1), 0, b"never").unwrap();
    drop(journal);

    let (journal, result) = open(&factory, config());
    assert_eq!(result.incomplete, vec![tx]);
    assert!(result.records.is_empty());
    assert!(result.prepared.is_empty());
    assert_eq!(journal.stats().active_transactions, 0);
    // the reservation is gone with the transaction
    journal.append_add(id(1), 0, b"plain", None).unwrap();

    // the id can start a new transaction
    journal.append_add_transactional(tx, id(2), 0, b"again").unwrap();
    journal.commit(tx, None).unwrap();
    journal.stop().unwrap();

    let (_journal, result) = open(&factory, config());
    assert!(result.incomplete.is_empty());
    assert_eq!(bodies(&result), expected(&[(1, b"plain"), (2, b"again")]));
}

#[test]
fn acknowledged_writes_survive_a_sync_failure() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    journal.append_add(id(1), 0, b"durable", Some(true)).unwrap();

    factory.set_fail_syncs(true);
    assert!(journal.append_add(id(2), 0, b"lost?", Some(true)).is_err());
    assert!(journal.is_failed());
    assert!(matches!(
        journal.append_add(id(3), 0, b"refused", None),
        Err(CoreError::JournalFailed)
    ));
    drop(journal);
    factory.set_fail_syncs(false);

    let (_journal, result) = open(&factory, config());
    assert!(result.records.contains_key(&id(1)));
    assert!(!result.records.contains_key(&id(3)));
}

#[test]
fn restart_in_place_after_stop() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    journal.append_add(id(1), 0, b"a", None).unwrap();
    journal.stop().unwrap();

    journal.start().unwrap();
    let result = journal.load().unwrap();
    assert_eq!(bodies(&result), expected(&[(1, b"a")]));
    journal.append_update(id(1), b"b", None).unwrap();
    journal.stop().unwrap();
}

#[test]
fn unsynced_writes_are_lost_on_power_loss() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, config());
    journal.append_add(id(1), 0, b"synced", Some(true)).unwrap();
    journal.append_add(id(2), 0, b"buffered", Some(false)).unwrap();
    journal.append_update(id(1), b"buffered", Some(false)).unwrap();
    power_loss(journal, &factory);

    let (_journal, result) = open(&factory, config());
    assert_eq!(bodies(&result), expected(&[(1, b"synced")]));
}

#[test]
fn commit_that_frees_a_segment_survives_power_loss() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    for n in 1..=5 {
        journal.append_add(id(n), 0, &[n as u8; 100], Some(true)).unwrap();
    }
    for n in 2..=4 {
        journal.append_delete(id(n), Some(true)).unwrap();
    }
    let first = segment_ids(&journal)[0];

    let tx = TransactionId::new(9);
    journal.append_delete_transactional(tx, id(1)).unwrap();
    journal.prepare(tx, b"", Some(true)).unwrap();
    // the buffered COMMIT releases the segment holding ADD 1
    journal.commit(tx, Some(false)).unwrap();
    assert!(!segment_ids(&journal).contains(&first));
    power_loss(journal, &factory);

    let (_journal, result) = open(&factory, small_config());
    assert_eq!(bodies(&result), expected(&[(5, &[5u8; 100])]));
    assert!(result.prepared.is_empty());
}

#[test]
fn deletes_that_free_a_segment_survive_power_loss() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    for n in 1..=5 {
        journal.append_add(id(n), 0, &[n as u8; 100], Some(true)).unwrap();
    }
    for n in 1..=4 {
        journal.append_delete(id(n), Some(false)).unwrap();
    }
    assert_eq!(segment_ids(&journal).len(), 1);
    power_loss(journal, &factory);

    let (_journal, result) = open(&factory, small_config());
    assert_eq!(bodies(&result), expected(&[(5, &[5u8; 100])]));
}

#[test]
fn unsynced_commit_leaves_transaction_in_doubt() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    for n in 1..=5 {
        journal.append_add(id(n), 0, &[n as u8; 100], Some(true)).unwrap();
    }
    let tx = TransactionId::new(9);
    journal.append_delete_transactional(tx, id(1)).unwrap();
    journal.prepare(tx, b"", Some(true)).unwrap();
    // nothing is reclaimed, so nothing syncs the COMMIT
    journal.commit(tx, Some(false)).unwrap();
    power_loss(journal, &factory);

    let (journal, result) = open(&factory, small_config());
    assert_eq!(result.records.len(), 5);
    assert_eq!(result.prepared.len(), 1);
    assert_eq!(result.prepared[0].id, tx);

    journal.commit(tx, Some(true)).unwrap();
    power_loss(journal, &factory);

    let (_journal, result) = open(&factory, small_config());
    assert_eq!(
        result.records.keys().map(|id| id.as_u64()).collect::<Vec<_>>(),
        vec![2, 3, 4, 5]
    );
    assert!(result.prepared.is_empty());
}

#[test]
fn repeated_updates_do_not_pin_old_segments() {
    let factory = InMemoryFactory::new();
    let (journal, _) = open(&factory, small_config());
    journal.append_add(id(1), 0, &[0u8; 100], Some(true)).unwrap();

    for round in 1..=400u64 {
        journal
            .append_update(id(1), &[round as u8; 100], Some(false))
            .unwrap();
        let churn = id(1000 + round);
        journal.append_add(churn, 0, &[1u8; 100], Some(false)).unwrap();
        journal.append_delete(churn, Some(false)).unwrap();
        assert!(
            segment_ids(&journal).len() <= 4,
            "round {round}: {} data segments",
            segment_ids(&journal).len()
        );
    }
    journal.stop().unwrap();

    let (journal, result) = open(&factory, small_config());
    assert_eq!(bodies(&result), expected(&[(1, &[400u64 as u8; 100])]));
    assert!(segment_ids(&journal).len() <= 4);
}
