//! Journal facade.
//!
//! [`Journal`] is the single entry point the queue layer talks to. It owns
//! the file manager, the live-record index and the transaction tracker
//! behind one mutex, so validation, the physical write and the index update
//! happen in one total order that matches the order on disk.
//!
//! Durability is decoupled from that order: a writer that asked for `sync`
//! releases the journal lock and waits in the group commit for a single
//! flush that covers everyone queued behind the same leader.

use crate::config::JournalConfig;
use crate::dir::JournalDir;
use crate::error::{CoreError, CoreResult};
use crate::group_commit::GroupCommit;
use crate::id::IdGenerator;
use crate::index::{apply_rollback, counts_live, RecordIndex};
use crate::loader::{self, LoadResult};
use crate::record::JournalRecord;
use crate::segment::{JournalFileManager, RecordPosition, SegmentRecordIterator, SegmentStats};
use crate::transaction::{Completion, TransactionOutcome, TransactionTracker};
use crate::types::{PendingOperation, RecordId, TransactionId};
use journalq_storage::{DirectoryFactory, SequentialFileFactory};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalState {
    /// Files are closed.
    Stopped,
    /// Files are open; the log has not been replayed.
    Started,
    /// Replayed and accepting writes.
    Loaded,
    /// A storage failure occurred; writes are refused until restart.
    Failed,
}

/// Snapshot of journal bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    /// Lifecycle state.
    pub state: JournalState,
    /// Number of live records.
    pub live_records: usize,
    /// Transactions with no COMMIT or ROLLBACK yet.
    pub active_transactions: usize,
    /// Of those, how many are prepared.
    pub prepared_transactions: usize,
    /// Data segments, oldest first.
    pub segments: Vec<SegmentStats>,
    /// Pooled empty segments.
    pub free_segments: usize,
    /// Whether some write has not been synced yet.
    pub pending_sync: bool,
}

/// A segmented, transactional, crash-recoverable append-only journal.
///
/// # Lifecycle
///
/// ```text
/// Stopped -> start() -> Started -> load() -> Loaded -> stop() -> Stopped
/// ```
///
/// Any storage error moves the journal to `Failed`; from then on every
/// write returns [`CoreError::JournalFailed`] until `stop()` and `start()`.
///
/// # Example
///
/// ```rust
/// use journalq_core::{IdGenerator, Journal, JournalConfig};
/// use journalq_storage::InMemoryFactory;
/// use std::sync::Arc;
///
/// let journal = Journal::new(
///     JournalConfig::new().segment_size(64 * 1024),
///     Arc::new(InMemoryFactory::new()),
///     Arc::new(IdGenerator::default()),
/// );
/// journal.start().unwrap();
/// journal.load().unwrap();
///
/// let id = journal.id_generator().next_id();
/// journal.append_add(id, 1, b"hello", Some(true)).unwrap();
/// journal.stop().unwrap();
/// ```
pub struct Journal {
    shared: Arc<Shared>,
    id_generator: Arc<IdGenerator>,
    flusher: Mutex<Option<Flusher>>,
    /// Holds the directory lock. None for journals over a custom factory.
    dir: Option<JournalDir>,
}

struct Shared {
    config: JournalConfig,
    factory: Arc<dyn SequentialFileFactory>,
    inner: Mutex<JournalInner>,
    group: GroupCommit,
}

struct JournalInner {
    state: JournalState,
    files: JournalFileManager,
    index: RecordIndex,
    tracker: TransactionTracker,
}

impl JournalInner {
    fn ensure_loaded(&self) -> CoreResult<()> {
        match self.state {
            JournalState::Loaded => Ok(()),
            JournalState::Failed => Err(CoreError::JournalFailed),
            JournalState::Started => Err(CoreError::invalid_operation(
                "journal has not been loaded",
            )),
            JournalState::Stopped => Err(CoreError::invalid_operation(
                "journal has not been started",
            )),
        }
    }

    /// Writes one record and hands out its durability ticket.
    fn append(&mut self, group: &GroupCommit, record: &JournalRecord) -> CoreResult<RecordPosition> {
        let outcome = self.files.append(&record.encode(), counts_live(record))?;
        if outcome.rolled_over {
            // rollover synced everything written before this record
            group.mark_durable(group.written());
        }
        group.note_written();
        Ok(outcome.position)
    }

    /// Reclaims released segments.
    ///
    /// Reclaiming syncs the active segment first, so a pass that released
    /// anything also made every record written so far durable.
    fn reclaim(&mut self, group: &GroupCommit) -> CoreResult<()> {
        let written = group.written();
        if !self.files.reclaim()?.is_empty() {
            group.mark_durable(written);
        }
        Ok(())
    }

    /// Durably terminates a transaction with `ROLLBACK`.
    fn write_rollback(&mut self, group: &GroupCommit, txid: TransactionId) -> CoreResult<()> {
        let operation_count = self.tracker.get(txid).map_or(0, |tx| tx.operation_count());
        let position = self.append(
            group,
            &JournalRecord::Rollback {
                txid,
                operation_count,
            },
        )?;
        if let Some(tx) = self.tracker.complete(txid, TransactionOutcome::RolledBack) {
            apply_rollback(&mut self.files, &tx, position.segment);
        }
        Ok(())
    }
}

impl Shared {
    /// Runs one write under the journal lock, then waits for durability
    /// outside it if asked.
    fn execute<T, F>(&self, sync: Option<bool>, op: F) -> CoreResult<T>
    where
        F: FnOnce(&mut JournalInner, &GroupCommit) -> CoreResult<T>,
    {
        let sync = sync.unwrap_or(self.config.sync_by_default);
        let mut inner = self.inner.lock();
        inner.ensure_loaded()?;

        let value = match op(&mut *inner, &self.group) {
            Ok(value) => value,
            Err(e) => {
                if e.is_storage() {
                    self.fail(&mut inner, &e);
                }
                return Err(e);
            }
        };
        let ticket = self.group.written();
        drop(inner);

        if sync {
            self.await_durable(ticket)?;
        }
        Ok(value)
    }

    fn await_durable(&self, ticket: u64) -> CoreResult<()> {
        let result = self.group.await_durable(ticket, || self.sync_active());
        if let Err(e) = &result {
            if e.is_storage() {
                let mut inner = self.inner.lock();
                self.fail(&mut inner, e);
            }
        }
        result
    }

    /// Syncs the active segment. Earlier segments were synced at rollover.
    fn sync_active(&self) -> CoreResult<u64> {
        let (file, upto) = {
            let inner = self.inner.lock();
            (inner.files.active_file(), self.group.written())
        };
        if let Some(file) = file {
            file.sync()?;
        }
        Ok(upto)
    }

    fn fail(&self, inner: &mut JournalInner, cause: &CoreError) {
        if inner.state != JournalState::Failed {
            error!(error = %cause, "journal entering failed state, writes refused until restart");
            inner.state = JournalState::Failed;
        }
        self.group.fail();
    }
}

impl Journal {
    /// Creates a stopped journal over `factory`.
    ///
    /// Record ids are drawn by callers from `id_generator`; after
    /// [`Journal::load`] it is seeded above the highest id in the log.
    #[must_use]
    pub fn new(
        config: JournalConfig,
        factory: Arc<dyn SequentialFileFactory>,
        id_generator: Arc<IdGenerator>,
    ) -> Self {
        Self::with_dir(config, factory, id_generator, None)
    }

    /// Creates a stopped journal over a directory, creating it if missing
    /// and taking its exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns `JournalLocked` if another process holds the directory, or
    /// an I/O error.
    pub fn open_dir(path: &Path, config: JournalConfig) -> CoreResult<Self> {
        let dir = JournalDir::open(path, true)?;
        let factory = DirectoryFactory::new(dir.path())?;
        Ok(Self::with_dir(
            config,
            Arc::new(factory),
            Arc::new(IdGenerator::default()),
            Some(dir),
        ))
    }

    fn with_dir(
        config: JournalConfig,
        factory: Arc<dyn SequentialFileFactory>,
        id_generator: Arc<IdGenerator>,
        dir: Option<JournalDir>,
    ) -> Self {
        let inner = JournalInner {
            state: JournalState::Stopped,
            files: JournalFileManager::new(config.clone(), Arc::clone(&factory)),
            index: RecordIndex::new(),
            tracker: TransactionTracker::new(config.completed_transaction_history),
        };
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                inner: Mutex::new(inner),
                group: GroupCommit::new(),
            }),
            id_generator,
            flusher: Mutex::new(None),
            dir,
        }
    }

    /// Opens every segment file and starts the background flusher.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an unusable configuration,
    /// `InvalidOperation` if already started, `InvalidFormat` for a damaged
    /// segment header, or a storage error.
    pub fn start(&self) -> CoreResult<()> {
        let config = &self.shared.config;
        let mut inner = self.shared.inner.lock();
        if inner.state != JournalState::Stopped {
            return Err(CoreError::invalid_operation("journal already started"));
        }
        config.validate()?;

        let mut files = JournalFileManager::new(config.clone(), Arc::clone(&self.shared.factory));
        files.open()?;
        inner.files = files;
        inner.index = RecordIndex::new();
        inner.tracker = TransactionTracker::new(config.completed_transaction_history);
        self.shared.group.reset();
        inner.state = JournalState::Started;
        drop(inner);

        if !config.flush_interval.is_zero() {
            let flusher = Flusher::spawn(Arc::clone(&self.shared), config.flush_interval)?;
            *self.flusher.lock() = Some(flusher);
        }

        info!(
            segment_size = config.segment_size,
            sync_by_default = config.sync_by_default,
            "journal started"
        );
        Ok(())
    }

    /// Replays the log and makes the journal writable.
    ///
    /// Transactions that were never prepared are rolled back durably before
    /// this returns; prepared ones are reported for the caller to resolve.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRecord` for damage outside the newest segment's tail,
    /// `Inconsistent` for a log no valid history could produce, or a storage
    /// error. A failed load leaves the journal `Failed`.
    pub fn load(&self) -> CoreResult<LoadResult> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        match inner.state {
            JournalState::Started => {}
            JournalState::Loaded => {
                return Err(CoreError::invalid_operation("journal already loaded"))
            }
            JournalState::Failed => return Err(CoreError::JournalFailed),
            JournalState::Stopped => {
                return Err(CoreError::invalid_operation("journal has not been started"))
            }
        }

        match self.replay(&mut inner) {
            Ok(result) => {
                inner.state = JournalState::Loaded;
                info!(
                    records = result.records.len(),
                    prepared = result.prepared.len(),
                    incomplete = result.incomplete.len(),
                    segments = result.segments.len(),
                    records_read = result.records_read,
                    "journal loaded"
                );
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, "journal load failed");
                shared.fail(&mut inner, &e);
                Err(e)
            }
        }
    }

    fn replay(&self, inner: &mut JournalInner) -> CoreResult<LoadResult> {
        let shared = &self.shared;
        let replayed = loader::replay(&mut inner.files, shared.config.completed_transaction_history)?;
        inner.index = replayed.index;
        inner.tracker = replayed.tracker;
        let mut result = replayed.result;

        for &txid in &result.incomplete {
            warn!(%txid, "rolling back transaction that was never prepared");
            inner.write_rollback(&shared.group, txid)?;
        }
        if shared.group.has_pending() {
            if let Some(file) = inner.files.active_file() {
                file.sync()?;
            }
            shared.group.mark_durable(shared.group.written());
        }

        inner.reclaim(&shared.group)?;
        if let Some(dir) = &self.dir {
            dir.sync()?;
        }
        if let Some(max) = result.max_record_id {
            self.id_generator.seed_above(max);
        }
        result.segments = inner.files.stats();
        Ok(result)
    }

    /// Stops the flusher, syncs and closes every segment.
    ///
    /// Stopping a stopped journal is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the final sync or close fails; the
    /// journal is stopped either way.
    pub fn stop(&self) -> CoreResult<()> {
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.stop();
        }

        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if inner.state == JournalState::Stopped {
            return Ok(());
        }
        let was_failed = inner.state == JournalState::Failed;
        inner.state = JournalState::Stopped;
        inner.index = RecordIndex::new();

        let result = inner.files.close();
        if result.is_ok() && !was_failed {
            shared.group.mark_durable(shared.group.written());
        }
        drop(inner);

        result?;
        if let Some(dir) = &self.dir {
            dir.sync()?;
        }
        info!("journal stopped");
        Ok(())
    }

    /// Appends an ADD of `id`.
    ///
    /// `sync` of `None` uses the configured default.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if `id` is live or reserved by an open
    /// transaction, `RecordTooLarge` if the record cannot fit in a segment,
    /// `JournalFailed` after a storage failure, or a storage error.
    pub fn append_add(
        &self,
        id: RecordId,
        user_record_type: u8,
        body: &[u8],
        sync: Option<bool>,
    ) -> CoreResult<()> {
        let op = PendingOperation::Add {
            id,
            user_record_type,
            body: body.to_vec(),
        };
        self.shared.execute(sync, |inner, group| {
            inner.tracker.check_operation(&op, &inner.index)?;
            let record = JournalRecord::Add {
                id,
                user_record_type,
                body: body.to_vec(),
                txid: None,
            };
            let position = inner.append(group, &record)?;
            inner.index.apply_add(id, user_record_type, body, position)
        })
    }

    /// Appends an UPDATE replacing `id`'s body and reclaims any segment
    /// the superseded UPDATE frees.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRecord` if `id` is not live, plus the errors of
    /// [`Journal::append_add`].
    pub fn append_update(&self, id: RecordId, body: &[u8], sync: Option<bool>) -> CoreResult<()> {
        let op = PendingOperation::Update {
            id,
            body: body.to_vec(),
        };
        self.shared.execute(sync, |inner, group| {
            inner.tracker.check_operation(&op, &inner.index)?;
            let record = JournalRecord::Update {
                id,
                body: body.to_vec(),
                txid: None,
            };
            let position = inner.append(group, &record)?;
            inner.index.apply_update(&mut inner.files, id, body, position);
            inner.reclaim(group)?;
            Ok(())
        })
    }

    /// Appends a DELETE of `id` and reclaims any segment that frees.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRecord` if `id` is not live, plus the errors of
    /// [`Journal::append_add`].
    pub fn append_delete(&self, id: RecordId, sync: Option<bool>) -> CoreResult<()> {
        let op = PendingOperation::Delete { id };
        self.shared.execute(sync, |inner, group| {
            inner.tracker.check_operation(&op, &inner.index)?;
            let position = inner.append(group, &JournalRecord::Delete { id, txid: None })?;
            inner.index.apply_delete(&mut inner.files, id, position.segment);
            inner.reclaim(group)?;
            Ok(())
        })
    }

    /// Appends an ADD under `txid`, withheld until commit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the transaction is prepared, plus the
    /// errors of [`Journal::append_add`].
    pub fn append_add_transactional(
        &self,
        txid: TransactionId,
        id: RecordId,
        user_record_type: u8,
        body: &[u8],
    ) -> CoreResult<()> {
        self.append_transactional(
            txid,
            PendingOperation::Add {
                id,
                user_record_type,
                body: body.to_vec(),
            },
        )
    }

    /// Appends an UPDATE under `txid`, withheld until commit.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRecord` if `id` is neither live nor pending-added by
    /// this transaction, plus the errors of
    /// [`Journal::append_add_transactional`].
    pub fn append_update_transactional(
        &self,
        txid: TransactionId,
        id: RecordId,
        body: &[u8],
    ) -> CoreResult<()> {
        self.append_transactional(
            txid,
            PendingOperation::Update {
                id,
                body: body.to_vec(),
            },
        )
    }

    /// Appends a DELETE under `txid`, withheld until commit.
    ///
    /// # Errors
    ///
    /// As [`Journal::append_update_transactional`].
    pub fn append_delete_transactional(&self, txid: TransactionId, id: RecordId) -> CoreResult<()> {
        self.append_transactional(txid, PendingOperation::Delete { id })
    }

    /// Transactional operations are never synced on their own; the
    /// PREPARE or COMMIT that follows covers them.
    fn append_transactional(&self, txid: TransactionId, op: PendingOperation) -> CoreResult<()> {
        self.shared.execute(Some(false), |inner, group| {
            inner.tracker.check_transactional(txid, &op, &inner.index)?;
            let record = JournalRecord::from_operation(&op, txid);
            let position = inner.append(group, &record)?;
            inner.tracker.record_operation(txid, op, position)
        })
    }

    /// Appends a PREPARE carrying `data` (typically an XA branch id).
    ///
    /// # Errors
    ///
    /// Returns `UnknownTransaction` if `txid` has no operations,
    /// `InvalidOperation` if it is already prepared or terminated, plus
    /// storage errors.
    pub fn prepare(&self, txid: TransactionId, data: &[u8], sync: Option<bool>) -> CoreResult<()> {
        self.shared.execute(sync, |inner, group| {
            inner.tracker.check_prepare(txid)?;
            let operation_count = inner.tracker.get(txid).map_or(0, |tx| tx.operation_count());
            let record = JournalRecord::Prepare {
                txid,
                operation_count,
                data: data.to_vec(),
            };
            let position = inner.append(group, &record)?;
            inner.tracker.mark_prepared(txid, position, data.to_vec())
        })
    }

    /// Appends a COMMIT and applies the transaction's operations in order.
    ///
    /// Committing an already committed transaction is a no-op (still
    /// waiting for durability if asked).
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the transaction was rolled back,
    /// `UnknownTransaction` if it is neither active nor remembered, plus
    /// storage errors.
    pub fn commit(&self, txid: TransactionId, sync: Option<bool>) -> CoreResult<()> {
        self.shared.execute(sync, |inner, group| {
            if inner.tracker.check_completion(txid, TransactionOutcome::Committed)?
                == Completion::AlreadyDone
            {
                debug!(%txid, "transaction already committed");
                return Ok(());
            }
            let operation_count = inner.tracker.get(txid).map_or(0, |tx| tx.operation_count());
            let position = inner.append(
                group,
                &JournalRecord::Commit {
                    txid,
                    operation_count,
                },
            )?;
            let tx = inner
                .tracker
                .complete(txid, TransactionOutcome::Committed)
                .ok_or(CoreError::UnknownTransaction { id: txid })?;
            inner
                .index
                .apply_commit(&mut inner.files, &tx, position.segment)?;
            inner.reclaim(group)?;
            Ok(())
        })
    }

    /// Appends a ROLLBACK and discards the transaction's operations.
    ///
    /// Rolling back an already rolled-back transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the transaction was committed,
    /// `UnknownTransaction` if it is neither active nor remembered, plus
    /// storage errors.
    pub fn rollback(&self, txid: TransactionId, sync: Option<bool>) -> CoreResult<()> {
        self.shared.execute(sync, |inner, group| {
            if inner.tracker.check_completion(txid, TransactionOutcome::RolledBack)?
                == Completion::AlreadyDone
            {
                debug!(%txid, "transaction already rolled back");
                return Ok(());
            }
            inner.write_rollback(group, txid)?;
            inner.reclaim(group)?;
            Ok(())
        })
    }

    /// Visits every record in log order until `visit` returns `false`.
    ///
    /// Segments are pinned for the duration, so reclamation defers them
    /// instead of recycling them under the scan. Appends continue
    /// concurrently; records written after the scan reached a segment's end
    /// are not visited.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` on a stopped journal, `CorruptRecord` if
    /// a record fails to decode, or a storage error.
    pub fn scan<F>(&self, mut visit: F) -> CoreResult<()>
    where
        F: FnMut(RecordPosition, &JournalRecord) -> bool,
    {
        let pinned = {
            let inner = self.shared.inner.lock();
            if inner.state == JournalState::Stopped {
                return Err(CoreError::invalid_operation("journal has not been started"));
            }
            inner.files.pin_segments()
        };

        for segment in &pinned {
            for item in SegmentRecordIterator::new(Arc::clone(&segment.file), segment.id)? {
                let (offset, record) = item?;
                let position = RecordPosition {
                    segment: segment.id,
                    offset,
                };
                if !visit(position, &record) {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Returns a bookkeeping snapshot.
    #[must_use]
    pub fn stats(&self) -> JournalStats {
        let inner = self.shared.inner.lock();
        JournalStats {
            state: inner.state,
            live_records: inner.index.len(),
            active_transactions: inner.tracker.active_count(),
            prepared_transactions: inner.tracker.prepared().len(),
            segments: inner.files.stats(),
            free_segments: inner.files.free_segments(),
            pending_sync: self.shared.group.has_pending(),
        }
    }

    /// The generator callers draw record ids from.
    #[must_use]
    pub fn id_generator(&self) -> &Arc<IdGenerator> {
        &self.id_generator
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> JournalState {
        self.shared.inner.lock().state
    }

    /// Whether a storage failure has made the journal refuse writes.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state() == JournalState::Failed
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("state", &self.state())
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        // No final sync: dropping without stop() behaves like a crash.
        if let Some(flusher) = self.flusher.get_mut().take() {
            flusher.stop();
        }
    }
}

/// Background thread syncing buffered writes every `flush_interval`.
struct Flusher {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> CoreResult<Self> {
        let (shutdown, signal) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("journalq-flusher".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !shared.group.has_pending() {
                            continue;
                        }
                        let ticket = shared.group.written();
                        if let Err(e) = shared.await_durable(ticket) {
                            debug!(error = %e, "background flush failed");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self { shutdown, handle })
    }

    fn stop(self) {
        drop(self.shutdown);
        if self.handle.join().is_err() {
            warn!("flusher thread panicked");
        }
    }
}
