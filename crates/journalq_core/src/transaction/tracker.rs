//! Transaction tracker.

use crate::error::{CoreError, CoreResult};
use crate::index::RecordIndex;
use crate::segment::RecordPosition;
use crate::transaction::state::{JournalTransaction, TransactionOutcome, TransactionState};
use crate::types::{PendingOperation, PreparedTransaction, RecordId, TransactionId};
use std::collections::{HashMap, VecDeque};

/// What a commit or rollback request should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The transaction is unterminated; write the terminator and apply it.
    Apply,
    /// The transaction already ended this way; nothing to do.
    AlreadyDone,
}

/// Tracks every unterminated transaction and a bounded history of
/// terminated ones.
///
/// Open transactions reserve the ids of their pending ADDs so two
/// transactions can never both add the same id.
#[derive(Debug)]
pub struct TransactionTracker {
    active: HashMap<TransactionId, JournalTransaction>,
    reserved_adds: HashMap<RecordId, TransactionId>,
    completed: HashMap<TransactionId, TransactionOutcome>,
    completed_order: VecDeque<TransactionId>,
    history_limit: usize,
}

impl TransactionTracker {
    /// Creates a tracker remembering up to `history_limit` terminated
    /// transactions.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self {
            active: HashMap::new(),
            reserved_adds: HashMap::new(),
            completed: HashMap::new(),
            completed_order: VecDeque::new(),
            history_limit,
        }
    }

    /// Returns an unterminated transaction.
    #[must_use]
    pub fn get(&self, txid: TransactionId) -> Option<&JournalTransaction> {
        self.active.get(&txid)
    }

    /// Number of unterminated transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Prepared transactions awaiting resolution, by id.
    #[must_use]
    pub fn prepared(&self) -> Vec<PreparedTransaction> {
        let mut prepared: Vec<_> = self
            .active
            .values()
            .filter(|tx| tx.state() == TransactionState::Prepared)
            .map(JournalTransaction::to_prepared)
            .collect();
        prepared.sort_by_key(|tx| tx.id);
        prepared
    }

    /// Ids of transactions that are still open (never prepared), sorted.
    #[must_use]
    pub fn open_ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self
            .active
            .values()
            .filter(|tx| tx.state() == TransactionState::Open)
            .map(JournalTransaction::id)
            .collect();
        ids.sort();
        ids
    }

    /// How a terminated transaction ended, if still remembered.
    #[must_use]
    pub fn outcome(&self, txid: TransactionId) -> Option<TransactionOutcome> {
        self.completed.get(&txid).copied()
    }

    /// Validates a non-transactional operation against the index and the
    /// ids reserved by open transactions.
    ///
    /// # Errors
    ///
    /// `DuplicateId` for an ADD of a live or reserved id, `UnknownRecord`
    /// for an UPDATE or DELETE of an id that is not live.
    pub fn check_operation(&self, op: &PendingOperation, index: &RecordIndex) -> CoreResult<()> {
        let id = op.record_id();
        match op {
            PendingOperation::Add { .. } => {
                if index.contains(id) || self.reserved_adds.contains_key(&id) {
                    return Err(CoreError::DuplicateId { id });
                }
            }
            PendingOperation::Update { .. } | PendingOperation::Delete { .. } => {
                if !index.contains(id) {
                    return Err(CoreError::UnknownRecord { id });
                }
            }
        }
        Ok(())
    }

    /// Validates an operation under `txid`.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the transaction is prepared, `DuplicateId` for
    /// an ADD of a live or reserved id, and `UnknownRecord` for an UPDATE
    /// or DELETE of an id the transaction cannot see.
    pub fn check_transactional(
        &self,
        txid: TransactionId,
        op: &PendingOperation,
        index: &RecordIndex,
    ) -> CoreResult<()> {
        let tx = self.active.get(&txid);
        if let Some(tx) = tx {
            tx.ensure_open()?;
        }

        let id = op.record_id();
        match op {
            PendingOperation::Add { .. } => {
                if index.contains(id) || self.reserved_adds.contains_key(&id) {
                    return Err(CoreError::DuplicateId { id });
                }
            }
            PendingOperation::Update { .. } | PendingOperation::Delete { .. } => {
                let live = index.contains(id);
                let visible = tx.map_or(live, |tx| tx.sees(id, live));
                if !visible {
                    return Err(CoreError::UnknownRecord { id });
                }
            }
        }
        Ok(())
    }

    /// Records an operation written at `position`, creating the
    /// transaction on its first operation.
    ///
    /// Reusing the id of a remembered terminated transaction starts a new
    /// transaction and forgets the old outcome.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the transaction is prepared.
    pub fn record_operation(
        &mut self,
        txid: TransactionId,
        op: PendingOperation,
        position: RecordPosition,
    ) -> CoreResult<()> {
        if !self.active.contains_key(&txid) && self.completed.remove(&txid).is_some() {
            self.completed_order.retain(|id| *id != txid);
        }
        let tx = self
            .active
            .entry(txid)
            .or_insert_with(|| JournalTransaction::new(txid));

        let add_id = match &op {
            PendingOperation::Add { id, .. } => Some(*id),
            _ => None,
        };
        tx.push(op, position)?;
        if let Some(id) = add_id {
            self.reserved_adds.insert(id, txid);
        }
        Ok(())
    }

    /// Validates a prepare request.
    ///
    /// # Errors
    ///
    /// `UnknownTransaction` if no such transaction is open,
    /// `InvalidOperation` if it is already prepared or terminated.
    pub fn check_prepare(&self, txid: TransactionId) -> CoreResult<()> {
        match self.active.get(&txid) {
            Some(tx) => tx.ensure_open(),
            None if self.completed.contains_key(&txid) => Err(CoreError::invalid_operation(
                format!("{txid} has already terminated"),
            )),
            None => Err(CoreError::UnknownTransaction { id: txid }),
        }
    }

    /// Marks a transaction prepared, creating it if replay saw no
    /// operations for it.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if it is already prepared.
    pub fn mark_prepared(
        &mut self,
        txid: TransactionId,
        position: RecordPosition,
        data: Vec<u8>,
    ) -> CoreResult<()> {
        self.active
            .entry(txid)
            .or_insert_with(|| JournalTransaction::new(txid))
            .mark_prepared(position, data)
    }

    /// Decides what a commit or rollback request should do.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if the transaction already ended the other way,
    /// `UnknownTransaction` if it is neither active nor remembered.
    pub fn check_completion(
        &self,
        txid: TransactionId,
        outcome: TransactionOutcome,
    ) -> CoreResult<Completion> {
        if self.active.contains_key(&txid) {
            return Ok(Completion::Apply);
        }
        match self.completed.get(&txid) {
            Some(done) if *done == outcome => Ok(Completion::AlreadyDone),
            Some(done) => Err(CoreError::invalid_operation(format!(
                "{txid} already {}",
                match done {
                    TransactionOutcome::Committed => "committed",
                    TransactionOutcome::RolledBack => "rolled back",
                }
            ))),
            None => Err(CoreError::UnknownTransaction { id: txid }),
        }
    }

    /// Terminates a transaction, releasing its reservations and
    /// remembering the outcome.
    ///
    /// Returns `None` if the transaction is not active.
    pub fn complete(
        &mut self,
        txid: TransactionId,
        outcome: TransactionOutcome,
    ) -> Option<JournalTransaction> {
        let mut tx = self.active.remove(&txid)?;
        for id in tx.pending_adds() {
            if self.reserved_adds.get(&id) == Some(&txid) {
                self.reserved_adds.remove(&id);
            }
        }
        tx.finish(outcome);
        self.remember(txid, outcome);
        Some(tx)
    }

    /// Remembers a terminated transaction without an active entry, as seen
    /// by replay.
    pub fn remember(&mut self, txid: TransactionId, outcome: TransactionOutcome) {
        if self.history_limit == 0 {
            return;
        }
        if self.completed.insert(txid, outcome).is_none() {
            self.completed_order.push_back(txid);
        }
        while self.completed_order.len() > self.history_limit {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }
}
