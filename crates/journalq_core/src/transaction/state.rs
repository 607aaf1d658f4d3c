//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::segment::RecordPosition;
use crate::types::{PendingOperation, PreparedTransaction, RecordId, SegmentId, TransactionId};
use std::collections::{BTreeSet, HashSet};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting operations.
    Open,
    /// Durably prepared; waiting for commit or rollback.
    Prepared,
    /// Operations applied.
    Committed,
    /// Operations discarded.
    RolledBack,
}

/// How a terminated transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

impl TransactionOutcome {
    pub(crate) fn state(self) -> TransactionState {
        match self {
            Self::Committed => TransactionState::Committed,
            Self::RolledBack => TransactionState::RolledBack,
        }
    }
}

/// A transaction whose operations are in the log but withheld from the
/// live-record index.
#[derive(Debug)]
pub struct JournalTransaction {
    id: TransactionId,
    state: TransactionState,
    /// Operations in append order, with where each was written.
    operations: Vec<(PendingOperation, RecordPosition)>,
    prepare: Option<(RecordPosition, Vec<u8>)>,
    pending_adds: HashSet<RecordId>,
    pending_deletes: HashSet<RecordId>,
}

impl JournalTransaction {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Open,
            operations: Vec::new(),
            prepare: None,
            pending_adds: HashSet::new(),
            pending_deletes: HashSet::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of operations appended so far.
    #[must_use]
    pub fn operation_count(&self) -> u64 {
        self.operations.len() as u64
    }

    /// Operations with their log positions, in append order.
    pub(crate) fn operations(&self) -> &[(PendingOperation, RecordPosition)] {
        &self.operations
    }

    /// Position of the PREPARE record, if prepared.
    pub(crate) fn prepare_position(&self) -> Option<RecordPosition> {
        self.prepare.as_ref().map(|(pos, _)| *pos)
    }

    /// Every segment holding a record of this transaction.
    pub(crate) fn touched_segments(&self) -> BTreeSet<SegmentId> {
        self.operations
            .iter()
            .map(|(_, pos)| pos.segment)
            .chain(self.prepare_position().map(|pos| pos.segment))
            .collect()
    }

    /// Whether `id` is visible to this transaction's UPDATE or DELETE.
    ///
    /// `live` says whether the id is in the committed index.
    pub(crate) fn sees(&self, id: RecordId, live: bool) -> bool {
        !self.pending_deletes.contains(&id) && (live || self.pending_adds.contains(&id))
    }

    pub(crate) fn pending_adds(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.pending_adds.iter().copied()
    }

    pub(crate) fn push(&mut self, op: PendingOperation, position: RecordPosition) -> CoreResult<()> {
        self.ensure_open()?;
        match &op {
            PendingOperation::Add { id, .. } => {
                self.pending_adds.insert(*id);
            }
            PendingOperation::Delete { id } => {
                self.pending_deletes.insert(*id);
            }
            PendingOperation::Update { .. } => {}
        }
        self.operations.push((op, position));
        Ok(())
    }

    pub(crate) fn mark_prepared(&mut self, position: RecordPosition, data: Vec<u8>) -> CoreResult<()> {
        self.ensure_open()?;
        self.state = TransactionState::Prepared;
        self.prepare = Some((position, data));
        Ok(())
    }

    pub(crate) fn finish(&mut self, outcome: TransactionOutcome) {
        self.state = outcome.state();
    }

    /// The in-doubt view reported by load.
    #[must_use]
    pub fn to_prepared(&self) -> PreparedTransaction {
        PreparedTransaction {
            id: self.id,
            data: self
                .prepare
                .as_ref()
                .map(|(_, data)| data.clone())
                .unwrap_or_default(),
            operations: self.operations.iter().map(|(op, _)| op.clone()).collect(),
        }
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Open => Ok(()),
            TransactionState::Prepared => Err(CoreError::invalid_operation(format!(
                "{} is prepared and accepts no further operations",
                self.id
            ))),
            TransactionState::Committed | TransactionState::RolledBack => Err(
                CoreError::invalid_operation(format!("{} has already terminated", self.id)),
            ),
        }
    }
}
