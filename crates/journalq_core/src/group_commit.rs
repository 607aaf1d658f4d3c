//! Group commit: many writers, few syncs.
//!
//! Every write takes a ticket from a monotonic counter. A writer that needs
//! durability waits until the durable watermark covers its ticket. If no
//! sync is running it becomes the leader and syncs on behalf of everyone
//! queued behind it. Followers just wait for the leader to finish.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct SyncState {
    /// Tickets handed out.
    written: u64,
    /// Every ticket up to here is on stable storage.
    durable: u64,
    /// A leader is syncing.
    syncing: bool,
    /// A sync failed; nothing will become durable again.
    failed: bool,
}

/// Coordinates durability waits across writers.
#[derive(Debug, Default)]
pub(crate) struct GroupCommit {
    state: Mutex<SyncState>,
    synced: Condvar,
}

impl GroupCommit {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a completed (unsynced) write and returns its ticket.
    ///
    /// Callers hold the journal lock, so ticket order is log order.
    pub(crate) fn note_written(&self) -> u64 {
        let mut state = self.state.lock();
        state.written += 1;
        state.written
    }

    /// Highest ticket handed out.
    pub(crate) fn written(&self) -> u64 {
        self.state.lock().written
    }

    /// Whether any write is not yet durable.
    pub(crate) fn has_pending(&self) -> bool {
        let state = self.state.lock();
        !state.failed && state.written > state.durable
    }

    /// Advances the durable watermark after an out-of-band sync
    /// (segment rollover).
    pub(crate) fn mark_durable(&self, upto: u64) {
        let mut state = self.state.lock();
        if upto > state.durable {
            state.durable = upto;
            self.synced.notify_all();
        }
    }

    /// Forgets all tickets and any failure, for a fresh start.
    pub(crate) fn reset(&self) {
        *self.state.lock() = SyncState::default();
    }

    /// Wakes every waiter with `JournalFailed`.
    pub(crate) fn fail(&self) {
        let mut state = self.state.lock();
        state.failed = true;
        self.synced.notify_all();
    }

    /// Blocks until `ticket` is durable.
    ///
    /// `sync` is run by the leader. It must sync everything written so far
    /// and return the ticket watermark it covered.
    ///
    /// # Errors
    ///
    /// Returns the leader's sync error to the leader and `JournalFailed` to
    /// every other waiter once a sync has failed.
    pub(crate) fn await_durable<F>(&self, ticket: u64, sync: F) -> CoreResult<()>
    where
        F: Fn() -> CoreResult<u64>,
    {
        let mut state = self.state.lock();
        loop {
            if state.failed {
                return Err(CoreError::JournalFailed);
            }
            if state.durable >= ticket {
                return Ok(());
            }
            if state.syncing {
                self.synced.wait(&mut state);
                continue;
            }

            state.syncing = true;
            drop(state);
            let result = sync();
            state = self.state.lock();
            state.syncing = false;

            match result {
                Ok(upto) => {
                    state.durable = state.durable.max(upto);
                    self.synced.notify_all();
                }
                Err(e) => {
                    state.failed = true;
                    self.synced.notify_all();
                    return Err(e);
                }
            }
        }
    }
}
