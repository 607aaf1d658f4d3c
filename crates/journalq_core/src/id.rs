//! Record id generation.

use crate::types::RecordId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out record ids for callers of the journal.
///
/// The journal itself never invents ids: callers draw them from a generator
/// they pass in at construction. After a load the journal seeds the
/// generator above the highest id found in the log, so ids stay unique
/// across restarts.
///
/// Ids are monotonic within a process and safe to draw from many threads.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdGenerator {
    /// Creates a generator whose first id is `first`.
    #[must_use]
    pub const fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Returns a fresh id.
    pub fn next_id(&self) -> RecordId {
        RecordId::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the id the next call to [`IdGenerator::next_id`] will hand out.
    #[must_use]
    pub fn peek(&self) -> RecordId {
        RecordId::new(self.next.load(Ordering::SeqCst))
    }

    /// Ensures every future id is strictly greater than `seen`.
    ///
    /// Never moves the generator backwards.
    pub fn seed_above(&self, seen: RecordId) {
        self.next
            .fetch_max(seen.as_u64().saturating_add(1), Ordering::SeqCst);
    }
}
