//! Transaction tracking.
//!
//! Transactional operations are written to the log immediately but withheld
//! from the live-record index until their COMMIT is written. A transaction
//! moves `Open → Prepared → Committed | RolledBack`, may roll back straight
//! from `Open`, and may commit in one phase from `Open`.

mod state;
mod tracker;

pub use state::{JournalTransaction, TransactionOutcome, TransactionState};
pub use tracker::{Completion, TransactionTracker};
