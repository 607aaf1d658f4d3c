//! Benchmark utilities.

use journalq_core::{IdGenerator, Journal, JournalConfig, RecordId};
use journalq_storage::InMemoryFactory;
use std::sync::Arc;
use std::time::Duration;

/// Deterministic payload of the given size.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Configuration used across benchmarks: 1 MB segments, no background
/// flusher.
pub fn bench_config() -> JournalConfig {
    JournalConfig::new()
        .segment_size(1024 * 1024)
        .min_free_segments(2)
        .max_free_segments(4)
        .flush_interval(Duration::ZERO)
}

/// Starts and loads a journal over `factory`.
pub fn open_in_memory(factory: &InMemoryFactory) -> Journal {
    let journal = Journal::new(
        bench_config(),
        Arc::new(factory.clone()),
        Arc::new(IdGenerator::default()),
    );
    journal.start().unwrap();
    journal.load().unwrap();
    journal
}

/// Fills a journal with `count` live records of `size` bytes, leaving it
/// stopped so it can be replayed.
pub fn populate(factory: &InMemoryFactory, count: u64, size: usize) {
    let journal = open_in_memory(factory);
    let body = payload(size);
    for n in 1..=count {
        journal
            .append_add(RecordId::new(n), 0, &body, Some(false))
            .unwrap();
    }
    journal.stop().unwrap();
}
