//! Inspect command: load a journal and report on it.

use super::{format_size, CliError, CliResult, OutputFormat};
use journalq_core::{Journal, JournalConfig, JournalStats, LoadResult, SegmentStats};
use serde::Serialize;
use std::path::Path;

/// Report produced by `inspect`.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Journal directory.
    pub path: String,
    /// Live records after replay.
    pub live_records: usize,
    /// Records decoded during replay.
    pub records_read: u64,
    /// Highest record id seen.
    pub max_record_id: Option<u64>,
    /// Data segments, oldest first.
    pub segments: Vec<SegmentStats>,
    /// Header-only files waiting for reuse.
    pub free_segments: usize,
    /// Prepared transactions awaiting a decision.
    pub prepared: Vec<PreparedSummary>,
    /// Transactions rolled back because they were never prepared.
    pub rolled_back: Vec<u64>,
    /// Where a torn tail was cut off.
    pub torn_tail: Option<TornTail>,
}

/// An in-doubt transaction.
#[derive(Debug, Serialize)]
pub struct PreparedSummary {
    /// Transaction id.
    pub txid: u64,
    /// Withheld operations.
    pub operations: usize,
    /// Size of the prepare data.
    pub data_len: usize,
}

/// Location of a truncated tail.
#[derive(Debug, Serialize)]
pub struct TornTail {
    /// Segment id.
    pub segment: u64,
    /// Offset the segment was cut back to.
    pub offset: u64,
}

/// Runs the inspect command.
///
/// This performs a full load, so a torn tail is truncated and incomplete
/// transactions get a ROLLBACK record, exactly as on a normal restart.
pub fn run(path: &Path, config: JournalConfig, format: OutputFormat) -> CliResult<()> {
    if !path.is_dir() {
        return Err(CliError::MissingDirectory(path.to_path_buf()));
    }

    let journal = Journal::open_dir(path, config)?;
    journal.start()?;
    let result = journal.load()?;
    let stats = journal.stats();
    journal.stop()?;

    let report = build_report(path, &result, &stats);
    match format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn build_report(path: &Path, result: &LoadResult, stats: &JournalStats) -> InspectReport {
    InspectReport {
        path: path.display().to_string(),
        live_records: result.records.len(),
        records_read: result.records_read,
        max_record_id: result.max_record_id.map(|id| id.as_u64()),
        segments: stats.segments.clone(),
        free_segments: stats.free_segments,
        prepared: result
            .prepared
            .iter()
            .map(|tx| PreparedSummary {
                txid: tx.id.as_u64(),
                operations: tx.operations.len(),
                data_len: tx.data.len(),
            })
            .collect(),
        rolled_back: result.incomplete.iter().map(|tx| tx.as_u64()).collect(),
        torn_tail: result.torn_tail.map(|position| TornTail {
            segment: position.segment.as_u64(),
            offset: position.offset,
        }),
    }
}

fn print_text(report: &InspectReport) {
    println!("Journal: {}", report.path);
    println!();
    println!("Records");
    println!("  Live:           {}", report.live_records);
    println!("  Replayed:       {}", report.records_read);
    match report.max_record_id {
        Some(id) => println!("  Max record id:  {id}"),
        None => println!("  Max record id:  -"),
    }
    println!();

    let total: u64 = report.segments.iter().map(|s| s.size).sum();
    println!(
        "Segments ({} data, {} free, {})",
        report.segments.len(),
        report.free_segments,
        format_size(total)
    );
    for segment in &report.segments {
        let refs: Vec<String> = segment.references.iter().map(ToString::to_string).collect();
        println!(
            "  {:<36} {:>10}  live {:>6}/{:<6} {:?}{}",
            segment.file_name,
            format_size(segment.size),
            segment.live,
            segment.total,
            segment.state,
            if refs.is_empty() {
                String::new()
            } else {
                format!("  refs [{}]", refs.join(", "))
            }
        );
    }

    if !report.prepared.is_empty() {
        println!();
        println!("Prepared transactions (in doubt)");
        for tx in &report.prepared {
            println!(
                "  tx {:<10} {} operation(s), {} byte(s) of prepare data",
                tx.txid, tx.operations, tx.data_len
            );
        }
    }

    if !report.rolled_back.is_empty() {
        println!();
        println!("Rolled back at load: {:?}", report.rolled_back);
    }

    if let Some(tail) = &report.torn_tail {
        println!();
        println!(
            "Torn tail truncated: segment {} at offset {}",
            tail.segment, tail.offset
        );
    }
}
