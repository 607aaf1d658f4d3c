//! Verify command: read-only integrity check of every segment.

use super::{open_segments, CliError, CliResult, SegmentFile};
use journalq_core::{CoreError, JournalConfig, SEGMENT_HEADER_SIZE};
use std::path::Path;
use tracing::{info, warn};

/// Outcome of checking one directory.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Verification {
    /// Data segments checked.
    pub data_segments: usize,
    /// Header-only files.
    pub free_segments: usize,
    /// Records that decoded cleanly.
    pub records: u64,
    /// Problems a load would tolerate.
    pub warnings: Vec<String>,
    /// Problems a load would refuse.
    pub errors: Vec<String>,
}

/// Runs the verify command.
pub fn run(path: &Path, config: &JournalConfig) -> CliResult<()> {
    println!("Verifying journal at {}", path.display());

    let result = verify(path, config)?;

    println!(
        "  {} data segment(s), {} free, {} record(s)",
        result.data_segments, result.free_segments, result.records
    );
    for warning in &result.warnings {
        warn!("{warning}");
    }
    for error in &result.errors {
        println!("  ERROR: {error}");
    }

    if result.errors.is_empty() {
        info!("verification passed");
        println!("OK");
        Ok(())
    } else {
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

/// Checks every segment without modifying anything.
///
/// A bad record in the newest data segment is a torn tail and only a
/// warning; anywhere else it is an error.
pub fn verify(path: &Path, config: &JournalConfig) -> CliResult<Verification> {
    let segments = open_segments(path, config)?;
    let newest = segments
        .iter()
        .filter(|s| s.size > SEGMENT_HEADER_SIZE)
        .map(|s| s.name_id)
        .next_back();
    let mut result = Verification::default();

    for segment in &segments {
        if segment.size < SEGMENT_HEADER_SIZE {
            result.free_segments += 1;
            result.warnings.push(format!(
                "{}: torn header, reinitialized on next load",
                segment.name
            ));
            continue;
        }

        let header = match segment.header() {
            Ok(header) => header,
            Err(e) => {
                result.errors.push(format!("{}: {e}", segment.name));
                continue;
            }
        };
        if segment.is_free() {
            result.free_segments += 1;
            continue;
        }

        result.data_segments += 1;
        if header.segment_id != segment.name_id {
            result.errors.push(format!(
                "{}: header names segment {}",
                segment.name, header.segment_id
            ));
            continue;
        }

        let is_newest = Some(segment.name_id) == newest;
        check_records(segment, is_newest, &mut result)?;
    }

    Ok(result)
}

fn check_records(
    segment: &SegmentFile,
    is_newest: bool,
    result: &mut Verification,
) -> CliResult<()> {
    for item in segment.records()? {
        match item {
            Ok(_) => result.records += 1,
            Err(CoreError::CorruptRecord {
                offset, message, ..
            }) => {
                let problem = format!("{} at offset {offset}: {message}", segment.name);
                if is_newest {
                    result.warnings.push(format!("torn tail in {problem}"));
                } else {
                    result.errors.push(problem);
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
