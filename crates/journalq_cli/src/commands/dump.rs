//! Dump command: print decoded records.

use super::{open_segments, CliResult, OutputFormat};
use journalq_core::{CoreError, JournalConfig, JournalRecord, RecordType};
use serde::Serialize;
use std::path::Path;

/// One decoded record.
#[derive(Debug, Serialize)]
pub struct DumpRecord {
    /// Segment id.
    pub segment: u64,
    /// Offset within the segment.
    pub offset: u64,
    /// Record kind, e.g. `ADD_TX`.
    pub kind: &'static str,
    /// Record id, for data records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Transaction id, for transactional records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<u64>,
    /// User record type, for adds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_record_type: Option<u8>,
    /// Body length (prepare data for PREPARE).
    pub body_len: usize,
    /// Operation count carried by PREPARE, COMMIT and ROLLBACK.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_count: Option<u64>,
}

impl DumpRecord {
    fn new(segment: u64, offset: u64, record: &JournalRecord) -> Self {
        let (user_record_type, body_len, operation_count) = match record {
            JournalRecord::Add {
                user_record_type,
                body,
                ..
            } => (Some(*user_record_type), body.len(), None),
            JournalRecord::Update { body, .. } => (None, body.len(), None),
            JournalRecord::Delete { .. } => (None, 0, None),
            JournalRecord::Prepare {
                operation_count,
                data,
                ..
            } => (None, data.len(), Some(*operation_count)),
            JournalRecord::Commit {
                operation_count, ..
            }
            | JournalRecord::Rollback {
                operation_count, ..
            } => (None, 0, Some(*operation_count)),
        };

        Self {
            segment,
            offset,
            kind: kind_label(record.record_type()),
            id: record.record_id().map(|id| id.as_u64()),
            txid: record.txid().map(|tx| tx.as_u64()),
            user_record_type,
            body_len,
            operation_count,
        }
    }
}

fn kind_label(kind: RecordType) -> &'static str {
    match kind {
        RecordType::Add => "ADD",
        RecordType::Update => "UPDATE",
        RecordType::Delete => "DELETE",
        RecordType::AddTx => "ADD_TX",
        RecordType::UpdateTx => "UPDATE_TX",
        RecordType::DeleteTx => "DELETE_TX",
        RecordType::Prepare => "PREPARE",
        RecordType::Commit => "COMMIT",
        RecordType::Rollback => "ROLLBACK",
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    config: &JournalConfig,
    segment: Option<u64>,
    limit: Option<usize>,
    format: OutputFormat,
) -> CliResult<()> {
    let records = collect(path, config, segment, limit)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&records)?),
        OutputFormat::Text => {
            for r in &records {
                let mut line = format!("{:>6}:{:<10} {:<10}", r.segment, r.offset, r.kind);
                if let Some(id) = r.id {
                    line.push_str(&format!(" id={id}"));
                }
                if let Some(txid) = r.txid {
                    line.push_str(&format!(" tx={txid}"));
                }
                if let Some(ut) = r.user_record_type {
                    line.push_str(&format!(" type={ut}"));
                }
                if let Some(count) = r.operation_count {
                    line.push_str(&format!(" ops={count}"));
                }
                if r.body_len > 0 {
                    line.push_str(&format!(" len={}", r.body_len));
                }
                println!("{line}");
            }
            println!("{} record(s)", records.len());
        }
    }
    Ok(())
}

/// Decodes records from the data segments, stopping at the first bad
/// record of each segment.
pub fn collect(
    path: &Path,
    config: &JournalConfig,
    segment: Option<u64>,
    limit: Option<usize>,
) -> CliResult<Vec<DumpRecord>> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();

    for file in open_segments(path, config)? {
        if file.is_free() || segment.is_some_and(|id| id != file.name_id.as_u64()) {
            continue;
        }
        for item in file.records()? {
            if records.len() >= limit {
                return Ok(records);
            }
            match item {
                Ok((offset, record)) => {
                    records.push(DumpRecord::new(file.name_id.as_u64(), offset, &record));
                }
                Err(CoreError::CorruptRecord { offset, .. }) => {
                    eprintln!("{}: stopped at bad record at offset {offset}", file.name);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(records)
}
