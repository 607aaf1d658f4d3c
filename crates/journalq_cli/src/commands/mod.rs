//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use journalq_core::{
    parse_segment_file_name, CoreError, CoreResult, JournalConfig, SegmentHeader,
    SegmentId, SegmentRecordIterator, SEGMENT_HEADER_SIZE,
};
use journalq_storage::{DirectoryFactory, SequentialFile, SequentialFileFactory, StorageError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Journal error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage error while reading segments directly.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The configuration file is not valid JSON for a journal config.
    #[error("invalid config {path}: {source}")]
    ConfigParse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// JSON output failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    /// Nothing to inspect.
    #[error("no journal directory at {0}")]
    MissingDirectory(PathBuf),

    /// `verify` found problems.
    #[error("verification failed: {0} problem(s) found")]
    VerificationFailed(usize),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Loads the journal configuration, or the defaults if no file is given.
pub fn load_config(path: Option<&Path>) -> CliResult<JournalConfig> {
    let config = match path {
        Some(path) => {
            let data = fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| CliError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => JournalConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// A segment file opened for direct, read-only inspection.
pub struct SegmentFile {
    /// File name.
    pub name: String,
    /// Id encoded in the file name.
    pub name_id: SegmentId,
    /// File size in bytes.
    pub size: u64,
    file: Arc<dyn SequentialFile>,
}

impl SegmentFile {
    /// Whether the file holds nothing but a header (pooled for reuse).
    pub fn is_free(&self) -> bool {
        self.size <= SEGMENT_HEADER_SIZE
    }

    /// Reads and validates the header.
    pub fn header(&self) -> CoreResult<SegmentHeader> {
        if self.size < SEGMENT_HEADER_SIZE {
            return Err(CoreError::invalid_format(format!(
                "{}: torn header ({} bytes)",
                self.name, self.size
            )));
        }
        let bytes = self.file.read_at(0, SEGMENT_HEADER_SIZE as usize)?;
        SegmentHeader::decode(&bytes)
    }

    /// Iterates the records after the header.
    pub fn records(&self) -> CoreResult<SegmentRecordIterator> {
        SegmentRecordIterator::new(Arc::clone(&self.file), self.name_id)
    }
}

/// Opens every segment file in `dir`, in id order, without touching the
/// journal's lock or recovery.
pub fn open_segments(dir: &Path, config: &JournalConfig) -> CliResult<Vec<SegmentFile>> {
    if !dir.is_dir() {
        return Err(CliError::MissingDirectory(dir.to_path_buf()));
    }
    let factory = DirectoryFactory::new(dir)?;
    let mut segments = Vec::new();

    for name in factory.list_files(&config.file_prefix, &config.file_extension)? {
        let Some(name_id) =
            parse_segment_file_name(&name, &config.file_prefix, &config.file_extension)
        else {
            continue;
        };
        let file = factory.create_file(&name)?;
        file.open()?;
        let size = file.size()?;
        segments.push(SegmentFile {
            name,
            name_id,
            size,
            file,
        });
    }

    segments.sort_by_key(|s| s.name_id);
    Ok(segments)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
