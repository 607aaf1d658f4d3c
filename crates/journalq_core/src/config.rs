//! Journal configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest accepted segment size.
pub const MIN_SEGMENT_SIZE: u64 = 512;

/// Configuration for a journal.
///
/// Normally built with the builder methods; surrounding configuration code
/// can also deserialize it, with every missing field taking its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Capacity of each segment file in bytes, header included.
    pub segment_size: u64,

    /// Number of empty segments kept pre-allocated.
    pub min_free_segments: usize,

    /// Upper bound on the free pool; reclaimed segments beyond it are deleted.
    pub max_free_segments: usize,

    /// Whether appends wait for durability when the caller does not say.
    pub sync_by_default: bool,

    /// Segment file name prefix.
    pub file_prefix: String,

    /// Segment file name extension.
    pub file_extension: String,

    /// How often the background flusher syncs buffered writes
    /// (zero disables the flusher).
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,

    /// How many terminated transactions are remembered so that a repeated
    /// commit or rollback is a no-op.
    pub completed_transaction_history: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            segment_size: 10 * 1024 * 1024, // 10 MiB
            min_free_segments: 2,
            max_free_segments: 4,
            sync_by_default: true,
            file_prefix: "journal".to_string(),
            file_extension: "jrn".to_string(),
            flush_interval: Duration::from_millis(10),
            completed_transaction_history: 4096,
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment size.
    #[must_use]
    pub const fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the number of pre-allocated free segments.
    #[must_use]
    pub const fn min_free_segments(mut self, count: usize) -> Self {
        self.min_free_segments = count;
        self
    }

    /// Sets the free pool bound.
    #[must_use]
    pub const fn max_free_segments(mut self, count: usize) -> Self {
        self.max_free_segments = count;
        self
    }

    /// Sets the default sync behavior.
    #[must_use]
    pub const fn sync_by_default(mut self, value: bool) -> Self {
        self.sync_by_default = value;
        self
    }

    /// Sets the file name prefix and extension.
    #[must_use]
    pub fn file_naming(mut self, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self.file_extension = extension.into();
        self
    }

    /// Sets the background flush interval.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the completed-transaction history size.
    #[must_use]
    pub const fn completed_transaction_history(mut self, count: usize) -> Self {
        self.completed_transaction_history = count;
        self
    }

    /// Checks the configuration for values the journal cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(CoreError::invalid_config(format!(
                "segment_size {} is below the minimum of {MIN_SEGMENT_SIZE}",
                self.segment_size
            )));
        }
        if self.segment_size > u64::from(u32::MAX) {
            return Err(CoreError::invalid_config(format!(
                "segment_size {} exceeds the maximum of {}",
                self.segment_size,
                u32::MAX
            )));
        }
        if self.max_free_segments < self.min_free_segments {
            return Err(CoreError::invalid_config(format!(
                "max_free_segments {} is below min_free_segments {}",
                self.max_free_segments, self.min_free_segments
            )));
        }
        if self.file_prefix.is_empty() || self.file_extension.is_empty() {
            return Err(CoreError::invalid_config(
                "file_prefix and file_extension must not be empty",
            ));
        }
        if self.file_prefix.contains(['/', '\\']) || self.file_extension.contains(['/', '\\']) {
            return Err(CoreError::invalid_config(
                "file_prefix and file_extension must not contain path separators",
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
