//! Streaming record iterator over one segment.
//!
//! Reads records in chunks from the sequential file so memory stays bounded
//! by the read buffer (plus the largest record), however big the segment.

use crate::error::{CoreError, CoreResult};
use crate::record::{JournalRecord, RECORD_PREFIX_SIZE};
use crate::segment::header::SEGMENT_HEADER_SIZE;
use crate::types::SegmentId;
use journalq_storage::SequentialFile;
use std::sync::Arc;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A streaming iterator over the records of one segment.
///
/// Yields `(offset, record)` pairs. Any framing problem (truncated record,
/// unknown type, checksum mismatch) yields a `CorruptRecord` error carrying
/// the offset of the bad record and ends the iteration; the caller decides
/// whether that is a torn tail or fatal.
pub struct SegmentRecordIterator {
    file: Arc<dyn SequentialFile>,
    segment: SegmentId,
    end: u64,
    /// Offset of the next record.
    current_offset: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_len: usize,
    finished: bool,
}

impl SegmentRecordIterator {
    /// Creates an iterator over the records after the segment header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file size cannot be determined.
    pub fn new(file: Arc<dyn SequentialFile>, segment: SegmentId) -> CoreResult<Self> {
        let end = file.size()?;
        Ok(Self {
            file,
            segment,
            end,
            current_offset: SEGMENT_HEADER_SIZE.min(end),
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        })
    }

    /// Ensures at least `min_bytes` are buffered from the current position.
    ///
    /// Returns `false` if the segment ends first. The buffer grows when a
    /// single record is larger than it.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let remaining = (self.end - self.current_offset) as usize;
        if remaining < min_bytes {
            return Ok(false);
        }

        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let to_read = (self.buffer.len() - self.buffer_len).min(remaining - available);
        if to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.file.read_at(read_offset, to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn corrupt(&mut self, message: impl Into<String>) -> CoreError {
        self.finished = true;
        CoreError::corrupt_record(self.segment, self.current_offset, message)
    }

    fn read_next_record(&mut self) -> CoreResult<Option<(u64, JournalRecord)>> {
        if self.finished || self.current_offset >= self.end {
            self.finished = true;
            return Ok(None);
        }

        if !self.ensure_buffered(RECORD_PREFIX_SIZE)? {
            return Err(self.corrupt("truncated record header"));
        }

        let prefix = &self.buffer[self.buffer_pos..self.buffer_pos + RECORD_PREFIX_SIZE];
        let total_len = match JournalRecord::peek_len(prefix) {
            Ok((_, len)) => len,
            Err(err) => return Err(self.corrupt(err.to_string())),
        };

        // A body length past the end of the segment is a torn or garbage
        // record; never try to buffer it.
        if total_len as u64 > self.end - self.current_offset {
            return Err(self.corrupt(format!(
                "record length {total_len} exceeds remaining segment bytes {}",
                self.end - self.current_offset
            )));
        }
        if !self.ensure_buffered(total_len)? {
            return Err(self.corrupt("truncated record"));
        }

        let data = &self.buffer[self.buffer_pos..self.buffer_pos + total_len];
        let record = match JournalRecord::decode(data) {
            Ok((record, _)) => record,
            Err(err) => return Err(self.corrupt(err.to_string())),
        };

        let offset = self.current_offset;
        self.buffer_pos += total_len;
        self.current_offset += total_len as u64;
        Ok(Some((offset, record)))
    }
}

impl Iterator for SegmentRecordIterator {
    type Item = CoreResult<(u64, JournalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for SegmentRecordIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentRecordIterator")
            .field("segment", &self.segment)
            .field("current_offset", &self.current_offset)
            .field("end", &self.end)
            .finish()
    }
}
