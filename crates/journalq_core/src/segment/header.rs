//! Segment file header and naming.
//!
//! ## Header Format
//!
//! ```text
//! | magic "JRNQ" (4) | version (2) | segment_id (8) | crc32 (4) |
//! ```
//!
//! The CRC covers the magic, version and segment id.

use crate::error::{CoreError, CoreResult};
use crate::record::compute_crc32;
use crate::types::SegmentId;

/// Magic bytes at the start of every segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"JRNQ";

/// Current segment format version.
pub const SEGMENT_VERSION: u16 = 1;

/// Encoded size of the segment header.
pub const SEGMENT_HEADER_SIZE: u64 = 18;

/// Header written at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Format version.
    pub version: u16,
    /// Segment sequence number.
    pub segment_id: SegmentId,
}

impl SegmentHeader {
    /// Creates a header for the current format version.
    #[must_use]
    pub const fn new(segment_id: SegmentId) -> Self {
        Self {
            version: SEGMENT_VERSION,
            segment_id,
        }
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEGMENT_HEADER_SIZE as usize);
        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.segment_id.as_u64().to_le_bytes());
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a header from exactly [`SEGMENT_HEADER_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` for a short buffer, wrong magic, unsupported
    /// version or checksum mismatch.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < SEGMENT_HEADER_SIZE as usize {
            return Err(CoreError::invalid_format(format!(
                "segment header too short: {} bytes",
                data.len()
            )));
        }
        if data[0..4] != SEGMENT_MAGIC {
            return Err(CoreError::invalid_format("invalid segment magic"));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != SEGMENT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported segment version {version}"
            )));
        }

        let stored = u32::from_le_bytes([data[14], data[15], data[16], data[17]]);
        let computed = compute_crc32(&data[0..14]);
        if stored != computed {
            return Err(CoreError::invalid_format(format!(
                "segment header checksum mismatch: expected {stored:08x}, got {computed:08x}"
            )));
        }

        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&data[6..14]);

        Ok(Self {
            version,
            segment_id: SegmentId::new(u64::from_le_bytes(id_bytes)),
        })
    }
}

/// Returns the file name of a segment: `{prefix}-{id:020}.{extension}`.
#[must_use]
pub fn segment_file_name(prefix: &str, id: SegmentId, extension: &str) -> String {
    format!("{prefix}-{:020}.{extension}", id.as_u64())
}

/// Parses the segment id out of a file name produced by
/// [`segment_file_name`].
#[must_use]
pub fn parse_segment_file_name(name: &str, prefix: &str, extension: &str) -> Option<SegmentId> {
    let digits = name
        .strip_prefix(prefix)?
        .strip_prefix('-')?
        .strip_suffix(extension)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(SegmentId::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let encoded = SegmentHeader::new(SegmentId::new(9)).encode();
        assert_eq!(encoded.len() as u64, SEGMENT_HEADER_SIZE);
        assert_eq!(&encoded[0..4], b"JRNQ");
        assert_eq!(&encoded[4..6], &1u16.to_le_bytes());
        assert_eq!(&encoded[6..14], &9u64.to_le_bytes());
    }

    #[test]
    fn header_decodes() {
        let header = SegmentHeader::new(SegmentId::new(12345));
        assert_eq!(SegmentHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut encoded = SegmentHeader::new(SegmentId::new(1)).encode();
        encoded[0] = b'X';
        assert!(matches!(
            SegmentHeader::decode(&encoded),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn future_version_rejected() {
        let mut encoded = SegmentHeader::new(SegmentId::new(1)).encode();
        encoded[4..6].copy_from_slice(&2u16.to_le_bytes());
        let err = SegmentHeader::decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("unsupported segment version 2"));
    }

    #[test]
    fn flipped_id_fails_checksum() {
        let mut encoded = SegmentHeader::new(SegmentId::new(1)).encode();
        encoded[6] = 2;
        assert!(SegmentHeader::decode(&encoded).is_err());
    }

    #[test]
    fn file_names_sort_by_id() {
        let a = segment_file_name("journal", SegmentId::new(9), "jrn");
        let b = segment_file_name("journal", SegmentId::new(10), "jrn");
        assert_eq!(a, "journal-00000000000000000009.jrn");
        assert!(a < b);
    }

    #[test]
    fn file_names_parse_back() {
        let name = segment_file_name("q", SegmentId::new(42), "log");
        assert_eq!(
            parse_segment_file_name(&name, "q", "log"),
            Some(SegmentId::new(42))
        );
        assert_eq!(parse_segment_file_name("q-abc.log", "q", "log"), None);
        assert_eq!(parse_segment_file_name("q-.log", "q", "log"), None);
        assert_eq!(parse_segment_file_name("other-1.log", "q", "log"), None);
    }
}
