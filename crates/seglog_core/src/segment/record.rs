//! Log record type and its store encoding.

use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;

/// Size of the little-endian `i32` length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// sequence (8) + flags (1)
const BODY_HEADER_SIZE: usize = 9;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Smallest valid body: header and checksum around an empty payload.
pub const MIN_BODY_SIZE: usize = BODY_HEADER_SIZE + CRC_SIZE;

/// Flag bit marking a checkpoint record.
const FLAG_CHECKPOINT: u8 = 0x01;

/// One immutable entry of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Global sequence number, also the record's identifier.
    pub sequence: SequenceNumber,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// CRC-32 over the payload followed by the sequence's low byte.
    pub checksum: u32,
    /// Whether this record is a replay boundary.
    pub checkpoint: bool,
}

impl Record {
    /// Largest payload whose encoding still fits the `i32` length prefix.
    pub const MAX_PAYLOAD_SIZE: usize = i32::MAX as usize - MIN_BODY_SIZE;

    /// Creates a record and computes its checksum.
    #[must_use]
    pub fn new(sequence: SequenceNumber, payload: Vec<u8>, checkpoint: bool) -> Self {
        let checksum = compute_checksum(sequence, &payload);
        Self {
            sequence,
            payload,
            checksum,
            checkpoint,
        }
    }

    /// Total bytes a record with `payload_len` bytes occupies in a store,
    /// length prefix included.
    #[must_use]
    pub const fn encoded_len(payload_len: usize) -> usize {
        LENGTH_PREFIX_SIZE + MIN_BODY_SIZE + payload_len
    }

    /// Encodes the record, length prefix included.
    ///
    /// ```text
    /// | len: i32 | sequence: u64 | flags: u8 | payload (N) | crc32: u32 |
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PayloadTooLarge`] if the body would not fit the
    /// length prefix.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(CoreError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        let body_len = MIN_BODY_SIZE + self.payload.len();
        let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body_len);

        // Checked above: body_len <= i32::MAX
        buf.extend_from_slice(&(body_len as i32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());
        buf.push(if self.checkpoint { FLAG_CHECKPOINT } else { 0 });
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());

        Ok(buf)
    }

    /// Decodes a record body (the bytes after the length prefix) and
    /// verifies its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corruption`] for a malformed body and
    /// [`CoreError::ChecksumMismatch`] when the checksum does not match.
    pub fn decode_body(body: &[u8]) -> CoreResult<Self> {
        if body.len() < MIN_BODY_SIZE {
            return Err(CoreError::corruption(format!(
                "record body of {} bytes is shorter than the minimum {MIN_BODY_SIZE}",
                body.len()
            )));
        }

        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&body[0..8]);
        let sequence = SequenceNumber::new(u64::from_le_bytes(seq_bytes));

        let flags = body[8];
        if flags & !FLAG_CHECKPOINT != 0 {
            return Err(CoreError::corruption(format!(
                "unknown flags {flags:#04x} on record {}",
                sequence.as_u64()
            )));
        }

        let crc_start = body.len() - CRC_SIZE;
        let payload = body[BODY_HEADER_SIZE..crc_start].to_vec();
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&body[crc_start..]);
        let checksum = u32::from_le_bytes(crc_bytes);

        let record = Self {
            sequence,
            payload,
            checksum,
            checkpoint: flags & FLAG_CHECKPOINT != 0,
        };
        record.verify()?;
        Ok(record)
    }

    /// Recomputes the checksum and compares it with the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ChecksumMismatch`] on mismatch.
    pub fn verify(&self) -> CoreResult<()> {
        let actual = compute_checksum(self.sequence, &self.payload);
        if actual != self.checksum {
            return Err(CoreError::ChecksumMismatch {
                sequence: self.sequence.as_u64(),
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Returns whether this record is a checkpoint.
    #[must_use]
    pub fn is_checkpoint(&self) -> bool {
        self.checkpoint
    }

    /// Length of the encoded record, length prefix included.
    #[must_use]
    pub fn len_on_disk(&self) -> usize {
        Self::encoded_len(self.payload.len())
    }
}

/// Parses a length prefix into a body length.
///
/// # Errors
///
/// Returns [`CoreError::Corruption`] for negative lengths or lengths shorter
/// than an empty record.
pub fn parse_length_prefix(prefix: [u8; LENGTH_PREFIX_SIZE], offset: u64) -> CoreResult<usize> {
    let len = i32::from_le_bytes(prefix);
    if len < 0 || (len as usize) < MIN_BODY_SIZE {
        return Err(CoreError::corruption(format!(
            "invalid record length {len} at offset {offset}"
        )));
    }
    Ok(len as usize)
}

/// CRC-32 (IEEE) over `payload` followed by the sequence number's low byte.
#[must_use]
pub fn compute_checksum(sequence: SequenceNumber, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.update(&[sequence.checksum_tag()]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_of(encoded: &[u8]) -> &[u8] {
        &encoded[LENGTH_PREFIX_SIZE..]
    }

    #[test]
    fn encode_layout() {
        let record = Record::new(SequenceNumber::new(0x0102), b"ab".to_vec(), true);
        let encoded = record.encode().unwrap();

        assert_eq!(encoded.len(), Record::encoded_len(2));
        assert_eq!(encoded.len(), record.len_on_disk());
        assert_eq!(&encoded[0..4], &15i32.to_le_bytes());
        assert_eq!(&encoded[4..12], &0x0102u64.to_le_bytes());
        assert_eq!(encoded[12], FLAG_CHECKPOINT);
        assert_eq!(&encoded[13..15], b"ab");
        assert_eq!(&encoded[15..19], &record.checksum.to_le_bytes());
    }

    #[test]
    fn decode_restores_record() {
        let record = Record::new(SequenceNumber::new(9), b"payload".to_vec(), false);
        let encoded = record.encode().unwrap();
        let decoded = Record::decode_body(body_of(&encoded)).unwrap();
        assert_eq!(decoded, record);
        assert!(!decoded.is_checkpoint());
    }

    #[test]
    fn empty_payload_is_valid() {
        let record = Record::new(SequenceNumber::new(1), Vec::new(), true);
        let encoded = record.encode().unwrap();
        assert_eq!(encoded.len(), LENGTH_PREFIX_SIZE + MIN_BODY_SIZE);
        assert_eq!(Record::decode_body(body_of(&encoded)).unwrap(), record);
    }

    #[test]
    fn checksum_covers_sequence_tag() {
        let a = compute_checksum(SequenceNumber::new(1), b"same");
        let b = compute_checksum(SequenceNumber::new(2), b"same");
        let c = compute_checksum(SequenceNumber::new(257), b"same");
        assert_ne!(a, b);
        // Only the low byte takes part.
        assert_eq!(a, c);
    }

    #[test]
    fn checksum_known_value() {
        // CRC-32 of "12345678" followed by '9' (0x39) equals CRC-32("123456789").
        let crc = compute_checksum(SequenceNumber::new(0x39), b"12345678");
        assert_eq!(crc, 0xCBF4_3926);
    }

    #[test]
    fn flipped_payload_byte_is_detected() {
        let record = Record::new(SequenceNumber::new(3), b"hello".to_vec(), false);
        let mut encoded = record.encode().unwrap();
        encoded[LENGTH_PREFIX_SIZE + BODY_HEADER_SIZE] ^= 0xFF;

        let err = Record::decode_body(body_of(&encoded)).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { sequence: 3, .. }));
    }

    #[test]
    fn flipped_checksum_byte_is_detected() {
        let record = Record::new(SequenceNumber::new(3), b"hello".to_vec(), false);
        let mut encoded = record.encode().unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let err = Record::decode_body(body_of(&encoded)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn short_body_is_corruption() {
        let err = Record::decode_body(&[0u8; MIN_BODY_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }

    #[test]
    fn unknown_flags_are_corruption() {
        let record = Record::new(SequenceNumber::new(3), b"x".to_vec(), false);
        let mut encoded = record.encode().unwrap();
        encoded[LENGTH_PREFIX_SIZE + 8] = 0x80;
        assert!(matches!(
            Record::decode_body(body_of(&encoded)),
            Err(CoreError::Corruption { .. })
        ));
    }

    #[test]
    fn length_prefix_validation() {
        assert_eq!(parse_length_prefix(20i32.to_le_bytes(), 0).unwrap(), 20);
        assert!(parse_length_prefix((-1i32).to_le_bytes(), 0).is_err());
        assert!(parse_length_prefix(3i32.to_le_bytes(), 0).is_err());
    }
}
