//! Core type definitions.

use std::fmt;

/// Global record sequence number.
///
/// Sequence numbers start at 1, increase by exactly one per append for the
/// whole life of a log and double as the record identifier in segment
/// indexes. Rotation never resets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Low byte folded into the record checksum.
    #[must_use]
    pub const fn checksum_tag(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of a segment, taken from the numeric suffix of its file names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the ID of the segment created by the next rotation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_next_and_tag() {
        let s = SequenceNumber::new(255);
        assert_eq!(s.checksum_tag(), 0xFF);
        assert_eq!(s.next().as_u64(), 256);
        assert_eq!(s.next().checksum_tag(), 0);
    }

    #[test]
    fn segment_id_display() {
        assert_eq!(format!("{}", SegmentId::new(3)), "seg:3");
        assert_eq!(SegmentId::new(3).next(), SegmentId::new(4));
    }
}
