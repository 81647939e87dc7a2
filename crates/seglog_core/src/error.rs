//! Error types for the seglog engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in log operations.
///
/// Variants fall into the classes callers act on: configuration (fatal at
/// open), not-found (retry with a valid id), corruption (stop trusting the
/// data, consider [`crate::Log::repair`]) and I/O (propagated unchanged).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] seglog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configuration cannot be used.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// No record exists with the requested identifier.
    #[error("record not found: {id}")]
    RecordNotFound {
        /// The requested identifier.
        id: u64,
    },

    /// A store offset at or past the logical end of the store.
    #[error("no record at offset {offset}, store holds {size} bytes")]
    InvalidOffset {
        /// The requested offset.
        offset: u64,
        /// The logical store size.
        size: u64,
    },

    /// A payload too large for the record length prefix.
    #[error("payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// The payload size.
        size: usize,
        /// The largest encodable payload.
        max: usize,
    },

    /// The segment's index has no free slot left.
    #[error("segment {segment_id} is full ({capacity} slots)")]
    SegmentFull {
        /// The full segment.
        segment_id: u64,
        /// Slot capacity of its index.
        capacity: u64,
    },

    /// A record's stored checksum does not match its contents.
    #[error("checksum mismatch for record {sequence}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Sequence number decoded from the record.
        sequence: u64,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the decoded payload.
        actual: u32,
    },

    /// A record's length prefix or body extends past the end of the store.
    #[error("truncated record at offset {offset}: needs {needed} bytes, {available} available")]
    TruncatedRecord {
        /// Offset of the record's length prefix.
        offset: u64,
        /// Bytes the record claims to need.
        needed: u64,
        /// Bytes actually present.
        available: u64,
    },

    /// An index slot holds a different identifier than its position implies.
    #[error("index corruption: slot for record {id} holds id {found}")]
    IndexCorruption {
        /// The requested identifier.
        id: u64,
        /// The identifier stored in the slot.
        found: u64,
    },

    /// Other structural damage to a store or index.
    #[error("corruption: {message}")]
    Corruption {
        /// Description of the damage.
        message: String,
    },

    /// The log has been closed.
    #[error("log is closed")]
    LogClosed,

    /// Another handle holds the directory lock.
    #[error("log directory locked: another process has exclusive access")]
    LogLocked,
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a generic corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Returns `true` for conditions a caller can recover from by asking for
    /// a different record.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RecordNotFound { .. } | Self::InvalidOffset { .. }
        )
    }

    /// Returns `true` for data corruption, as opposed to absence or I/O.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::TruncatedRecord { .. }
                | Self::IndexCorruption { .. }
                | Self::Corruption { .. }
        )
    }
}
