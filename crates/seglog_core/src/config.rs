//! Log configuration.

use crate::error::{CoreError, CoreResult};
use crate::segment::SLOT_SIZE;
use crate::types::SegmentId;
use std::time::Duration;

/// File naming scheme for segment files.
///
/// A segment `N` owns `<prefix>N<store_suffix>` and `<prefix>N<index_suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentNaming {
    /// Common prefix of both files.
    pub prefix: String,
    /// Suffix of the store file.
    pub store_suffix: String,
    /// Suffix of the index file.
    pub index_suffix: String,
}

/// Suffix appended to a store file name while repair writes its replacement.
pub(crate) const REPAIR_SUFFIX: &str = ".repair";

impl Default for SegmentNaming {
    fn default() -> Self {
        Self {
            prefix: "segment-".to_string(),
            store_suffix: ".log".to_string(),
            index_suffix: ".idx".to_string(),
        }
    }
}

impl SegmentNaming {
    /// File name of the store for `id`.
    #[must_use]
    pub fn store_file(&self, id: SegmentId) -> String {
        format!("{}{}{}", self.prefix, id.as_u64(), self.store_suffix)
    }

    /// File name of the index for `id`.
    #[must_use]
    pub fn index_file(&self, id: SegmentId) -> String {
        format!("{}{}{}", self.prefix, id.as_u64(), self.index_suffix)
    }

    /// Parses a store file name back into its segment id.
    ///
    /// Returns `None` for anything that is not `<prefix><digits><store_suffix>`.
    #[must_use]
    pub fn parse_store_file(&self, name: &str) -> Option<SegmentId> {
        let digits = name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.store_suffix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(SegmentId::new)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.store_suffix.is_empty() || self.index_suffix.is_empty() {
            return Err(CoreError::invalid_config(
                "store and index suffixes must not be empty",
            ));
        }
        if self.store_suffix == self.index_suffix {
            return Err(CoreError::invalid_config(
                "store and index suffixes must differ",
            ));
        }
        Ok(())
    }
}

/// Configuration for opening a [`crate::Log`].
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Maximum store size of a segment before rotation, in bytes.
    pub max_segment_size: u64,

    /// Size of each segment's index file in bytes.
    ///
    /// Must be a positive multiple of the 16-byte slot width; it fixes the
    /// number of records a segment can hold.
    pub max_index_size: u64,

    /// Maximum number of segments kept on disk. Rotation evicts the oldest
    /// segment, and every record in it, once this is exceeded.
    pub max_segments: usize,

    /// Whether flushes are followed by an fsync.
    pub fsync: bool,

    /// Period of the background sync thread (zero disables it).
    pub sync_interval: Duration,

    /// First record identifier of a brand-new log.
    pub start_id: u64,

    /// Identifier of the first segment file of a brand-new log.
    pub first_segment_id: u64,

    /// Bytes buffered in memory before the store spills them to its file.
    pub write_buffer_size: usize,

    /// Segment file naming scheme.
    pub naming: SegmentNaming,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            max_index_size: 1024 * 1024,        // 65,536 records
            max_segments: 1024,
            fsync: true,
            sync_interval: Duration::from_millis(200),
            start_id: 1,
            first_segment_id: 0,
            write_buffer_size: 64 * 1024,
            naming: SegmentNaming::default(),
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum store size of a segment.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the index file size in bytes.
    #[must_use]
    pub const fn max_index_size(mut self, size: u64) -> Self {
        self.max_index_size = size;
        self
    }

    /// Sets the index size from a record count.
    #[must_use]
    pub const fn records_per_segment(mut self, records: u64) -> Self {
        self.max_index_size = records * SLOT_SIZE;
        self
    }

    /// Sets the number of retained segments.
    #[must_use]
    pub const fn max_segments(mut self, count: usize) -> Self {
        self.max_segments = count;
        self
    }

    /// Sets whether flushes fsync.
    #[must_use]
    pub const fn fsync(mut self, value: bool) -> Self {
        self.fsync = value;
        self
    }

    /// Sets the background sync period.
    #[must_use]
    pub const fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the first record identifier of a new log.
    #[must_use]
    pub const fn start_id(mut self, id: u64) -> Self {
        self.start_id = id;
        self
    }

    /// Sets the identifier of the first segment file.
    #[must_use]
    pub const fn first_segment_id(mut self, id: u64) -> Self {
        self.first_segment_id = id;
        self
    }

    /// Sets the store write buffer size.
    #[must_use]
    pub const fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Sets the segment naming scheme.
    #[must_use]
    pub fn naming(mut self, naming: SegmentNaming) -> Self {
        self.naming = naming;
        self
    }

    /// Number of records one segment's index can hold.
    #[must_use]
    pub const fn index_capacity(&self) -> u64 {
        self.max_index_size / SLOT_SIZE
    }

    /// Checks the configuration before any file is touched.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> CoreResult<()> {
        validate_index_size(self.max_index_size)?;
        if self.max_segment_size == 0 {
            return Err(CoreError::invalid_config(
                "max segment size must be greater than zero",
            ));
        }
        if self.max_segments == 0 {
            return Err(CoreError::invalid_config(
                "at least one segment must be retained",
            ));
        }
        if self.start_id == 0 {
            return Err(CoreError::invalid_config("start id must not be zero"));
        }
        self.naming.validate()
    }
}

/// Checks that an index size is a positive multiple of the slot width.
pub(crate) fn validate_index_size(size: u64) -> CoreResult<()> {
    if size == 0 || size % SLOT_SIZE != 0 {
        return Err(CoreError::invalid_config(format!(
            "max index size must be a positive multiple of {SLOT_SIZE}, got {size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LogConfig::default();
        config.validate().unwrap();
        assert!(config.fsync);
        assert_eq!(config.sync_interval, Duration::from_millis(200));
        assert_eq!(config.index_capacity(), 65_536);
    }

    #[test]
    fn builder_pattern() {
        let config = LogConfig::new()
            .records_per_segment(4)
            .max_segments(3)
            .fsync(false)
            .sync_interval(Duration::ZERO);

        assert_eq!(config.max_index_size, 64);
        assert_eq!(config.index_capacity(), 4);
        assert_eq!(config.max_segments, 3);
        assert!(!config.fsync);
    }

    #[test]
    fn index_size_must_be_multiple_of_slot() {
        for bad in [0, 15, 17, 100] {
            let err = LogConfig::new().max_index_size(bad).validate().unwrap_err();
            assert!(matches!(err, CoreError::InvalidConfig { .. }), "{bad}");
        }
        LogConfig::new().max_index_size(32).validate().unwrap();
    }

    #[test]
    fn zero_values_rejected() {
        assert!(LogConfig::new().max_segments(0).validate().is_err());
        assert!(LogConfig::new().start_id(0).validate().is_err());
        assert!(LogConfig::new().max_segment_size(0).validate().is_err());
    }

    #[test]
    fn naming_round_trip() {
        let naming = SegmentNaming::default();
        let name = naming.store_file(SegmentId::new(42));
        assert_eq!(name, "segment-42.log");
        assert_eq!(naming.index_file(SegmentId::new(42)), "segment-42.idx");
        assert_eq!(naming.parse_store_file(&name), Some(SegmentId::new(42)));
    }

    #[test]
    fn naming_rejects_foreign_files() {
        let naming = SegmentNaming::default();
        assert_eq!(naming.parse_store_file("segment-42.idx"), None);
        assert_eq!(naming.parse_store_file("segment-.log"), None);
        assert_eq!(naming.parse_store_file("segment-4x.log"), None);
        assert_eq!(naming.parse_store_file("segment-1.log.repair"), None);
        assert_eq!(naming.parse_store_file("LOCK"), None);
    }

    #[test]
    fn naming_suffixes_must_differ() {
        let naming = SegmentNaming {
            prefix: "wal-".into(),
            store_suffix: ".dat".into(),
            index_suffix: ".dat".into(),
        };
        assert!(LogConfig::new().naming(naming).validate().is_err());
    }
}
