//! Store verification and repair.
//!
//! Repair scans a store from offset 0 and stops at the first record that is
//! cut short or fails its checksum. Everything before that point is kept;
//! the store is atomically replaced by that prefix and the index is trimmed
//! to match. Records after the break are discarded even if they would
//! decode, because their position can no longer be trusted.

use crate::config::LogConfig;
use crate::dir::{discover_segments, LogDir};
use crate::error::{CoreError, CoreResult};
use crate::segment::{OpenMode, Record, Segment, Store, StoreIter};
use crate::types::SegmentId;
use seglog_storage::FileBackend;
use std::fmt;
use std::io;
use std::path::Path;

/// Why a scan stopped before the end of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationReason {
    /// A length prefix or record body runs past the end of the file.
    Truncated,
    /// A record's checksum does not match its payload.
    ChecksumMismatch,
    /// A length prefix or flag byte that no writer produces.
    Malformed,
}

impl TruncationReason {
    fn from_error(error: &CoreError) -> Self {
        match error {
            CoreError::TruncatedRecord { .. } => Self::Truncated,
            CoreError::ChecksumMismatch { .. } => Self::ChecksumMismatch,
            _ => Self::Malformed,
        }
    }

    /// Short lowercase name, as printed by the CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::ChecksumMismatch => "checksum-mismatch",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for TruncationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and why a scan stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakPoint {
    /// Offset of the first record that could not be recovered.
    pub offset: u64,
    /// Classification of the failure.
    pub reason: TruncationReason,
    /// The underlying error message.
    pub detail: String,
}

/// Result of scanning one store.
#[derive(Debug, Clone)]
pub struct StoreScan {
    /// Records before the break point, in order.
    pub records: Vec<Record>,
    /// Bytes covered by `records`.
    pub valid_len: u64,
    /// Bytes in the store.
    pub total_len: u64,
    /// First failure, if the scan did not reach the end.
    pub break_point: Option<BreakPoint>,
}

impl StoreScan {
    /// Returns `true` if every byte decoded into a valid record.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.break_point.is_none()
    }

    /// Bytes a repair would discard.
    #[must_use]
    pub fn discarded_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Outcome of repairing one segment.
#[derive(Debug, Clone)]
pub struct RepairReport {
    /// The repaired segment.
    pub segment_id: SegmentId,
    /// Records that survived, in order.
    pub recovered: Vec<Record>,
    /// Indexed records that were dropped.
    pub discarded_records: u64,
    /// Store bytes that were dropped.
    pub discarded_bytes: u64,
    /// Where the store was cut, if it was.
    pub break_point: Option<BreakPoint>,
}

impl RepairReport {
    /// Returns `true` if nothing was truncated.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.break_point.is_none()
    }

    /// Number of recovered records.
    #[must_use]
    pub fn recovered_count(&self) -> usize {
        self.recovered.len()
    }
}

/// Collects records until the first corruption.
///
/// I/O errors are returned; corruption ends the scan with a break point.
pub(crate) fn collect_scan(iter: StoreIter<'_>, total_len: u64) -> CoreResult<StoreScan> {
    let mut records = Vec::new();
    let mut valid_len = 0;

    for entry in iter {
        match entry {
            Ok((offset, record)) => {
                valid_len = offset + record.len_on_disk() as u64;
                records.push(record);
            }
            Err(e) if e.is_corruption() => {
                return Ok(StoreScan {
                    records,
                    valid_len,
                    total_len,
                    break_point: Some(BreakPoint {
                        offset: valid_len,
                        reason: TruncationReason::from_error(&e),
                        detail: e.to_string(),
                    }),
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(StoreScan {
        records,
        valid_len,
        total_len,
        break_point: None,
    })
}

/// Repairs a writable segment in place.
///
/// A clean segment is left untouched, so repeated repairs return the same
/// records and leave the file length unchanged.
pub(crate) fn repair_in_place(segment: &mut Segment) -> CoreResult<RepairReport> {
    segment.flush()?;
    let scan = collect_scan(segment.scan(), segment.size())?;
    let indexed = segment.len();

    if let Some(point) = &scan.break_point {
        segment.truncate_store(scan.valid_len, scan.records.len() as u64)?;
        tracing::warn!(
            segment = segment.id().as_u64(),
            offset = point.offset,
            reason = %point.reason,
            recovered = scan.records.len(),
            discarded_bytes = scan.discarded_bytes(),
            "truncated corrupt store tail"
        );
    }

    Ok(RepairReport {
        segment_id: segment.id(),
        discarded_records: indexed.saturating_sub(segment.len()),
        discarded_bytes: scan.discarded_bytes(),
        break_point: scan.break_point,
        recovered: scan.records,
    })
}

/// Scans a store file without modifying it.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read. Corruption is
/// reported through [`StoreScan::break_point`], not as an error.
pub fn verify_store(path: &Path) -> CoreResult<StoreScan> {
    let backend = FileBackend::open_read_only(path)?;
    let store = Store::new(Box::new(backend), 0)?;
    collect_scan(store.scan(), store.size())
}

/// Segment ids with a store file in `dir`, ascending.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn list_segments(dir: &Path, config: &LogConfig) -> CoreResult<Vec<SegmentId>> {
    discover_segments(dir, &config.naming)
}

/// Repairs one segment of a log that is not open.
///
/// Takes the directory lock for the duration of the repair.
///
/// # Errors
///
/// - [`CoreError::LogLocked`] if the log is open elsewhere
/// - an I/O `NotFound` error if the segment does not exist
/// - I/O errors while rewriting the store
pub fn repair_segment(dir: &Path, config: &LogConfig, id: SegmentId) -> CoreResult<RepairReport> {
    config.validate()?;
    let log_dir = LogDir::open(dir)?;

    let store_path = log_dir.path().join(config.naming.store_file(id));
    if !store_path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("segment {} has no store at {}", id.as_u64(), store_path.display()),
        )
        .into());
    }

    let mut segment = Segment::open(
        log_dir.path(),
        &config.naming,
        id,
        config,
        config.start_id,
        OpenMode::ReadWrite,
    )?;
    let report = repair_in_place(&mut segment)?;
    segment.close()?;
    Ok(report)
}
