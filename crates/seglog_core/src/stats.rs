//! Log statistics.
//!
//! Operation counters are atomics updated on the hot path; [`LogStats`] is
//! the plain snapshot handed to callers.

use crate::types::SegmentId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters of an open log.
#[derive(Debug, Default)]
pub(crate) struct LogCounters {
    appends: AtomicU64,
    checkpoints: AtomicU64,
    bytes_appended: AtomicU64,
    reads: AtomicU64,
    syncs: AtomicU64,
    rotations: AtomicU64,
    evicted_segments: AtomicU64,
    repairs: AtomicU64,
}

impl LogCounters {
    pub(crate) fn record_append(&self, bytes: u64, checkpoint: bool) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
        if checkpoint {
            self.checkpoints.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self, segments: u64) {
        self.evicted_segments.fetch_add(segments, Ordering::Relaxed);
    }

    pub(crate) fn record_repair(&self) {
        self.repairs.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the counters into `stats`.
    pub(crate) fn fill(&self, stats: &mut LogStats) {
        stats.appends = self.appends.load(Ordering::Relaxed);
        stats.checkpoints = self.checkpoints.load(Ordering::Relaxed);
        stats.bytes_appended = self.bytes_appended.load(Ordering::Relaxed);
        stats.reads = self.reads.load(Ordering::Relaxed);
        stats.syncs = self.syncs.load(Ordering::Relaxed);
        stats.rotations = self.rotations.load(Ordering::Relaxed);
        stats.evicted_segments = self.evicted_segments.load(Ordering::Relaxed);
        stats.repairs = self.repairs.load(Ordering::Relaxed);
    }
}

/// A point-in-time view of a log.
///
/// Counters cover the lifetime of the handle, not of the files on disk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogStats {
    /// Segments on disk, active included.
    pub segment_count: usize,
    /// Id of the segment receiving appends.
    pub active_segment: SegmentId,
    /// Oldest retained sequence number, if any record is retained.
    pub first_sequence: Option<u64>,
    /// Newest assigned sequence number, if any.
    pub last_sequence: Option<u64>,
    /// Sequence number of the newest checkpoint record.
    pub last_checkpoint: Option<u64>,
    /// Records in the active segment.
    pub active_records: u64,
    /// Slot capacity of the active segment.
    pub active_capacity: u64,
    /// Logical store size of the active segment.
    pub active_size: u64,
    /// Bytes not yet written to the active store file.
    pub buffered_bytes: usize,
    /// Appends, checkpoints included.
    pub appends: u64,
    /// Checkpoint appends.
    pub checkpoints: u64,
    /// Encoded bytes appended.
    pub bytes_appended: u64,
    /// Reads by id.
    pub reads: u64,
    /// Syncs, background ones included.
    pub syncs: u64,
    /// Rotations.
    pub rotations: u64,
    /// Segments removed by retention or trimming.
    pub evicted_segments: u64,
    /// Repairs that truncated a store.
    pub repairs: u64,
}
