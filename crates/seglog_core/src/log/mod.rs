//! The log engine.
//!
//! A [`Log`] owns an ordered set of segments. The newest one is active and
//! receives appends; older ones are sealed and reopened read-only. All
//! mutations serialize through one lock around the active state, which is
//! also taken by the background sync thread.
//!
//! Lock order is active state first, sealed map second.

pub mod recovery;
mod sync;

pub use recovery::{RepairReport, TruncationReason};

use crate::config::LogConfig;
use crate::dir::LogDir;
use crate::error::{CoreError, CoreResult};
use crate::segment::{FileStores, OpenMode, Record, Segment, StoreOpener};
use crate::stats::{LogCounters, LogStats};
use crate::types::{SegmentId, SequenceNumber};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync::SyncTask;

type SealedMap = BTreeMap<SegmentId, Arc<Segment>>;

/// State guarded by the engine-wide write lock.
struct ActiveState {
    /// `None` once the log is closed.
    segment: Option<Segment>,
    next_sequence: SequenceNumber,
    last_checkpoint: Option<SequenceNumber>,
    last_sync: Instant,
}

impl ActiveState {
    fn segment(&self) -> CoreResult<&Segment> {
        self.segment.as_ref().ok_or(CoreError::LogClosed)
    }

    fn segment_mut(&mut self) -> CoreResult<&mut Segment> {
        self.segment.as_mut().ok_or(CoreError::LogClosed)
    }
}

/// Shared between the [`Log`] handle and its sync thread.
pub(crate) struct LogInner {
    config: LogConfig,
    dir: LogDir,
    stores: Arc<dyn StoreOpener>,
    active: Mutex<ActiveState>,
    sealed: RwLock<SealedMap>,
    counters: LogCounters,
    closed: AtomicBool,
}

/// A durable, segmented, append-only log.
///
/// # Example
///
/// ```rust,no_run
/// use seglog_core::{Log, LogConfig};
/// use std::path::Path;
///
/// let log = Log::open(Path::new("my_log"), LogConfig::default())?;
/// log.append(b"first")?;
/// let cp = log.checkpoint(b"snapshot")?;
/// log.append(b"after")?;
///
/// let replay = log.read_all(true)?;
/// assert_eq!(replay[0].sequence, cp);
/// # Ok::<(), seglog_core::CoreError>(())
/// ```
pub struct Log {
    inner: Arc<LogInner>,
    sync_task: Mutex<Option<SyncTask>>,
}

impl Log {
    /// Opens or creates the log in directory `path`.
    ///
    /// Existing segments are discovered by file name; the highest id
    /// becomes the active segment and the rest are opened read-only. A
    /// fresh directory gets segment `config.first_segment_id`.
    ///
    /// An empty active segment starts at the persisted sequence floor, so
    /// ids stay unique after the records before it were evicted or trimmed.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfig`] if the configuration is invalid
    /// - [`CoreError::LogLocked`] if another handle has the log open
    /// - corruption or I/O errors from the active segment
    pub fn open(path: &Path, config: LogConfig) -> CoreResult<Self> {
        Self::open_with_stores(path, config, Arc::new(FileStores))
    }

    /// Opens the log with store backends supplied by `stores`.
    ///
    /// # Errors
    ///
    /// Same as [`Log::open`].
    pub fn open_with_stores(
        path: &Path,
        config: LogConfig,
        stores: Arc<dyn StoreOpener>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let dir = LogDir::open(path)?;
        dir.remove_repair_leftovers(&config.naming)?;
        let floor = match dir.load_sequence_floor() {
            Ok(floor) => floor,
            Err(e) if e.is_corruption() => {
                tracing::warn!(error = %e, "ignoring damaged sequence floor");
                None
            }
            Err(e) => return Err(e),
        };

        let ids = dir.discover(&config.naming)?;
        let (active_id, sealed_ids) = match ids.split_last() {
            Some((last, rest)) => (*last, rest),
            None => (SegmentId::new(config.first_segment_id), &[][..]),
        };

        let mut sealed = SealedMap::new();
        let mut hint = config.start_id;
        for &id in sealed_ids {
            let segment = Segment::open_with(
                dir.path(),
                &config.naming,
                id,
                &config,
                hint,
                OpenMode::ReadOnly,
                Arc::clone(&stores),
            )?;
            hint = segment.next_id();
            sealed.insert(id, Arc::new(segment));
        }
        if let Some(floor) = floor {
            hint = hint.max(floor);
        }

        let active = Segment::open_with(
            dir.path(),
            &config.naming,
            active_id,
            &config,
            hint,
            OpenMode::ReadWrite,
            Arc::clone(&stores),
        )?;
        if ids.is_empty() {
            dir.sync()?;
            tracing::debug!(segment = active_id.as_u64(), "created first segment");
        }

        let next_sequence = SequenceNumber::new(active.next_id());
        let last_checkpoint = latest_checkpoint(&active, &sealed);
        tracing::info!(
            path = %path.display(),
            segments = sealed.len() + 1,
            active = active_id.as_u64(),
            next_sequence = next_sequence.as_u64(),
            "opened log"
        );

        let sync_interval = config.sync_interval;
        let inner = Arc::new(LogInner {
            config,
            dir,
            stores,
            active: Mutex::new(ActiveState {
                segment: Some(active),
                next_sequence,
                last_checkpoint,
                last_sync: Instant::now(),
            }),
            sealed: RwLock::new(sealed),
            counters: LogCounters::default(),
            closed: AtomicBool::new(false),
        });

        let sync_task = if sync_interval.is_zero() {
            None
        } else {
            Some(SyncTask::spawn(Arc::clone(&inner), sync_interval)?)
        };

        Ok(Self {
            inner,
            sync_task: Mutex::new(sync_task),
        })
    }

    /// Appends `payload` and returns its sequence number.
    ///
    /// Rotates first if the active segment's index is full or the record
    /// would push its store past `max_segment_size`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::PayloadTooLarge`] for payloads that cannot be encoded
    /// - [`CoreError::LogClosed`] after [`Log::close`]
    /// - I/O errors from the store, index or rotation
    pub fn append(&self, payload: &[u8]) -> CoreResult<SequenceNumber> {
        self.append_record(payload, false)
    }

    /// Appends `payload` as a checkpoint record.
    ///
    /// Everything appended before it is synced before the checkpoint itself
    /// is written.
    ///
    /// # Errors
    ///
    /// Same as [`Log::append`], plus sync failures.
    pub fn checkpoint(&self, payload: &[u8]) -> CoreResult<SequenceNumber> {
        self.append_record(payload, true)
    }

    fn append_record(&self, payload: &[u8], checkpoint: bool) -> CoreResult<SequenceNumber> {
        if payload.len() > Record::MAX_PAYLOAD_SIZE {
            return Err(CoreError::PayloadTooLarge {
                size: payload.len(),
                max: Record::MAX_PAYLOAD_SIZE,
            });
        }

        let mut active = self.inner.lock_active()?;
        let encoded_len = Record::encoded_len(payload.len()) as u64;

        let segment = active.segment()?;
        let over_size = !segment.is_empty()
            && segment.size() + encoded_len > self.inner.config.max_segment_size;
        if segment.is_full() || over_size {
            self.inner.rotate_locked(&mut active)?;
        }
        if checkpoint {
            self.inner.sync_locked(&mut active)?;
        }

        let sequence = active.next_sequence;
        let record = Record::new(sequence, payload.to_vec(), checkpoint);
        active.segment_mut()?.write(&record)?;
        active.next_sequence = sequence.next();
        if checkpoint {
            active.last_checkpoint = Some(sequence);
        }

        self.inner.counters.record_append(encoded_len, checkpoint);
        Ok(sequence)
    }

    /// Reads the payload of record `id`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::RecordNotFound`] for id 0, ids never assigned and ids
    ///   in evicted segments
    /// - corruption errors if the bytes fail verification
    pub fn read(&self, id: u64) -> CoreResult<Vec<u8>> {
        self.read_record(id).map(|record| record.payload)
    }

    /// Reads record `id` with its metadata.
    ///
    /// Sealed segments are read without the write lock.
    ///
    /// # Errors
    ///
    /// Same as [`Log::read`].
    pub fn read_record(&self, id: u64) -> CoreResult<Record> {
        self.inner.ensure_open()?;
        self.inner.counters.record_read();

        if let Some(segment) = self.inner.sealed_containing(id) {
            return segment.read(id);
        }
        {
            let active = self.inner.active.lock();
            let segment = active.segment()?;
            if segment.contains(id) {
                return segment.read(id);
            }
        }
        // A rotation may have sealed the segment since the first lookup.
        if let Some(segment) = self.inner.sealed_containing(id) {
            return segment.read(id);
        }
        Err(CoreError::RecordNotFound { id })
    }

    /// Every record of the active segment, in order.
    ///
    /// With `from_checkpoint`, the result starts at the newest checkpoint
    /// record and is empty if there is none.
    ///
    /// # Errors
    ///
    /// Returns the first corruption or I/O error met while scanning.
    pub fn read_all(&self, from_checkpoint: bool) -> CoreResult<Vec<Record>> {
        let active = self.inner.lock_active()?;
        let records = active.segment()?.records()?;
        Ok(replay(records, from_checkpoint))
    }

    /// Records of every segment whose id is at least `segment_id`, in order.
    ///
    /// With `from_checkpoint`, the newest checkpoint across all of those
    /// segments wins: the result starts there and is empty if there is no
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns the first corruption or I/O error met while scanning.
    pub fn read_from_offset(
        &self,
        segment_id: SegmentId,
        from_checkpoint: bool,
    ) -> CoreResult<Vec<Record>> {
        self.inner.ensure_open()?;

        let snapshot: Vec<Arc<Segment>> = self
            .inner
            .sealed
            .read()
            .range(segment_id..)
            .map(|(_, segment)| Arc::clone(segment))
            .collect();

        let mut records = Vec::new();
        for segment in &snapshot {
            records.extend(segment.records()?);
        }

        let active = self.inner.lock_active()?;
        let resume = snapshot
            .last()
            .map_or(segment_id, |segment| segment.id().next())
            .max(segment_id);
        let late: Vec<Arc<Segment>> = self
            .inner
            .sealed
            .read()
            .range(resume..)
            .map(|(_, segment)| Arc::clone(segment))
            .collect();
        for segment in &late {
            records.extend(segment.records()?);
        }

        let segment = active.segment()?;
        if segment.id() >= segment_id {
            records.extend(segment.records()?);
        }
        drop(active);

        Ok(replay(records, from_checkpoint))
    }

    /// Seals the active segment and starts a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync, the reopen, segment creation or
    /// eviction fails.
    pub fn rotate(&self) -> CoreResult<SegmentId> {
        let mut active = self.inner.lock_active()?;
        self.inner.rotate_locked(&mut active)?;
        Ok(active.segment()?.id())
    }

    /// Flushes buffered records and, if `fsync` is enabled, syncs them to
    /// disk. Safe to call with nothing buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or fsync fails.
    pub fn sync(&self) -> CoreResult<()> {
        let mut active = self.inner.lock_active()?;
        self.inner.sync_locked(&mut active)
    }

    /// Verifies the active segment and truncates it at the first damaged
    /// record.
    ///
    /// A segment without damage is left as is. After a truncation the next
    /// append reuses the first discarded sequence number.
    ///
    /// # Errors
    ///
    /// Returns I/O errors from the scan or the file replacement.
    pub fn repair(&self) -> CoreResult<RepairReport> {
        let mut active = self.inner.lock_active()?;
        let segment = active.segment_mut()?;
        let report = recovery::repair_in_place(segment)?;

        if !report.is_clean() {
            let next = SequenceNumber::new(segment.next_id());
            let checkpoint = latest_checkpoint(segment, &self.inner.sealed.read());
            active.next_sequence = next;
            active.last_checkpoint = checkpoint;
            active.last_sync = Instant::now();
            self.inner.counters.record_repair();
            tracing::info!(
                segment = report.segment_id.as_u64(),
                recovered = report.recovered_count(),
                discarded = report.discarded_records,
                next_sequence = next.as_u64(),
                "repaired active segment"
            );
        }
        Ok(report)
    }

    /// Removes sealed segments whose records all precede `sequence`.
    ///
    /// Stops at the first segment that still holds a record at or after
    /// `sequence`. The active segment is never removed. Returns the number
    /// of segments removed.
    ///
    /// # Errors
    ///
    /// Returns the first file removal error.
    pub fn trim_before(&self, sequence: u64) -> CoreResult<usize> {
        let _active = self.inner.lock_active()?;
        let mut sealed = self.inner.sealed.write();

        let mut removed = 0;
        while let Some(entry) = sealed.first_entry() {
            if entry.get().next_id() > sequence {
                break;
            }
            let segment = entry.remove();
            let id = segment.id();
            Segment::remove_shared(segment)?;
            removed += 1;
            tracing::info!(segment = id.as_u64(), before = sequence, "trimmed segment");
        }
        drop(sealed);

        if removed > 0 {
            self.inner.counters.record_eviction(removed as u64);
            self.inner.dir.sync()?;
        }
        Ok(removed)
    }

    /// Stops the sync thread, syncs and closes the active segment.
    ///
    /// Later calls return `Ok(())` without touching the disk; every other
    /// operation returns [`CoreError::LogClosed`].
    ///
    /// # Errors
    ///
    /// Returns the final sync or close error.
    pub fn close(&self) -> CoreResult<()> {
        // A failed rotation can close the log while the sync thread still runs.
        if let Some(task) = self.sync_task.lock().take() {
            task.stop();
        }
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut active = self.inner.active.lock();
        let Some(mut segment) = active.segment.take() else {
            return Ok(());
        };
        let synced = segment.sync(self.inner.config.fsync);
        let closed = segment.close();
        self.inner.sealed.write().clear();
        tracing::info!(path = %self.inner.dir.path().display(), "closed log");
        synced.and(closed)
    }

    /// A snapshot of sizes, positions and operation counters.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogClosed`] after close.
    pub fn stats(&self) -> CoreResult<LogStats> {
        let active = self.inner.lock_active()?;
        let segment = active.segment()?;
        let sealed = self.inner.sealed.read();

        let mut stats = LogStats {
            segment_count: sealed.len() + 1,
            active_segment: segment.id(),
            first_sequence: first_sequence(&sealed, segment),
            last_sequence: None,
            last_checkpoint: active.last_checkpoint.map(SequenceNumber::as_u64),
            active_records: segment.len(),
            active_capacity: segment.capacity(),
            active_size: segment.size(),
            buffered_bytes: segment.buffered_len(),
            ..LogStats::default()
        };
        stats.last_sequence = stats
            .first_sequence
            .map(|_| active.next_sequence.as_u64() - 1);
        self.inner.counters.fill(&mut stats);
        Ok(stats)
    }

    /// Oldest retained sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogClosed`] after close.
    pub fn first_sequence(&self) -> CoreResult<Option<SequenceNumber>> {
        let active = self.inner.lock_active()?;
        let sealed = self.inner.sealed.read();
        Ok(first_sequence(&sealed, active.segment()?).map(SequenceNumber::new))
    }

    /// Newest assigned sequence number, if any record is retained.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogClosed`] after close.
    pub fn last_sequence(&self) -> CoreResult<Option<SequenceNumber>> {
        let active = self.inner.lock_active()?;
        let sealed = self.inner.sealed.read();
        let retained = first_sequence(&sealed, active.segment()?).is_some();
        Ok(retained.then(|| SequenceNumber::new(active.next_sequence.as_u64() - 1)))
    }

    /// Sequence number the next append will receive.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogClosed`] after close.
    pub fn next_sequence(&self) -> CoreResult<SequenceNumber> {
        Ok(self.inner.lock_active()?.next_sequence)
    }

    /// Sequence number of the newest checkpoint record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogClosed`] after close.
    pub fn last_checkpoint(&self) -> CoreResult<Option<SequenceNumber>> {
        Ok(self.inner.lock_active()?.last_checkpoint)
    }

    /// Ids of all retained segments, ascending; the last one is active.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogClosed`] after close.
    pub fn segment_ids(&self) -> CoreResult<Vec<SegmentId>> {
        let active = self.inner.lock_active()?;
        let mut ids: Vec<SegmentId> = self.inner.sealed.read().keys().copied().collect();
        ids.push(active.segment()?.id());
        Ok(ids)
    }

    /// The log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.dir.path()
    }

    /// The configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.inner.config
    }

    /// Returns `true` once [`Log::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(error = %e, "failed to close log on drop");
        }
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("path", &self.inner.dir.path())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl LogInner {
    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CoreError::LogClosed);
        }
        Ok(())
    }

    fn lock_active(&self) -> CoreResult<MutexGuard<'_, ActiveState>> {
        self.ensure_open()?;
        Ok(self.active.lock())
    }

    fn sealed_containing(&self, id: u64) -> Option<Arc<Segment>> {
        self.sealed
            .read()
            .values()
            .rev()
            .find(|segment| segment.contains(id))
            .cloned()
    }

    fn sync_locked(&self, active: &mut ActiveState) -> CoreResult<()> {
        let segment = active.segment_mut()?;
        let buffered = segment.buffered_len();
        segment.sync(self.config.fsync)?;
        active.last_sync = Instant::now();
        self.counters.record_sync();
        tracing::debug!(buffered, fsync = self.config.fsync, "synced active segment");
        Ok(())
    }

    /// Syncs if the last sync is at least `interval` old.
    pub(crate) fn sync_if_due(&self, interval: Duration) -> CoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut active = self.active.lock();
        if active.segment.is_none() || active.last_sync.elapsed() < interval {
            return Ok(());
        }
        self.sync_locked(&mut active)
    }

    fn rotate_locked(&self, active: &mut ActiveState) -> CoreResult<()> {
        // Sync while the segment is still owned so a failure loses nothing.
        active.segment_mut()?.sync(true)?;
        let old_id = active.segment()?.id();
        let new_id = old_id.next();
        let start = active.next_sequence.as_u64();

        // Until the new segment exists, a failure leaves the old one active.
        let next = self.open_active(new_id, start)?;
        let current = active.segment.take().ok_or(CoreError::LogClosed)?;
        let sealed_segment = match current.seal(&self.config) {
            Ok(segment) => segment,
            Err(e) => {
                self.abandon_rotation(active, next, old_id, start);
                return Err(e);
            }
        };
        self.sealed.write().insert(old_id, Arc::new(sealed_segment));
        active.segment = Some(next);
        active.last_sync = Instant::now();
        self.counters.record_rotation();
        tracing::info!(
            sealed = old_id.as_u64(),
            active = new_id.as_u64(),
            start_sequence = start,
            "rotated segment"
        );

        self.dir.save_sequence_floor(start)?;
        self.enforce_retention()
    }

    /// Drops a half-made rotation and reopens the old segment for writing.
    ///
    /// If even that fails the log cannot take writes any more and is marked
    /// closed.
    fn abandon_rotation(
        &self,
        active: &mut ActiveState,
        next: Segment,
        old_id: SegmentId,
        start: u64,
    ) {
        let new_id = next.id();
        if let Err(e) = next.remove() {
            tracing::warn!(segment = new_id.as_u64(), error = %e, "failed to remove unused segment");
        }
        match self.open_active(old_id, start) {
            Ok(segment) => active.segment = Some(segment),
            Err(e) => {
                self.closed.store(true, Ordering::SeqCst);
                tracing::error!(
                    segment = old_id.as_u64(),
                    error = %e,
                    "failed to reopen active segment after rotation failure; log closed"
                );
            }
        }
    }

    fn open_active(&self, id: SegmentId, start: u64) -> CoreResult<Segment> {
        let segment = Segment::open_with(
            self.dir.path(),
            &self.config.naming,
            id,
            &self.config,
            start,
            OpenMode::ReadWrite,
            Arc::clone(&self.stores),
        )?;
        tracing::debug!(segment = id.as_u64(), start_sequence = start, "opened active segment");
        Ok(segment)
    }

    fn enforce_retention(&self) -> CoreResult<()> {
        let mut sealed = self.sealed.write();
        let mut evicted = 0;
        while sealed.len() + 1 > self.config.max_segments {
            let Some((_, segment)) = sealed.pop_first() else {
                break;
            };
            let id = segment.id();
            let records = segment.len();
            Segment::remove_shared(segment)?;
            evicted += 1;
            tracing::warn!(
                segment = id.as_u64(),
                records,
                max_segments = self.config.max_segments,
                "evicted oldest segment"
            );
        }
        drop(sealed);

        if evicted > 0 {
            self.counters.record_eviction(evicted);
            self.dir.sync()?;
        }
        Ok(())
    }
}

/// Drops everything before the newest checkpoint when `from_checkpoint`.
fn replay(mut records: Vec<Record>, from_checkpoint: bool) -> Vec<Record> {
    if !from_checkpoint {
        return records;
    }
    match records.iter().rposition(Record::is_checkpoint) {
        Some(pos) => records.split_off(pos),
        None => Vec::new(),
    }
}

fn first_sequence(sealed: &SealedMap, active: &Segment) -> Option<u64> {
    sealed
        .values()
        .map(|segment| segment.as_ref())
        .chain(std::iter::once(active))
        .find(|segment| segment.len() > 0)
        .map(Segment::start_id)
}

/// Newest checkpoint, searching the active segment first, then sealed
/// segments from newest to oldest. Damaged tails are skipped.
fn latest_checkpoint(active: &Segment, sealed: &SealedMap) -> Option<SequenceNumber> {
    std::iter::once(active)
        .chain(sealed.values().rev().map(|segment| segment.as_ref()))
        .find_map(|segment| {
            segment
                .scan()
                .map_while(Result::ok)
                .filter(|(_, record)| record.is_checkpoint())
                .last()
                .map(|(_, record)| record.sequence)
        })
}
