//! A store and index pair under one segment id.

use crate::config::{LogConfig, SegmentNaming, REPAIR_SUFFIX};
use crate::dir::sync_directory;
use crate::error::{CoreError, CoreResult};
use crate::segment::index::Index;
use crate::segment::record::Record;
use crate::segment::store::{Store, StoreIter};
use crate::segment::{FileStores, OpenMode, StoreOpener};
use crate::types::SegmentId;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One segment of the log: a store, its index and the id range they cover.
///
/// Writes go to the store first and to the index second, so an index slot
/// never points at bytes that were not appended.
pub struct Segment {
    id: SegmentId,
    mode: OpenMode,
    store_path: PathBuf,
    store: Store,
    index: Index,
    write_buffer_size: usize,
    stores: Arc<dyn StoreOpener>,
}

impl Segment {
    /// Opens segment `id` in `dir`, creating its files when writable.
    ///
    /// `start_id_hint` is the first record id of a segment whose index is
    /// still empty. A writable segment is reconciled on open: index slots
    /// pointing at or past the end of the store are dropped, and complete
    /// records the index never learned about are indexed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for a bad index size, or an
    /// I/O error if a file cannot be opened.
    pub fn open(
        dir: &Path,
        naming: &SegmentNaming,
        id: SegmentId,
        config: &LogConfig,
        start_id_hint: u64,
        mode: OpenMode,
    ) -> CoreResult<Self> {
        Self::open_with(dir, naming, id, config, start_id_hint, mode, Arc::new(FileStores))
    }

    /// Like [`Segment::open`], with the store backend opened by `stores`.
    ///
    /// # Errors
    ///
    /// Same as [`Segment::open`].
    pub fn open_with(
        dir: &Path,
        naming: &SegmentNaming,
        id: SegmentId,
        config: &LogConfig,
        start_id_hint: u64,
        mode: OpenMode,
        stores: Arc<dyn StoreOpener>,
    ) -> CoreResult<Self> {
        let store_path = dir.join(naming.store_file(id));
        let index_path = dir.join(naming.index_file(id));

        // Index first: a bad size must fail before the store file exists.
        let index = Index::open(&index_path, id, config.max_index_size, start_id_hint, mode)?;
        let backend = stores.open(&store_path, mode)?;
        let store = Store::new(backend, config.write_buffer_size)?;

        let mut segment = Self {
            id,
            mode,
            store_path,
            store,
            index,
            write_buffer_size: config.write_buffer_size,
            stores,
        };
        if mode == OpenMode::ReadWrite {
            segment.reconcile()?;
        }
        Ok(segment)
    }

    fn reconcile(&mut self) -> CoreResult<()> {
        let size = self.store.size();
        let mut keep = self.index.len();
        while keep > 0 {
            let offset = self.index.read(self.index.start_id() + keep - 1)?;
            if offset < size {
                break;
            }
            keep -= 1;
        }
        if keep < self.index.len() {
            tracing::warn!(
                segment = self.id.as_u64(),
                dropped = self.index.len() - keep,
                store_size = size,
                "dropping index slots past end of store"
            );
            self.index.truncate(keep)?;
        }

        let mut offset = match self.index.last_offset() {
            Some(last) => match self.store.read_entry(last) {
                Ok((_, next)) => next,
                Err(_) => return Ok(()),
            },
            None => 0,
        };
        let mut indexed = 0u64;
        while offset < size && !self.index.is_full() {
            let Ok((record, next)) = self.store.read_entry(offset) else {
                break;
            };
            if record.sequence.as_u64() != self.index.next_id() {
                break;
            }
            self.index.write(offset)?;
            indexed += 1;
            offset = next;
        }
        if indexed > 0 {
            tracing::warn!(
                segment = self.id.as_u64(),
                indexed,
                "indexed records missing from index"
            );
        }
        Ok(())
    }

    /// Appends `record` and returns the id it was indexed under.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SegmentFull`] if the index has no free slot
    /// - [`CoreError::Corruption`] if the record's sequence is not the
    ///   segment's next id
    /// - I/O errors from the store or index
    pub fn write(&mut self, record: &Record) -> CoreResult<u64> {
        if self.index.is_full() {
            return Err(CoreError::SegmentFull {
                segment_id: self.id.as_u64(),
                capacity: self.index.capacity(),
            });
        }
        let expected = self.index.next_id();
        if record.sequence.as_u64() != expected {
            return Err(CoreError::corruption(format!(
                "segment {} expects record {expected}, got {}",
                self.id.as_u64(),
                record.sequence.as_u64()
            )));
        }

        let offset = self.store.append(record)?;
        self.index.write(offset)
    }

    /// Reads the record with identifier `id`.
    ///
    /// # Errors
    ///
    /// Not-found errors for ids outside this segment, corruption errors if
    /// the index or store bytes are damaged.
    pub fn read(&self, id: u64) -> CoreResult<Record> {
        let offset = self.index.read(id)?;
        let record = self.store.read(offset)?;
        if record.sequence.as_u64() != id {
            return Err(CoreError::IndexCorruption {
                id,
                found: record.sequence.as_u64(),
            });
        }
        Ok(record)
    }

    /// Returns `true` if `id` was written to this segment.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        id >= self.index.start_id() && id < self.index.next_id()
    }

    /// Every record in the store, in append order.
    ///
    /// # Errors
    ///
    /// Returns the first decode or checksum error.
    pub fn records(&self) -> CoreResult<Vec<Record>> {
        self.store.scan().map(|entry| entry.map(|(_, r)| r)).collect()
    }

    /// Iterator over `(offset, record)` pairs of the store.
    #[must_use]
    pub fn scan(&self) -> StoreIter<'_> {
        self.store.scan()
    }

    /// Flushes the store buffer and the index mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if either flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        self.store.flush()?;
        self.index.flush()
    }

    /// Flushes, then fsyncs the store when `fsync` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn sync(&mut self, fsync: bool) -> CoreResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        self.store.sync(fsync)?;
        self.index.flush()
    }

    /// Durably syncs and closes, then reopens the segment read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync or the reopen fails.
    pub fn seal(mut self, config: &LogConfig) -> CoreResult<Self> {
        self.sync(true)?;
        let id = self.id;
        let dir = self.store_path.parent().map(Path::to_path_buf).unwrap_or_default();
        let start = self.index.start_id();
        let stores = Arc::clone(&self.stores);
        self.close()?;
        Self::open_with(&dir, &config.naming, id, config, start, OpenMode::ReadOnly, stores)
    }

    /// Replaces the store with its first `valid_len` bytes and trims the
    /// index to `records` entries.
    ///
    /// The prefix is written to a temporary file, synced, renamed over the
    /// store and the directory is synced before the store is reopened.
    pub(crate) fn truncate_store(&mut self, valid_len: u64, records: u64) -> CoreResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(seglog_storage::StorageError::ReadOnly {
                operation: "repair",
            }
            .into());
        }
        self.store.flush()?;
        let prefix = self.store.read_bytes(0, valid_len as usize)?;

        let mut temp_name = self.store_path.as_os_str().to_owned();
        temp_name.push(REPAIR_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        let mut file = File::create(&temp_path)?;
        file.write_all(&prefix)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.store_path)?;
        if let Some(dir) = self.store_path.parent() {
            sync_directory(dir)?;
        }

        let backend = self.stores.open(&self.store_path, OpenMode::ReadWrite)?;
        self.store = Store::new(backend, self.write_buffer_size)?;
        self.index.truncate(records)?;
        Ok(())
    }

    /// Flushes and releases both files.
    ///
    /// # Errors
    ///
    /// Returns the store's error first, then the index's.
    pub fn close(self) -> CoreResult<()> {
        let store = self.store.close();
        let index = self.index.close();
        store.and(index)
    }

    /// Deletes both files.
    ///
    /// Both removals are attempted; the first failure is reported and files
    /// already removed are not restored.
    ///
    /// # Errors
    ///
    /// Returns the first removal error.
    pub fn remove(self) -> CoreResult<()> {
        let Self {
            store,
            index,
            store_path,
            ..
        } = self;
        drop(store);
        let index = index.remove();
        let store = fs::remove_file(&store_path).map_err(CoreError::from);
        index.and(store)
    }

    /// Deletes a segment that other readers may still hold.
    ///
    /// Open handles keep the data readable until they are dropped.
    pub(crate) fn remove_shared(segment: Arc<Self>) -> CoreResult<()> {
        match Arc::try_unwrap(segment) {
            Ok(owned) => owned.remove(),
            Err(shared) => {
                let index = fs::remove_file(shared.index_path()).map_err(CoreError::from);
                let store = fs::remove_file(shared.store_path()).map_err(CoreError::from);
                index.and(store)
            }
        }
    }

    /// The segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Whether this segment accepts writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }

    /// First record id of this segment.
    #[must_use]
    pub fn start_id(&self) -> u64 {
        self.index.start_id()
    }

    /// Id the next write will receive.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.index.next_id()
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.index.len()
    }

    /// Returns `true` if no record was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() && self.store.is_empty()
    }

    /// Slot capacity of the index.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.index.capacity()
    }

    /// Returns `true` if the index has no free slot.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.index.is_full()
    }

    /// Logical store size, buffered bytes included.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.store.size()
    }

    /// Bytes waiting in the store buffer.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.store.buffered_len()
    }

    /// Path of the store file.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Path of the index file.
    #[must_use]
    pub fn index_path(&self) -> &Path {
        self.index.path()
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("start_id", &self.start_id())
            .field("next_id", &self.next_id())
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
