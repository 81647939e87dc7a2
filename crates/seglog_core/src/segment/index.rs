//! Fixed-capacity, memory-mapped offset index.
//!
//! ## Slot Format
//!
//! ```text
//! | record id: u64 BE | store offset: u64 BE |   16 bytes per slot
//! ```
//!
//! The file is preallocated to its full capacity, so unwritten slots read
//! as zeros. A slot is occupied unless both fields are zero; ids start at
//! one, which keeps the first record (store offset 0) distinguishable from
//! an empty slot.

use crate::config::validate_index_size;
use crate::error::{CoreError, CoreResult};
use crate::segment::OpenMode;
use crate::types::SegmentId;
use memmap2::{Mmap, MmapMut};
use seglog_storage::StorageError;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Width of one index slot in bytes.
pub const SLOT_SIZE: u64 = 16;

enum Mapping {
    Writable(MmapMut),
    ReadOnly(Mmap),
    /// A zero-length file opened read-only cannot be mapped.
    Empty,
}

impl Mapping {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Writable(map) => map,
            Self::ReadOnly(map) => map,
            Self::Empty => &[],
        }
    }
}

/// Maps sequential record identifiers to store offsets.
pub struct Index {
    path: PathBuf,
    segment_id: SegmentId,
    _file: File,
    map: Mapping,
    /// Capacity in bytes.
    capacity: u64,
    /// Bytes of occupied slots.
    size: u64,
    start_id: u64,
    next_id: u64,
}

impl Index {
    /// Opens (creating if writable and missing) the index file at `path`.
    ///
    /// A writable index is grown to `max_bytes`. The occupied prefix is
    /// found by scanning 16-byte strides up to the first all-zero slot. The
    /// first identifier comes from slot 0 when it is occupied, otherwise
    /// from `start_id_hint`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfig`] if `max_bytes` is not a positive
    ///   multiple of 16, `start_id_hint` is zero, or slot 0 holds id zero.
    ///   Nothing is created in these cases.
    /// - [`CoreError::Corruption`] if an existing file has a torn slot
    /// - I/O errors opening or mapping the file
    pub fn open(
        path: &Path,
        segment_id: SegmentId,
        max_bytes: u64,
        start_id_hint: u64,
        mode: OpenMode,
    ) -> CoreResult<Self> {
        if start_id_hint == 0 {
            return Err(CoreError::invalid_config("record id must not be zero"));
        }
        let (file, map, capacity) = match mode {
            OpenMode::ReadWrite => {
                validate_index_size(max_bytes)?;
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)?;
                let len = file.metadata()?.len();
                check_slot_aligned(path, len)?;
                // Capacity is fixed when the file is first sized.
                let capacity = if len == 0 {
                    file.set_len(max_bytes)?;
                    max_bytes
                } else {
                    len
                };
                let map = Mapping::Writable(map_writable(&file)?);
                (file, map, capacity)
            }
            OpenMode::ReadOnly => {
                let file = OpenOptions::new().read(true).open(path)?;
                let len = file.metadata()?.len();
                check_slot_aligned(path, len)?;
                let map = if len == 0 {
                    Mapping::Empty
                } else {
                    Mapping::ReadOnly(map_read_only(&file)?)
                };
                (file, map, len)
            }
        };

        let bytes = map.bytes();
        let mut size = 0u64;
        while size < capacity {
            let (id, offset) = read_slot(bytes, size);
            if id == 0 && offset == 0 {
                break;
            }
            size += SLOT_SIZE;
        }

        let start_id = if size > 0 {
            read_slot(bytes, 0).0
        } else {
            start_id_hint
        };
        if start_id == 0 {
            return Err(CoreError::invalid_config("record id must not be zero"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            segment_id,
            _file: file,
            map,
            capacity,
            size,
            start_id,
            next_id: start_id + size / SLOT_SIZE,
        })
    }

    /// Appends a slot for `offset` and returns the identifier it received.
    ///
    /// The slot is flushed to disk before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SegmentFull`] when no slot is left, or an error
    /// if the index is read-only or the flush fails.
    pub fn write(&mut self, offset: u64) -> CoreResult<u64> {
        let pos = (self.next_id - self.start_id) * SLOT_SIZE;
        if pos + SLOT_SIZE > self.capacity {
            return Err(CoreError::SegmentFull {
                segment_id: self.segment_id.as_u64(),
                capacity: self.capacity(),
            });
        }

        let id = self.next_id;
        let map = self.writable("write")?;
        let start = pos as usize;
        map[start..start + 8].copy_from_slice(&id.to_be_bytes());
        map[start + 8..start + 16].copy_from_slice(&offset.to_be_bytes());
        map.flush_range(start, SLOT_SIZE as usize)?;

        self.size += SLOT_SIZE;
        self.next_id += 1;
        Ok(id)
    }

    /// Resolves `id` to its store offset.
    ///
    /// # Errors
    ///
    /// - [`CoreError::RecordNotFound`] for id zero or ids outside the
    ///   written range
    /// - [`CoreError::IndexCorruption`] if the slot holds a different id
    pub fn read(&self, id: u64) -> CoreResult<u64> {
        if id == 0 || id < self.start_id || id >= self.next_id {
            return Err(CoreError::RecordNotFound { id });
        }

        let pos = (id - self.start_id) * SLOT_SIZE;
        let (stored_id, offset) = read_slot(self.map.bytes(), pos);
        if stored_id != id {
            return Err(CoreError::IndexCorruption {
                id,
                found: stored_id,
            });
        }
        Ok(offset)
    }

    /// Keeps the first `entries` slots and zeroes the rest.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is read-only or the flush fails.
    pub fn truncate(&mut self, entries: u64) -> CoreResult<()> {
        if entries >= self.len() {
            return Ok(());
        }

        let keep = entries * SLOT_SIZE;
        let end = self.size as usize;
        let map = self.writable("truncate")?;
        map[keep as usize..end].fill(0);
        map.flush()?;

        self.size = keep;
        self.next_id = self.start_id + entries;
        Ok(())
    }

    /// Flushes the whole mapped region.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        if let Mapping::Writable(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.size / SLOT_SIZE
    }

    /// Returns `true` if no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity / SLOT_SIZE
    }

    /// Returns `true` if the next write would fail with `SegmentFull`.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.size + SLOT_SIZE > self.capacity
    }

    /// First identifier of this index.
    #[must_use]
    pub fn start_id(&self) -> u64 {
        self.start_id
    }

    /// Identifier the next write will receive.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Store offset recorded in the last occupied slot.
    #[must_use]
    pub fn last_offset(&self) -> Option<u64> {
        if self.size == 0 {
            return None;
        }
        Some(read_slot(self.map.bytes(), self.size - SLOT_SIZE).1)
    }

    /// Path of the index file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and unmaps the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(self) -> CoreResult<()> {
        self.flush()
    }

    /// Unmaps the index and deletes its file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn remove(self) -> CoreResult<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(path)?;
        Ok(())
    }

    fn writable(&mut self, operation: &'static str) -> CoreResult<&mut MmapMut> {
        match &mut self.map {
            Mapping::Writable(map) => Ok(map),
            _ => Err(StorageError::ReadOnly { operation }.into()),
        }
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path)
            .field("start_id", &self.start_id)
            .field("next_id", &self.next_id)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

fn read_slot(bytes: &[u8], pos: u64) -> (u64, u64) {
    let start = pos as usize;
    let mut id = [0u8; 8];
    let mut offset = [0u8; 8];
    id.copy_from_slice(&bytes[start..start + 8]);
    offset.copy_from_slice(&bytes[start + 8..start + 16]);
    (u64::from_be_bytes(id), u64::from_be_bytes(offset))
}

fn check_slot_aligned(path: &Path, len: u64) -> CoreResult<()> {
    if len % SLOT_SIZE != 0 {
        return Err(CoreError::corruption(format!(
            "index {} has length {len}, not a multiple of {SLOT_SIZE}",
            path.display()
        )));
    }
    Ok(())
}

#[allow(unsafe_code)]
fn map_writable(file: &File) -> CoreResult<MmapMut> {
    // SAFETY: the index file is owned by a single writable `Index`; the log
    // directory lock keeps other processes from resizing it while mapped.
    Ok(unsafe { MmapMut::map_mut(file)? })
}

#[allow(unsafe_code)]
fn map_read_only(file: &File) -> CoreResult<Mmap> {
    // SAFETY: sealed indexes are never written again; only eviction removes
    // them, which leaves existing mappings valid.
    Ok(unsafe { Mmap::map(file)? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_rw(path: &Path, max_bytes: u64, start: u64) -> CoreResult<Index> {
        Index::open(path, SegmentId::new(0), max_bytes, start, OpenMode::ReadWrite)
    }

    #[test]
    fn write_assigns_sequential_ids() {
        let dir = tempdir().unwrap();
        let mut index = open_rw(&dir.path().join("s.idx"), 64, 1).unwrap();

        assert_eq!(index.write(0).unwrap(), 1);
        assert_eq!(index.write(20).unwrap(), 2);
        assert_eq!(index.write(45).unwrap(), 3);

        assert_eq!(index.read(2).unwrap(), 20);
        assert_eq!(index.read(1).unwrap(), 0);
        assert_eq!(index.last_offset(), Some(45));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn slot_layout_is_big_endian() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        let mut index = open_rw(&path, 32, 7).unwrap();
        index.write(0x0102).unwrap();
        index.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..8], &7u64.to_be_bytes());
        assert_eq!(&bytes[8..16], &0x0102u64.to_be_bytes());
        assert!(bytes[16..].iter().all(|&b| b == 0));
    }

    #[test]
    fn full_index_rejects_write() {
        let dir = tempdir().unwrap();
        let mut index = open_rw(&dir.path().join("s.idx"), 32, 1).unwrap();
        index.write(0).unwrap();
        index.write(10).unwrap();

        assert!(index.is_full());
        assert!(matches!(
            index.write(20),
            Err(CoreError::SegmentFull { capacity: 2, .. })
        ));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn misaligned_capacity_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        for bad in [0, 8, 33] {
            let err = open_rw(&path, bad, 1).unwrap_err();
            assert!(matches!(err, CoreError::InvalidConfig { .. }));
        }
        // Nothing was created by the failed opens.
        assert!(!path.exists());
    }

    #[test]
    fn not_found_boundaries() {
        let dir = tempdir().unwrap();
        let mut index = open_rw(&dir.path().join("s.idx"), 64, 5).unwrap();
        index.write(0).unwrap();

        for id in [0, 4, 6, 100] {
            let err = index.read(id).unwrap_err();
            assert!(matches!(err, CoreError::RecordNotFound { .. }), "id {id}");
        }
    }

    #[test]
    fn reopen_rebuilds_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        {
            let mut index = open_rw(&path, 64, 10).unwrap();
            index.write(0).unwrap();
            index.write(30).unwrap();
            index.close().unwrap();
        }

        // The hint is ignored once slot 0 is occupied.
        let mut index = open_rw(&path, 64, 99).unwrap();
        assert_eq!(index.start_id(), 10);
        assert_eq!(index.next_id(), 12);
        assert_eq!(index.read(11).unwrap(), 30);
        assert_eq!(index.write(60).unwrap(), 12);
    }

    #[test]
    fn existing_file_keeps_its_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        open_rw(&path, 32, 1).unwrap().close().unwrap();

        let index = open_rw(&path, 1024, 1).unwrap();
        assert_eq!(index.capacity(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);
    }

    #[test]
    fn zero_start_id_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        let err = open_rw(&path, 64, 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn mismatched_slot_is_corruption_not_panic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        {
            let mut index = open_rw(&path, 64, 1).unwrap();
            index.write(0).unwrap();
            index.write(10).unwrap();
            index.close().unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[16..24].copy_from_slice(&42u64.to_be_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let index = open_rw(&path, 64, 1).unwrap();
        assert!(matches!(
            index.read(2),
            Err(CoreError::IndexCorruption { id: 2, found: 42 })
        ));
    }

    #[test]
    fn truncate_zeroes_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        let mut index = open_rw(&path, 64, 1).unwrap();
        for offset in [0, 10, 20] {
            index.write(offset).unwrap();
        }

        index.truncate(1).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.next_id(), 2);
        assert!(index.read(2).is_err());
        assert_eq!(index.write(99).unwrap(), 2);
        index.close().unwrap();

        let reopened = open_rw(&path, 64, 1).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.read(2).unwrap(), 99);
    }

    #[test]
    fn read_only_index_serves_reads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        {
            let mut index = open_rw(&path, 64, 3).unwrap();
            index.write(0).unwrap();
            index.close().unwrap();
        }

        let mut index =
            Index::open(&path, SegmentId::new(0), 64, 1, OpenMode::ReadOnly).unwrap();
        assert_eq!(index.read(3).unwrap(), 0);
        assert!(matches!(
            index.write(5),
            Err(CoreError::Storage(StorageError::ReadOnly { .. }))
        ));
    }

    #[test]
    fn empty_read_only_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.idx");
        std::fs::File::create(&path).unwrap();

        let index = Index::open(&path, SegmentId::new(0), 64, 4, OpenMode::ReadOnly).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.start_id(), 4);
        assert!(index.is_full());
    }
}
