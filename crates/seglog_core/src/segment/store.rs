//! Append-only record store.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{parse_length_prefix, Record, LENGTH_PREFIX_SIZE};
use seglog_storage::{StorageBackend, StorageError};

/// Append-only container of length-prefixed, checksummed records.
///
/// Appends land in an in-memory write buffer first and reach the backend on
/// [`Store::flush`] or once the buffer grows past its limit. Offsets are
/// logical: they count buffered bytes too, so an offset handed out before a
/// flush stays valid after it.
///
/// # Invariants
///
/// - The logical size only grows while the store is open
/// - An offset, once returned by `append`, is never reused
pub struct Store {
    backend: Box<dyn StorageBackend>,
    buffer: Vec<u8>,
    buffer_limit: usize,
    durable_size: u64,
}

impl Store {
    /// Wraps a backend, appending after whatever it already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn new(backend: Box<dyn StorageBackend>, buffer_limit: usize) -> CoreResult<Self> {
        let durable_size = backend.size()?;
        Ok(Self {
            backend,
            buffer: Vec::new(),
            buffer_limit,
            durable_size,
        })
    }

    /// Appends a record and returns the offset of its length prefix.
    ///
    /// If spilling the buffer fails, the record is dropped again and the
    /// logical size is what it was before the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded, the store is
    /// read-only, or spilling the buffer fails.
    pub fn append(&mut self, record: &Record) -> CoreResult<u64> {
        if self.backend.is_read_only() {
            return Err(StorageError::ReadOnly { operation: "append" }.into());
        }

        let encoded = record.encode()?;
        let offset = self.size();
        let buffered = self.buffer.len();
        self.buffer.extend_from_slice(&encoded);

        if self.buffer.len() >= self.buffer_limit {
            if let Err(e) = self.flush() {
                self.buffer.truncate(buffered);
                return Err(e);
            }
        }

        Ok(offset)
    }

    /// Reads and verifies the record starting at `offset`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidOffset`] if `offset` is at or past the end
    /// - [`CoreError::TruncatedRecord`] if the prefix or body runs past the end
    /// - [`CoreError::ChecksumMismatch`] / [`CoreError::Corruption`] for bad bytes
    pub fn read(&self, offset: u64) -> CoreResult<Record> {
        self.read_entry(offset).map(|(record, _)| record)
    }

    /// Reads the record at `offset` and returns it with the offset of the
    /// record that follows it.
    ///
    /// # Errors
    ///
    /// Same as [`Store::read`].
    pub fn read_entry(&self, offset: u64) -> CoreResult<(Record, u64)> {
        let size = self.size();
        if offset >= size {
            return Err(CoreError::InvalidOffset { offset, size });
        }

        let available = size - offset;
        if available < LENGTH_PREFIX_SIZE as u64 {
            return Err(CoreError::TruncatedRecord {
                offset,
                needed: LENGTH_PREFIX_SIZE as u64,
                available,
            });
        }

        let prefix_bytes = self.read_bytes(offset, LENGTH_PREFIX_SIZE)?;
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&prefix_bytes);
        let body_len = parse_length_prefix(prefix, offset)?;

        let needed = (LENGTH_PREFIX_SIZE + body_len) as u64;
        if needed > available {
            return Err(CoreError::TruncatedRecord {
                offset,
                needed,
                available,
            });
        }

        let body = self.read_bytes(offset + LENGTH_PREFIX_SIZE as u64, body_len)?;
        let record = Record::decode_body(&body)?;
        Ok((record, offset + needed))
    }

    /// Returns an iterator over every record from the start of the store.
    ///
    /// The iterator stops after the first error it yields.
    #[must_use]
    pub fn scan(&self) -> StoreIter<'_> {
        StoreIter {
            store: self,
            offset: 0,
            finished: false,
        }
    }

    /// Reads `len` raw bytes at `offset`, spanning file and buffer.
    pub(crate) fn read_bytes(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        let end = offset + len as u64;
        if end <= self.durable_size {
            return Ok(self.backend.read_at(offset, len)?);
        }

        let mut out = Vec::with_capacity(len);
        if offset < self.durable_size {
            let head = (self.durable_size - offset) as usize;
            out.extend_from_slice(&self.backend.read_at(offset, head)?);
        }

        let buf_start = offset.saturating_sub(self.durable_size) as usize;
        let buf_end = (end - self.durable_size) as usize;
        let tail = self.buffer.get(buf_start..buf_end).ok_or(CoreError::InvalidOffset {
            offset,
            size: self.size(),
        })?;
        out.extend_from_slice(tail);
        Ok(out)
    }

    /// Writes buffered bytes to the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails. The buffer is kept and
    /// whatever part of it reached the backend is cut off again.
    pub fn flush(&mut self) -> CoreResult<()> {
        if !self.buffer.is_empty() {
            if let Err(e) = self.backend.append(&self.buffer) {
                self.discard_partial_write();
                return Err(e.into());
            }
            self.buffer.clear();
            self.durable_size = self.backend.size()?;
        }
        self.backend.flush()?;
        Ok(())
    }

    /// Truncates the backend back to the durable size after a failed write.
    ///
    /// If that fails too, the torn bytes stay and are counted as durable so
    /// later offsets still match the backend; repair cuts them off.
    fn discard_partial_write(&mut self) {
        let Ok(size) = self.backend.size() else {
            return;
        };
        if size <= self.durable_size {
            return;
        }
        match self.backend.truncate(self.durable_size) {
            Ok(()) => tracing::warn!(
                discarded = size - self.durable_size,
                "discarded partial write"
            ),
            Err(e) => {
                tracing::error!(error = %e, size, "failed to discard partial write");
                self.durable_size = size;
            }
        }
    }

    /// Flushes and, when `fsync` is set, syncs the backend to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    pub fn sync(&mut self, fsync: bool) -> CoreResult<()> {
        self.flush()?;
        if fsync {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Logical size: durable bytes plus buffered bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.durable_size + self.buffer.len() as u64
    }

    /// Bytes handed to the backend.
    #[must_use]
    pub fn durable_size(&self) -> u64 {
        self.durable_size
    }

    /// Bytes waiting in the write buffer.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if the store holds no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Flushes pending bytes and releases the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(mut self) -> CoreResult<()> {
        if !self.backend.is_read_only() {
            self.flush()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("durable_size", &self.durable_size)
            .field("buffered", &self.buffer.len())
            .field("read_only", &self.backend.is_read_only())
            .finish_non_exhaustive()
    }
}

/// Iterator over `(offset, record)` pairs of a [`Store`].
pub struct StoreIter<'a> {
    store: &'a Store,
    offset: u64,
    finished: bool,
}

impl Iterator for StoreIter<'_> {
    type Item = CoreResult<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.offset >= self.store.size() {
            return None;
        }

        let offset = self.offset;
        match self.store.read_entry(offset) {
            Ok((record, next)) => {
                self.offset = next;
                Some(Ok((offset, record)))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SequenceNumber;
    use seglog_storage::InMemoryBackend;

    fn record(seq: u64, payload: &[u8]) -> Record {
        Record::new(SequenceNumber::new(seq), payload.to_vec(), false)
    }

    fn create_store(buffer_limit: usize) -> (Store, InMemoryBackend) {
        let backend = InMemoryBackend::new();
        let store = Store::new(Box::new(backend.clone()), buffer_limit).unwrap();
        (store, backend)
    }

    #[test]
    fn append_returns_record_offsets() {
        let (mut store, _) = create_store(1024);
        let first = store.append(&record(1, b"a")).unwrap();
        let second = store.append(&record(2, b"bb")).unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, Record::encoded_len(1) as u64);
        assert_eq!(store.size(), (Record::encoded_len(1) + Record::encoded_len(2)) as u64);
    }

    #[test]
    fn reads_buffered_and_flushed_records() {
        let (mut store, backend) = create_store(1024);
        let a = store.append(&record(1, b"flushed")).unwrap();
        store.flush().unwrap();
        let b = store.append(&record(2, b"buffered")).unwrap();

        assert_eq!(backend.size().unwrap(), store.durable_size());
        assert!(store.buffered_len() > 0);
        assert_eq!(store.read(a).unwrap().payload, b"flushed");
        assert_eq!(store.read(b).unwrap().payload, b"buffered");
    }

    #[test]
    fn buffer_spills_past_limit() {
        let (mut store, backend) = create_store(16);
        store.append(&record(1, b"0123456789")).unwrap();

        assert_eq!(store.buffered_len(), 0);
        assert_eq!(backend.size().unwrap(), Record::encoded_len(10) as u64);
    }

    #[test]
    fn offset_past_end_is_not_found() {
        let (mut store, _) = create_store(1024);
        store.append(&record(1, b"x")).unwrap();

        let err = store.read(store.size()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn truncated_tail_is_corruption() {
        let encoded = record(1, b"hello").encode().unwrap();
        let cut = encoded[..encoded.len() - 2].to_vec();
        let store = Store::new(Box::new(InMemoryBackend::with_data(cut)), 1024).unwrap();

        let err = store.read(0).unwrap_err();
        assert!(matches!(err, CoreError::TruncatedRecord { offset: 0, .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn partial_length_prefix_is_corruption() {
        let store = Store::new(Box::new(InMemoryBackend::with_data(vec![9, 0])), 1024).unwrap();
        assert!(matches!(
            store.read(0),
            Err(CoreError::TruncatedRecord { needed: 4, available: 2, .. })
        ));
    }

    #[test]
    fn damaged_payload_fails_checksum() {
        let (mut store, backend) = create_store(1024);
        let offset = store.append(&record(1, b"hello")).unwrap();
        store.flush().unwrap();

        backend.overwrite(offset + 13, b"J").unwrap();
        assert!(matches!(
            store.read(offset),
            Err(CoreError::ChecksumMismatch { sequence: 1, .. })
        ));
    }

    #[test]
    fn scan_yields_records_in_order() {
        let (mut store, _) = create_store(20);
        for seq in 1..=5u64 {
            store.append(&record(seq, &[seq as u8; 7])).unwrap();
        }

        let records: Vec<_> = store.scan().collect::<CoreResult<_>>().unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].0, 0);
        for (i, (_, rec)) in records.iter().enumerate() {
            assert_eq!(rec.sequence.as_u64(), i as u64 + 1);
        }
    }

    #[test]
    fn scan_stops_after_error() {
        let mut bytes = record(1, b"ok").encode().unwrap();
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 1, 2]);
        let store = Store::new(Box::new(InMemoryBackend::with_data(bytes)), 1024).unwrap();

        let items: Vec<_> = store.scan().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    /// Accepts `room` more bytes, then writes what fits and fails.
    struct Cramped {
        inner: InMemoryBackend,
        room: usize,
    }

    impl StorageBackend for Cramped {
        fn read_at(&self, offset: u64, len: usize) -> seglog_storage::StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, bytes: &[u8]) -> seglog_storage::StorageResult<u64> {
            if bytes.len() > self.room {
                let fits = std::mem::take(&mut self.room);
                self.inner.append(&bytes[..fits])?;
                return Err(StorageError::Io(std::io::Error::other("no space left")));
            }
            self.room -= bytes.len();
            self.inner.append(bytes)
        }

        fn flush(&mut self) -> seglog_storage::StorageResult<()> {
            Ok(())
        }

        fn size(&self) -> seglog_storage::StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> seglog_storage::StorageResult<()> {
            Ok(())
        }

        fn truncate(&mut self, new_size: u64) -> seglog_storage::StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    #[test]
    fn failed_spill_drops_record_and_torn_bytes() {
        let memory = InMemoryBackend::new();
        let room = Record::encoded_len(4) + 5;
        let backend = Cramped {
            inner: memory.clone(),
            room,
        };
        let mut store = Store::new(Box::new(backend), 0).unwrap();

        store.append(&record(1, b"kept")).unwrap();
        let size = store.size();
        assert!(store.append(&record(2, b"lost")).is_err());

        assert_eq!(store.size(), size);
        assert_eq!(store.buffered_len(), 0);
        assert_eq!(memory.size().unwrap(), size);
        assert_eq!(store.read(0).unwrap().payload, b"kept");
    }

    #[test]
    fn failed_flush_keeps_buffer_for_retry() {
        let memory = InMemoryBackend::new();
        let backend = Cramped {
            inner: memory.clone(),
            room: 3,
        };
        let mut store = Store::new(Box::new(backend), 1024).unwrap();

        store.append(&record(1, b"waiting")).unwrap();
        assert!(store.flush().is_err());
        assert_eq!(store.buffered_len(), Record::encoded_len(7));
        assert!(memory.data().is_empty());
        assert_eq!(store.read(0).unwrap().payload, b"waiting");
    }

    #[test]
    fn existing_bytes_are_preserved() {
        let first = record(1, b"old").encode().unwrap();
        let backend = InMemoryBackend::with_data(first.clone());
        let mut store = Store::new(Box::new(backend.clone()), 1024).unwrap();

        let offset = store.append(&record(2, b"new")).unwrap();
        assert_eq!(offset, first.len() as u64);
        store.close().unwrap();
        assert_eq!(&backend.data()[..first.len()], &first[..]);
    }
}
