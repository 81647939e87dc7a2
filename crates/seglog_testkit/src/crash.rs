//! Crash and corruption injection.
//!
//! Two kinds of damage are supported:
//!
//! 1. **On-disk damage**: flip, cut or extend bytes of a closed segment
//!    file, then reopen or repair the log.
//! 2. **Torn writes**: wrap a backend in a [`CrashableBackend`] that stops
//!    accepting bytes partway through an append, leaving a partial record
//!    behind. [`CrashableStores`] does this for every store of a whole log.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use seglog_testkit::crash::{corrupt_byte, record_offsets};
//!
//! let offsets = record_offsets(&store_path);
//! corrupt_byte(&store_path, offsets[1] + 4);
//! ```

use seglog_core::{recovery, CoreResult, FileStores, OpenMode, StoreOpener};
use seglog_storage::{StorageBackend, StorageError, StorageResult};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Flips every bit of the byte at `offset`.
///
/// # Panics
///
/// Panics if the file cannot be read or written, or `offset` is out of range.
pub fn corrupt_byte(path: &Path, offset: u64) {
    let mut bytes = fs::read(path).expect("Failed to read file");
    let index = usize::try_from(offset).expect("offset out of range");
    assert!(index < bytes.len(), "offset {offset} past end of {}", path.display());
    bytes[index] ^= 0xFF;
    fs::write(path, &bytes).expect("Failed to write file");
}

/// Removes the last `bytes` bytes of a file.
///
/// # Panics
///
/// Panics if the file cannot be resized or is shorter than `bytes`.
pub fn truncate_tail(path: &Path, bytes: u64) {
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("Failed to open file");
    let len = file.metadata().expect("Failed to stat file").len();
    assert!(bytes <= len, "cannot cut {bytes} bytes from a {len} byte file");
    file.set_len(len - bytes).expect("Failed to truncate file");
}

/// Appends raw bytes to the end of a file.
///
/// # Panics
///
/// Panics if the file cannot be read or written.
pub fn append_garbage(path: &Path, garbage: &[u8]) {
    let mut bytes = fs::read(path).expect("Failed to read file");
    bytes.extend_from_slice(garbage);
    fs::write(path, &bytes).expect("Failed to write file");
}

/// Byte offset of every intact record in a store file.
///
/// # Panics
///
/// Panics if the store cannot be read.
pub fn record_offsets(path: &Path) -> Vec<u64> {
    let scan = recovery::verify_store(path).expect("Failed to scan store");
    let mut offset = 0;
    scan.records
        .iter()
        .map(|record| {
            let start = offset;
            offset += record.len_on_disk() as u64;
            start
        })
        .collect()
}

/// Offset of the last checksum byte of the record starting at `offset`.
///
/// # Panics
///
/// Panics if no intact record starts at `offset`.
pub fn checksum_byte_of(path: &Path, offset: u64) -> u64 {
    let scan = recovery::verify_store(path).expect("Failed to scan store");
    let mut start = 0;
    for record in &scan.records {
        let len = record.len_on_disk() as u64;
        if start == offset {
            return start + len - 1;
        }
        start += len;
    }
    panic!("no record at offset {offset} in {}", path.display());
}

/// Shared switch controlling a [`CrashableBackend`].
///
/// The backend is usually boxed inside a store, so the switch is the test's
/// handle on it.
#[derive(Debug)]
pub struct CrashSwitch {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }
}

impl CrashSwitch {
    /// Crashes once `bytes` bytes in total have been accepted.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Resets the crash state.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }
}

fn simulated(message: &str) -> StorageError {
    StorageError::Io(io::Error::other(message.to_string()))
}

/// A storage backend wrapper that can simulate crashes.
///
/// An append that crosses the crash threshold writes only the bytes below
/// it and then fails, leaving a torn record in the inner backend.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Wraps `inner`, returning the backend and its switch.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, Arc<CrashSwitch>) {
        let switch = Arc::new(CrashSwitch::default());
        let backend = Self::with_switch(inner, Arc::clone(&switch));
        (backend, switch)
    }

    /// Wraps `inner` under an existing switch.
    pub fn with_switch(inner: Box<dyn StorageBackend>, switch: Arc<CrashSwitch>) -> Self {
        Self { inner, switch }
    }
}

/// Opens every store of a log as a [`CrashableBackend`] over a plain file.
///
/// All stores share one switch, so its byte budget spans segments.
///
/// ```rust,ignore
/// let stores = CrashableStores::new();
/// let switch = stores.switch();
/// let log = TempLog::with_stores(test_config(8), Arc::new(stores));
/// switch.crash_after(switch.bytes_written() + 5);
/// assert!(log.append(b"torn").is_err());
/// ```
#[derive(Debug, Default)]
pub struct CrashableStores {
    switch: Arc<CrashSwitch>,
}

impl CrashableStores {
    /// Creates an opener with a fresh switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The switch shared by every store this opener hands out.
    #[must_use]
    pub fn switch(&self) -> Arc<CrashSwitch> {
        Arc::clone(&self.switch)
    }
}

impl StoreOpener for CrashableStores {
    fn open(&self, path: &Path, mode: OpenMode) -> CoreResult<Box<dyn StorageBackend>> {
        let inner = FileStores.open(path, mode)?;
        Ok(Box::new(CrashableBackend::with_switch(
            inner,
            Arc::clone(&self.switch),
        )))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        if self.switch.has_crashed() {
            return Err(simulated("backend crashed"));
        }

        let current = self.switch.bytes_written.load(Ordering::SeqCst);
        let threshold = self.switch.crash_after_bytes.load(Ordering::SeqCst);
        let allowed = threshold.saturating_sub(current);

        if bytes.len() > allowed {
            if allowed > 0 {
                self.inner.append(&bytes[..allowed])?;
                self.inner.flush()?;
            }
            self.switch.bytes_written.fetch_add(allowed, Ordering::SeqCst);
            self.switch.crashed.store(true, Ordering::SeqCst);
            return Err(simulated("simulated crash during write"));
        }

        let offset = self.inner.append(bytes)?;
        self.switch.bytes_written.fetch_add(bytes.len(), Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(simulated("backend crashed"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.has_crashed() || self.switch.fail_on_sync.load(Ordering::SeqCst) {
            return Err(simulated("simulated sync failure"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }
}
