//! Segment storage.
//!
//! A segment pairs one append-only store file with one fixed-capacity,
//! memory-mapped index file. Both share a numeric segment id in their file
//! names (`segment-<N>.log` / `segment-<N>.idx` by default).
//!
//! ## Store Record Format
//!
//! ```text
//! | len: i32 LE | sequence: u64 LE | flags: u8 | payload (N) | crc32: u32 LE |
//! ```
//!
//! `len` counts everything after itself (13 + N bytes).
//!
//! Flags:
//! - `0x01` = checkpoint
//!
//! ## Index Slot Format
//!
//! ```text
//! | record id: u64 BE | store offset: u64 BE |
//! ```

mod files;
mod index;
mod record;
mod store;

pub use files::Segment;
pub use index::{Index, SLOT_SIZE};
pub use record::{
    compute_checksum, parse_length_prefix, Record, LENGTH_PREFIX_SIZE, MIN_BODY_SIZE,
};
pub use store::{Store, StoreIter};

use crate::error::CoreResult;
use seglog_storage::{FileBackend, StorageBackend};
use std::path::Path;

/// How a segment's files are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// The active segment: appends allowed, files created if missing.
    ReadWrite,
    /// A sealed segment: existing files only, no writes.
    ReadOnly,
}

/// Opens the storage backend behind a segment's store file.
///
/// [`crate::Log::open_with_stores`] takes one of these so stores can sit on
/// something other than plain files. Index files are always memory-mapped
/// files.
pub trait StoreOpener: Send + Sync {
    /// Opens the store at `path`. [`OpenMode::ReadWrite`] creates it if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    fn open(&self, path: &Path, mode: OpenMode) -> CoreResult<Box<dyn StorageBackend>>;
}

/// Stores as plain files through [`FileBackend`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStores;

impl StoreOpener for FileStores {
    fn open(&self, path: &Path, mode: OpenMode) -> CoreResult<Box<dyn StorageBackend>> {
        let backend = match mode {
            OpenMode::ReadWrite => FileBackend::open(path)?,
            OpenMode::ReadOnly => FileBackend::open_read_only(path)?,
        };
        Ok(Box::new(backend))
    }
}
