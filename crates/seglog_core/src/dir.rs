//! Log directory management.
//!
//! ```text
//! <log_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ SEQUENCE          # First id of the newest active segment
//! ├─ segment-0.log     # Store of segment 0
//! ├─ segment-0.idx     # Index of segment 0
//! ├─ segment-1.log
//! └─ segment-1.idx
//! ```
//!
//! The LOCK file ensures only one process appends to a log at a time.
//!
//! SEQUENCE keeps the sequence floor across restarts. An empty active
//! segment has no index slot to recover its first id from, and once older
//! segments are evicted or trimmed nothing else on disk remembers it.

use crate::config::{SegmentNaming, REPAIR_SUFFIX};
use crate::error::{CoreError, CoreResult};
use crate::types::SegmentId;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SEQUENCE_FILE: &str = "SEQUENCE";
const SEQUENCE_TEMP: &str = "SEQUENCE.tmp";
const SEQUENCE_MAGIC: [u8; 4] = *b"SLSQ";
const SEQUENCE_FILE_LEN: usize = 16;

/// Holds the exclusive lock on a log directory.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub(crate) struct LogDir {
    path: PathBuf,
    _lock_file: File,
}

impl LogDir {
    /// Opens (creating if missing) and locks a log directory.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfig`] if `path` exists and is not a directory
    /// - [`CoreError::LogLocked`] if another handle holds the lock
    /// - I/O errors
    pub(crate) fn open(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_config(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::LogLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Segment ids that have a store file, ascending.
    pub(crate) fn discover(&self, naming: &SegmentNaming) -> CoreResult<Vec<SegmentId>> {
        discover_segments(&self.path, naming)
    }

    /// Deletes store replacements left behind by an interrupted repair.
    ///
    /// Returns the number of files removed.
    pub(crate) fn remove_repair_leftovers(&self, naming: &SegmentNaming) -> CoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_leftover = name
                .strip_suffix(REPAIR_SUFFIX)
                .and_then(|store| naming.parse_store_file(store))
                .is_some();
            if is_leftover {
                tracing::warn!(file = name, "removing leftover repair file");
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            sync_directory(&self.path)?;
        }
        Ok(removed)
    }

    pub(crate) fn sync(&self) -> CoreResult<()> {
        sync_directory(&self.path)
    }

    /// Reads the persisted sequence floor.
    ///
    /// A missing file yields `None`. A damaged one is reported as
    /// corruption.
    pub(crate) fn load_sequence_floor(&self) -> CoreResult<Option<u64>> {
        let data = match fs::read(self.path.join(SEQUENCE_FILE)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_sequence_floor(&data).map(Some)
    }

    /// Persists the sequence floor with write, sync, rename, directory sync.
    pub(crate) fn save_sequence_floor(&self, next: u64) -> CoreResult<()> {
        let temp_path = self.path.join(SEQUENCE_TEMP);
        let mut file = File::create(&temp_path)?;
        file.write_all(&encode_sequence_floor(next))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(SEQUENCE_FILE))?;
        sync_directory(&self.path)?;
        tracing::debug!(next_sequence = next, "saved sequence floor");
        Ok(())
    }
}

fn encode_sequence_floor(next: u64) -> [u8; SEQUENCE_FILE_LEN] {
    let mut buf = [0u8; SEQUENCE_FILE_LEN];
    buf[..4].copy_from_slice(&SEQUENCE_MAGIC);
    buf[4..12].copy_from_slice(&next.to_le_bytes());
    let crc = crc32fast::hash(&buf[..12]);
    buf[12..].copy_from_slice(&crc.to_le_bytes());
    buf
}

fn decode_sequence_floor(data: &[u8]) -> CoreResult<u64> {
    if data.len() != SEQUENCE_FILE_LEN || data[..4] != SEQUENCE_MAGIC {
        return Err(CoreError::corruption("malformed SEQUENCE file"));
    }
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&data[12..]);
    if crc32fast::hash(&data[..12]) != u32::from_le_bytes(crc) {
        return Err(CoreError::corruption("SEQUENCE file checksum mismatch"));
    }
    let mut next = [0u8; 8];
    next.copy_from_slice(&data[4..12]);
    Ok(u64::from_le_bytes(next))
}

/// Segment ids with a store file in `path`, ascending.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub(crate) fn discover_segments(path: &Path, naming: &SegmentNaming) -> CoreResult<Vec<SegmentId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(|n| naming.parse_store_file(n)) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Syncs a directory so created, renamed or deleted entries are durable.
///
/// NTFS journals metadata, so this is a no-op off Unix.
#[cfg(unix)]
pub(crate) fn sync_directory(path: &Path) -> CoreResult<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}
