//! Test fixtures and log helpers.
//!
//! Provides temporary logs that clean up after themselves.

use seglog_core::{CoreResult, Log, LogConfig, SegmentId, StoreOpener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Configuration for tests: `records` slots per segment, no fsync and no
/// background thread.
#[must_use]
pub fn test_config(records: u64) -> LogConfig {
    LogConfig::new()
        .records_per_segment(records)
        .fsync(false)
        .sync_interval(Duration::ZERO)
}

/// A log in a temporary directory.
pub struct TempLog {
    log: Option<Log>,
    config: LogConfig,
    stores: Option<Arc<dyn StoreOpener>>,
    dir: TempDir,
}

impl TempLog {
    /// Opens a fresh log with `config`.
    pub fn new(config: LogConfig) -> Self {
        Self::create(config, None)
    }

    /// Opens a fresh log whose stores come from `stores`, also on reopen.
    pub fn with_stores(config: LogConfig, stores: Arc<dyn StoreOpener>) -> Self {
        Self::create(config, Some(stores))
    }

    fn create(config: LogConfig, stores: Option<Arc<dyn StoreOpener>>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let mut temp = Self {
            log: None,
            config,
            stores,
            dir,
        };
        temp.log = Some(temp.open().expect("Failed to open log"));
        temp
    }

    fn open(&self) -> CoreResult<Log> {
        match &self.stores {
            Some(stores) => {
                Log::open_with_stores(self.dir.path(), self.config.clone(), Arc::clone(stores))
            }
            None => Log::open(self.dir.path(), self.config.clone()),
        }
    }

    /// Opens a fresh log with four records per segment.
    pub fn small() -> Self {
        Self::new(test_config(4))
    }

    /// Closes the log and opens it again from disk.
    #[must_use]
    pub fn reopen(mut self) -> Self {
        self.close();
        self.log = Some(self.open().expect("Failed to reopen log"));
        self
    }

    /// Closes and drops the log, keeping the directory.
    pub fn close(&mut self) {
        if let Some(log) = self.log.take() {
            log.close().expect("Failed to close log");
        }
    }

    /// Directory of the log.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration the log was opened with.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Path of the store file of segment `id`.
    pub fn store_path(&self, id: u64) -> PathBuf {
        self.path().join(self.config.naming.store_file(SegmentId::new(id)))
    }

    /// Path of the index file of segment `id`.
    pub fn index_path(&self, id: u64) -> PathBuf {
        self.path().join(self.config.naming.index_file(SegmentId::new(id)))
    }

    /// The open log.
    pub fn log(&self) -> &Log {
        self.log.as_ref().expect("log is closed")
    }
}

impl std::ops::Deref for TempLog {
    type Target = Log;

    fn deref(&self) -> &Self::Target {
        self.log()
    }
}

/// Runs a test with a temporary log.
///
/// # Example
///
/// ```rust,ignore
/// use seglog_testkit::{test_config, with_temp_log};
///
/// with_temp_log(test_config(4), |log| {
///     log.append(b"x").unwrap();
/// });
/// ```
pub fn with_temp_log<F, R>(config: LogConfig, f: F) -> R
where
    F: FnOnce(&Log) -> R,
{
    let temp = TempLog::new(config);
    f(temp.log())
}

/// Appends every payload and returns the assigned sequence numbers.
pub fn append_all<P: AsRef<[u8]>>(log: &Log, payloads: &[P]) -> Vec<u64> {
    payloads
        .iter()
        .map(|p| log.append(p.as_ref()).expect("append failed").as_u64())
        .collect()
}
