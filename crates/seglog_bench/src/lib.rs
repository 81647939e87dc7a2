//! Benchmark utilities.

use rand::Rng;
use seglog_core::{Log, LogConfig};
use std::time::Duration;
use tempfile::TempDir;

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Configuration without fsync or a background thread, so benchmarks
/// measure the log itself rather than the disk.
pub fn bench_config(records_per_segment: u64) -> LogConfig {
    LogConfig::new()
        .records_per_segment(records_per_segment)
        .max_segments(usize::MAX)
        .fsync(false)
        .sync_interval(Duration::ZERO)
}

/// Opens a log in a fresh temporary directory.
///
/// The directory is removed when the returned guard drops.
pub fn temp_log(config: LogConfig) -> (TempDir, Log) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let log = Log::open(dir.path(), config).expect("Failed to open log");
    (dir, log)
}

/// Opens a log pre-populated with `count` records of `payload_size` bytes.
pub fn populated_log(count: usize, payload_size: usize, config: LogConfig) -> (TempDir, Log) {
    let (dir, log) = temp_log(config);
    let payload = random_data(payload_size);
    for _ in 0..count {
        log.append(&payload).expect("append failed");
    }
    (dir, log)
}
