//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod repair;
pub mod verify;

use seglog_core::LogConfig;
use std::path::Path;
use std::time::Duration;

/// Configuration used by every command.
///
/// Segment capacities come from the files on disk, so only settings that
/// matter to a short-lived, read-mostly handle are changed.
pub fn cli_config() -> LogConfig {
    LogConfig::default().sync_interval(Duration::ZERO)
}

/// Fails unless `path` is a directory holding at least one segment.
pub fn ensure_log_exists(path: &Path, config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No log found at {}", path.display()).into());
    }
    if seglog_core::recovery::list_segments(path, config)?.is_empty() {
        return Err(format!("No segments found in {}", path.display()).into());
    }
    Ok(())
}
