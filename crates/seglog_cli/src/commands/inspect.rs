//! Inspect command implementation.

use super::{cli_config, ensure_log_exists};
use seglog_core::Log;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Log path.
    pub path: String,
    /// Number of segments on disk.
    pub segment_count: usize,
    /// Id of the active segment.
    pub active_segment: u64,
    /// Oldest retained sequence number.
    pub first_sequence: Option<u64>,
    /// Newest assigned sequence number.
    pub last_sequence: Option<u64>,
    /// Newest checkpoint.
    pub last_checkpoint: Option<u64>,
    /// Records in the active segment.
    pub active_records: u64,
    /// Slot capacity of the active segment.
    pub active_capacity: u64,
    /// Total bytes of all store and index files.
    pub total_size: u64,
    /// Per-segment details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentInfo>>,
}

/// Details of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment id.
    pub id: u64,
    /// Store file size in bytes.
    pub store_size: u64,
    /// Index file size in bytes.
    pub index_size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_segments: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_segments)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Opens the log and gathers its statistics.
pub fn inspect(path: &Path, show_segments: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let config = cli_config();
    ensure_log_exists(path, &config)?;

    let log = Log::open(path, config)?;
    let stats = log.stats()?;

    let mut segments = Vec::new();
    for id in log.segment_ids()? {
        let store = path.join(log.config().naming.store_file(id));
        let index = path.join(log.config().naming.index_file(id));
        segments.push(SegmentInfo {
            id: id.as_u64(),
            store_size: fs::metadata(store).map(|m| m.len()).unwrap_or(0),
            index_size: fs::metadata(index).map(|m| m.len()).unwrap_or(0),
        });
    }
    log.close()?;

    Ok(InspectResult {
        path: path.display().to_string(),
        segment_count: stats.segment_count,
        active_segment: stats.active_segment.as_u64(),
        first_sequence: stats.first_sequence,
        last_sequence: stats.last_sequence,
        last_checkpoint: stats.last_checkpoint,
        active_records: stats.active_records,
        active_capacity: stats.active_capacity,
        total_size: segments.iter().map(|s| s.store_size + s.index_size).sum(),
        segments: show_segments.then_some(segments),
    })
}

fn print_text_output(result: &InspectResult) {
    let show = |value: Option<u64>| value.map_or_else(|| "-".to_string(), |v| v.to_string());

    println!("Log: {}", result.path);
    println!("  Segments:        {}", result.segment_count);
    println!("  Active segment:  {}", result.active_segment);
    println!(
        "  Active records:  {} / {}",
        result.active_records, result.active_capacity
    );
    println!("  First sequence:  {}", show(result.first_sequence));
    println!("  Last sequence:   {}", show(result.last_sequence));
    println!("  Last checkpoint: {}", show(result.last_checkpoint));
    println!("  Total size:      {} bytes", result.total_size);

    if let Some(segments) = &result.segments {
        println!();
        println!("  {:>8}  {:>12}  {:>12}", "segment", "store", "index");
        for segment in segments {
            println!(
                "  {:>8}  {:>12}  {:>12}",
                segment.id, segment.store_size, segment.index_size
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglog_core::LogConfig;
    use tempfile::tempdir;

    #[test]
    fn inspect_reports_sequences() {
        let dir = tempdir().unwrap();
        {
            let config = LogConfig::new()
                .records_per_segment(2)
                .sync_interval(std::time::Duration::ZERO);
            let log = Log::open(dir.path(), config).unwrap();
            log.append(b"a").unwrap();
            log.checkpoint(b"b").unwrap();
            log.append(b"c").unwrap();
            log.close().unwrap();
        }

        let result = inspect(dir.path(), true).unwrap();
        assert_eq!(result.segment_count, 2);
        assert_eq!(result.first_sequence, Some(1));
        assert_eq!(result.last_sequence, Some(3));
        assert_eq!(result.last_checkpoint, Some(2));
        assert_eq!(result.active_capacity, 2);
        assert_eq!(result.segments.unwrap().len(), 2);
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent"), false).is_err());
        assert!(inspect(dir.path(), false).is_err());
    }
}
