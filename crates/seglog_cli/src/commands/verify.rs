//! Verify command implementation.

use super::{cli_config, ensure_log_exists};
use seglog_core::recovery::{self, StoreScan};
use seglog_core::segment::OpenMode;
use seglog_core::{LogConfig, Segment, SegmentId};
use std::path::Path;

/// Verification outcome of one segment.
#[derive(Debug)]
pub struct SegmentCheck {
    /// Segment id.
    pub id: SegmentId,
    /// Store scan result.
    pub scan: StoreScan,
    /// Index slots that do not resolve to their record.
    pub index_errors: Vec<String>,
}

impl SegmentCheck {
    /// Returns `true` if both store and index are intact.
    pub fn is_ok(&self) -> bool {
        self.scan.is_clean() && self.index_errors.is_empty()
    }
}

/// Runs the verify command.
///
/// Reads segment files directly without taking the directory lock.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let checks = check_all(path)?;
    let mut damaged = 0;

    for check in &checks {
        if check.is_ok() {
            println!(
                "segment {}: ok ({} records, {} bytes)",
                check.id.as_u64(),
                check.scan.records.len(),
                check.scan.total_len
            );
            continue;
        }

        damaged += 1;
        println!("segment {}: DAMAGED", check.id.as_u64());
        if let Some(point) = &check.scan.break_point {
            println!(
                "  store: {} at offset {} ({} valid records, {} bytes after break)",
                point.reason,
                point.offset,
                check.scan.records.len(),
                check.scan.discarded_bytes()
            );
            println!("    {}", point.detail);
        }
        for error in &check.index_errors {
            println!("  index: {error}");
        }
    }

    if damaged > 0 {
        return Err(format!("{damaged} of {} segment(s) damaged", checks.len()).into());
    }
    println!("All {} segment(s) verified", checks.len());
    Ok(())
}

/// Checks every segment of the log at `path`.
pub fn check_all(path: &Path) -> Result<Vec<SegmentCheck>, Box<dyn std::error::Error>> {
    let config = cli_config();
    ensure_log_exists(path, &config)?;

    let mut checks = Vec::new();
    for id in recovery::list_segments(path, &config)? {
        checks.push(check_segment(path, &config, id)?);
    }
    Ok(checks)
}

fn check_segment(
    path: &Path,
    config: &LogConfig,
    id: SegmentId,
) -> Result<SegmentCheck, Box<dyn std::error::Error>> {
    let scan = recovery::verify_store(&path.join(config.naming.store_file(id)))?;

    let mut index_errors = Vec::new();
    match Segment::open(path, &config.naming, id, config, config.start_id, OpenMode::ReadOnly) {
        Ok(segment) => {
            for record_id in segment.start_id()..segment.next_id() {
                if let Err(e) = segment.read(record_id) {
                    index_errors.push(format!("record {record_id}: {e}"));
                }
            }
        }
        Err(e) => index_errors.push(e.to_string()),
    }

    Ok(SegmentCheck {
        id,
        scan,
        index_errors,
    })
}
