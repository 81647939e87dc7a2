//! Repair command implementation.

use super::{cli_config, ensure_log_exists};
use seglog_core::recovery::{self, RepairReport};
use seglog_core::SegmentId;
use std::path::Path;

/// Runs the repair command.
pub fn run(
    path: &Path,
    segment: Option<u64>,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli_config();
    ensure_log_exists(path, &config)?;

    let id = match segment {
        Some(id) => SegmentId::new(id),
        None => recovery::list_segments(path, &config)?
            .last()
            .copied()
            .ok_or("No segments found")?,
    };

    if dry_run {
        let scan = recovery::verify_store(&path.join(config.naming.store_file(id)))?;
        match &scan.break_point {
            None => println!(
                "segment {}: clean, {} records would be kept",
                id.as_u64(),
                scan.records.len()
            ),
            Some(point) => println!(
                "segment {}: {} at offset {}; would keep {} records and discard {} bytes",
                id.as_u64(),
                point.reason,
                point.offset,
                scan.records.len(),
                scan.discarded_bytes()
            ),
        }
        return Ok(());
    }

    let report = recovery::repair_segment(path, &config, id)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RepairReport) {
    let id = report.segment_id.as_u64();
    match &report.break_point {
        None => println!(
            "segment {id}: clean, {} records, nothing changed",
            report.recovered_count()
        ),
        Some(point) => {
            println!("segment {id}: truncated at offset {} ({})", point.offset, point.reason);
            println!("  recovered: {} records", report.recovered_count());
            println!(
                "  discarded: {} records, {} bytes",
                report.discarded_records, report.discarded_bytes
            );
        }
    }
}
