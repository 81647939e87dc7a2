//! Dump command implementation.

use super::{cli_config, ensure_log_exists};
use seglog_core::{Log, Record, SegmentId};
use serde::Serialize;
use std::path::Path;

/// Longest payload prefix shown in text output.
const PREVIEW_LEN: usize = 32;

/// Record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Sequence number.
    pub sequence: u64,
    /// Whether the record is a checkpoint.
    pub checkpoint: bool,
    /// Stored checksum, hex-encoded.
    pub checksum: String,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Payload as lossy UTF-8.
    pub payload: String,
}

impl From<&Record> for RecordInfo {
    fn from(record: &Record) -> Self {
        Self {
            sequence: record.sequence.as_u64(),
            checkpoint: record.is_checkpoint(),
            checksum: format!("{:08x}", record.checksum),
            payload_size: record.payload.len(),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    segment: u64,
    limit: Option<usize>,
    from_checkpoint: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = collect(path, segment, limit, from_checkpoint)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

/// Reads records from `segment` onward.
pub fn collect(
    path: &Path,
    segment: u64,
    limit: Option<usize>,
    from_checkpoint: bool,
) -> Result<Vec<RecordInfo>, Box<dyn std::error::Error>> {
    let config = cli_config();
    ensure_log_exists(path, &config)?;

    let log = Log::open(path, config)?;
    let records = log.read_from_offset(SegmentId::new(segment), from_checkpoint)?;
    log.close()?;

    Ok(records
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(RecordInfo::from)
        .collect())
}

fn print_text_output(records: &[RecordInfo]) {
    println!("{:>10}  {:>3}  {:>8}  {:>8}  payload", "sequence", "cp", "crc", "size");
    for record in records {
        let mut preview: String = record.payload.chars().take(PREVIEW_LEN).collect();
        if record.payload.chars().count() > PREVIEW_LEN {
            preview.push_str("...");
        }
        println!(
            "{:>10}  {:>3}  {:>8}  {:>8}  {}",
            record.sequence,
            if record.checkpoint { "*" } else { "" },
            record.checksum,
            record.payload_size,
            preview.escape_debug()
        );
    }
    println!("\n{} record(s)", records.len());
}
