//! # seglog core
//!
//! A durable, segmented, append-only log.
//!
//! This crate provides:
//! - The record wire format with CRC-32 checksums and checkpoint markers
//! - Segment stores (length-prefixed records) and memory-mapped offset indexes
//! - The [`Log`] engine: sequence numbering, rotation, retention, periodic
//!   background sync and crash repair
//!
//! ## Example
//!
//! ```rust,no_run
//! use seglog_core::{Log, LogConfig};
//! use std::path::Path;
//!
//! let log = Log::open(Path::new("my_log"), LogConfig::default())?;
//! let seq = log.append(b"hello")?;
//! assert_eq!(log.read(seq.as_u64())?, b"hello");
//! log.close()?;
//! # Ok::<(), seglog_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dir;
mod error;
mod log;
pub mod segment;
mod stats;
mod types;

pub use config::{LogConfig, SegmentNaming};
pub use error::{CoreError, CoreResult};
pub use log::{recovery, Log, RepairReport, TruncationReason};
pub use segment::{FileStores, OpenMode, Record, Segment, StoreOpener};
pub use stats::LogStats;
pub use types::{SegmentId, SequenceNumber};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
