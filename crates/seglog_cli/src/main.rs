//! seglog CLI
//!
//! Command-line tools for inspecting and maintaining seglog directories.
//!
//! # Commands
//!
//! - `inspect` - Display log statistics and segment layout
//! - `verify` - Check every segment's records and index
//! - `repair` - Truncate a segment at its first damaged record
//! - `dump` - Print records for debugging

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// seglog command-line tools.
#[derive(Parser)]
#[command(name = "seglog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log statistics and segment layout
    Inspect {
        /// Show per-segment details
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify checksums and index slots of every segment
    Verify,

    /// Truncate a segment at its first damaged record
    Repair {
        /// Segment to repair (defaults to the newest)
        #[arg(short, long)]
        segment: Option<u64>,

        /// Dry run - show what would be discarded
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump records for debugging
    Dump {
        /// First segment to read
        #[arg(short, long, default_value = "0")]
        segment: u64,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Start at the newest checkpoint
        #[arg(short = 'c', long)]
        from_checkpoint: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { segments, format } => {
            let path = cli.path.ok_or("Log path required for inspect")?;
            commands::inspect::run(&path, segments, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Log path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Repair { segment, dry_run } => {
            let path = cli.path.ok_or("Log path required for repair")?;
            commands::repair::run(&path, segment, dry_run)?;
        }
        Commands::Dump {
            segment,
            limit,
            from_checkpoint,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for dump")?;
            commands::dump::run(&path, segment, limit, from_checkpoint, &format)?;
        }
        Commands::Version => {
            println!("seglog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("seglog core v{}", seglog_core::VERSION);
        }
    }

    Ok(())
}
