//! Command-line interface definitions for series_enrich.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Tuning flags override the config file, which overrides the pass defaults.

use crate::config::PassSettings;
use crate::passes::PassKind;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for one enrichment pass.
///
/// # Examples
///
/// ```sh
/// # Fill missing start dates from the volume-list API
/// series_enrich api-start-date novels.json
///
/// # Resume the latest HTML verification output, retrying failed entities
/// series_enrich html-verify --retry-failed
///
/// # Explicit input and output, slower pacing
/// series_enrich html-start-date in.json out.json --delay-ms 2000 --batch-size 2
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Enrichment pass to run
    #[arg(value_enum)]
    pub pass: PassKind,

    /// Corpus document to start from (required when no prior output exists)
    pub input: Option<PathBuf>,

    /// Checkpoint path; disables prior-output discovery
    pub output: Option<PathBuf>,

    /// Skip this many entities of the target set
    #[arg(short, long, default_value_t = 0)]
    pub start_index: usize,

    /// Entities per batch (one checkpoint per batch)
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Base delay between requests in milliseconds
    #[arg(short, long)]
    pub delay_ms: Option<u64>,

    /// Attempts per entity before it is marked failed
    #[arg(short = 'r', long)]
    pub max_retries: Option<usize>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Directory for new output files
    #[arg(short, long, env = "SERIES_ENRICH_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Optional path to config.yaml file
    #[arg(short, long, env = "SERIES_ENRICH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Start a fresh output instead of resuming the latest one
    #[arg(long)]
    pub no_resume: bool,

    /// Re-attempt entities this pass previously marked as failed
    #[arg(long)]
    pub retry_failed: bool,
}

impl Cli {
    /// Tuning given on the command line; unset fields fall through to the
    /// config file.
    pub fn overrides(&self) -> PassSettings {
        PassSettings {
            batch_size: self.batch_size,
            delay_ms: self.delay_ms,
            jitter_ms: None,
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
        }
    }
}
