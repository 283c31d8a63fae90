//! # series_enrich
//!
//! A resumable enrichment pipeline for a corpus of web-novel series
//! metadata. Each pass fills or verifies one field per entity by querying an
//! upstream source, and checkpoints the whole corpus after every batch so an
//! interrupted run picks up where it stopped.
//!
//! ## Passes
//!
//! - `api-start-date`: start date and serial status from the volume list API
//! - `html-start-date`: the same fields scraped from the series detail page
//! - `html-verify`: completion status, title, author, genre and episode count
//!   re-read from the detail page
//!
//! ## Usage
//!
//! ```sh
//! series_enrich api-start-date novels.json
//! ```
//!
//! ## Architecture
//!
//! The application runs one pass per invocation:
//! 1. **Resolve**: pick the input corpus and checkpoint path, resuming the
//!    latest output of the pass when one exists
//! 2. **Scope**: select the target entities and drop those already processed
//! 3. **Enrich**: fetch, extract and merge each pending entity sequentially,
//!    with bounded retries and linear backoff
//! 4. **Checkpoint**: atomically rewrite the full corpus after every batch

use clap::Parser;
use std::error::Error;
use std::time::Instant;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod extractors;
mod models;
mod outputs;
mod passes;
mod rate_limit;
mod runner;
mod sources;
mod updater;
mod utils;

use cli::Cli;
use config::{Config, RunSettings};
use extractors::{DetailPageExtractor, FieldExtractor, VerificationExtractor, VolumeListExtractor};
use passes::{PassKind, PassSpec};
use rate_limit::RateLimiter;
use runner::{ResumableBatchRunner, RunOptions, RunPaths, RunReport, resolve_paths};
use sources::{DetailPageSource, UpstreamClient, VolumeListSource, build_client};
use updater::EntityUpdater;
use utils::{ensure_writable_dir, format_duration};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("series_enrich starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    match run(args).await {
        Ok(report) => {
            info!(
                processed = report.stats.processed(),
                pending = report.pending,
                target = report.total_target,
                output = %report.output.display(),
                elapsed = %format_duration(start_time.elapsed()),
                "Execution complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                error = %e,
                elapsed = %format_duration(start_time.elapsed()),
                "Execution failed"
            );
            Err(e.into())
        }
    }
}

async fn run(args: Cli) -> error::Result<RunReport> {
    // ---- Configuration ----
    let mut config = Config::load(args.config.as_deref()).await?;
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    config.validate()?;
    let settings = config.run_settings(args.pass, &args.overrides())?;
    info!(
        pass = args.pass.name(),
        batch_size = settings.batch_size,
        delay_ms = settings.base_delay.as_millis() as u64,
        max_retries = settings.max_retries,
        timeout_secs = settings.timeout.as_secs(),
        "Resolved run settings"
    );

    // ---- Paths ----
    let paths = resolve_paths(
        args.pass,
        args.input.as_deref(),
        args.output.as_deref(),
        &config.output_dir,
        &config.search_dirs(),
        !args.no_resume,
    )
    .await?;
    info!(
        input = %paths.input.display(),
        output = %paths.output.display(),
        resumed = paths.resumed,
        "Resolved corpus paths"
    );

    // Early check: the checkpoint directory must be writable before any fetch
    if let Some(parent) = paths.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_writable_dir(parent).await?;
    }

    // ---- Run the pass ----
    let pass = PassSpec::new(args.pass, config.fields.clone());
    let client = build_client(&config.http, settings.timeout)?;
    let options = RunOptions {
        batch_size: settings.batch_size,
        start_index: args.start_index,
        retry_failed: args.retry_failed,
    };

    match args.pass {
        PassKind::ApiStartDate => {
            let source = VolumeListSource::new(client, &config.http, settings.timeout)?;
            let extractor = VolumeListExtractor::new(&config.fields);
            run_pass(pass, source, extractor, &settings, options, &paths).await
        }
        PassKind::HtmlStartDate => {
            let source = DetailPageSource::new(client, &config.http, settings.timeout)?;
            let extractor = DetailPageExtractor::new(&config.fields);
            run_pass(pass, source, extractor, &settings, options, &paths).await
        }
        PassKind::HtmlVerify => {
            let source = DetailPageSource::new(client, &config.http, settings.timeout)?;
            let extractor = VerificationExtractor::new(&config.fields);
            run_pass(pass, source, extractor, &settings, options, &paths).await
        }
    }
}

async fn run_pass<C, X>(
    pass: PassSpec,
    client: C,
    extractor: X,
    settings: &RunSettings,
    options: RunOptions,
    paths: &RunPaths,
) -> error::Result<RunReport>
where
    C: UpstreamClient,
    X: FieldExtractor,
{
    let limiter = RateLimiter::new(settings.base_delay).with_jitter(settings.jitter);
    let updater = EntityUpdater::new(client, extractor, limiter, settings.max_retries, &pass);
    ResumableBatchRunner::new(pass, updater, limiter, options)
        .run(paths)
        .await
}
