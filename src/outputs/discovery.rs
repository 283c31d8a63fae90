//! Locating prior checkpoints and naming new ones.
//!
//! Output files follow `<prefix>_<timestamp>.json`, where the timestamp is
//! ISO 8601 with `:` and `.` replaced by `-`. That format sorts
//! lexicographically in time order, so the latest checkpoint is simply the
//! greatest suffix.

use crate::utils::file_timestamp;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

/// A prior output file of some pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub timestamp: String,
}

/// Timestamp suffix of `file_name` if it is an output of `prefix`.
pub fn timestamp_suffix<'a>(file_name: &'a str, prefix: &str) -> Option<&'a str> {
    let suffix = file_name
        .strip_prefix(prefix)?
        .strip_prefix('_')?
        .strip_suffix(".json")?;
    (!suffix.is_empty()).then_some(suffix)
}

/// Latest output file of `prefix` across `dirs`. Missing or unreadable
/// directories are skipped.
///
/// # Arguments
///
/// * `prefix` - File prefix of the pass, e.g. `api_start_date_updated`
/// * `dirs` - Directories to scan, in no particular priority
///
/// # Returns
///
/// The file with the greatest timestamp suffix, or `None` when no directory
/// holds an output of `prefix`.
///
/// # Examples
///
/// ```ignore
/// let dirs = vec![PathBuf::from("output"), PathBuf::from(".")];
/// if let Some(prior) = find_latest("html_verified", &dirs).await {
///     println!("resuming {}", prior.path.display());
/// }
/// ```
#[instrument(level = "info", skip(dirs))]
pub async fn find_latest(prefix: &str, dirs: &[PathBuf]) -> Option<OutputFile> {
    let mut latest: Option<OutputFile> = None;
    for dir in dirs {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping search directory");
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(timestamp) = name.to_str().and_then(|n| timestamp_suffix(n, prefix)) else {
                continue;
            };
            if latest.as_ref().is_none_or(|l| timestamp > l.timestamp.as_str()) {
                latest = Some(OutputFile {
                    path: entry.path(),
                    timestamp: timestamp.to_string(),
                });
            }
        }
    }
    match &latest {
        Some(found) => info!(path = %found.path.display(), "Found prior output"),
        None => debug!("No prior output found"),
    }
    latest
}

/// `<dir>/<prefix>_<timestamp>.json` for a fresh run.
pub fn fresh_output_path(dir: &Path, prefix: &str, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{prefix}_{}.json", file_timestamp(at)))
}
