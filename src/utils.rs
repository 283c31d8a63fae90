//! Utility functions for timestamps, progress formatting, and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - Timestamps for provenance markers and output file names
//! - Human-readable durations, percentages and progress bars
//! - String truncation for logging
//! - File system validation for output directories

use crate::error::{PipelineError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ISO 8601 timestamp with `:` and `.` replaced by `-`, safe for file names.
///
/// ```ignore
/// assert_eq!(file_timestamp(t), "2025-07-03T17-19-55-691Z");
/// ```
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// Format a duration as `1h 2m 3s`, `2m 3s` or `3s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// `done / total` as a percentage; an empty total counts as complete.
pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    }
}

/// Two-decimal percentage string as stored in the summary block.
pub fn percent_label(done: usize, total: usize) -> String {
    format!("{:.2}%", percent(done, total))
}

/// Fixed-width text progress bar, e.g. `█████░░░░░`.
pub fn progress_bar(done: usize, total: usize, width: usize) -> String {
    let filled = ((percent(done, total) / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a character boundary no later than `max` bytes,
/// with an ellipsis and byte count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file, so
/// an unwritable output location is reported before any batch runs.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<()> {
    let write_err = |source| PipelineError::CheckpointWrite {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(path).await.map_err(write_err)?;
    let scratch_path = path.join("..__write_check__");
    fs::write(&scratch_path, b"").await.map_err(write_err)?;
    let _ = fs::remove_file(&scratch_path).await;
    info!("Output directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundaries() {
        // Each Hangul syllable is three bytes.
        let result = truncate_for_log("완결연재중", 4);
        assert!(result.starts_with("완…"));
        assert!(result.contains("(+12 bytes)"));
    }

    #[test]
    fn test_file_timestamp() {
        let at = Utc.with_ymd_and_hms(2025, 7, 3, 17, 19, 55).unwrap()
            + chrono::Duration::milliseconds(691);
        assert_eq!(file_timestamp(at), "2025-07-03T17-19-55-691Z");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 2m 3s");
    }

    #[test]
    fn test_percent_label() {
        assert_eq!(percent_label(1, 3), "33.33%");
        assert_eq!(percent_label(5, 5), "100.00%");
        assert_eq!(percent_label(0, 0), "100.00%");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0, 4, 4), "░░░░");
        assert_eq!(progress_bar(2, 4, 4), "██░░");
        assert_eq!(progress_bar(4, 4, 4), "████");
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("output").join("nested");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__write_check__").exists());
    }
}
