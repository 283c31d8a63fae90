//! Error taxonomy for the enrichment pipeline.
//!
//! Two families of errors exist and they never mix:
//!
//! - [`UpstreamError`] describes a single failed fetch for one entity. It is
//!   retried by the [`crate::updater::EntityUpdater`] and, once the retry budget
//!   is spent, recorded on the entity as data. It never reaches `main`.
//! - [`PipelineError`] describes corpus and configuration failures. These are
//!   fatal: the run aborts and the process exits non-zero.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, PipelineError>;

/// A failed request against an upstream source.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("response body could not be decoded: {0}")]
    Decode(String),

    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl UpstreamError {
    /// Short, stable category name used in logs and failure annotations.
    pub fn category(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Status(_) => "status",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::Decode(_) => "decode",
            UpstreamError::InvalidUrl(_) => "invalid_url",
        }
    }
}

/// Why an entity could not be enriched after all attempts.
#[derive(Debug, Error)]
pub enum FailureReason {
    #[error("fetch failed: {0}")]
    Fetch(#[from] UpstreamError),

    #[error("payload matched no known shape")]
    ExtractionMismatch,

    #[error("entity has no usable id")]
    MissingId,
}

impl FailureReason {
    pub fn category(&self) -> &'static str {
        match self {
            FailureReason::Fetch(e) => e.category(),
            FailureReason::ExtractionMismatch => "extraction_mismatch",
            FailureReason::MissingId => "missing_id",
        }
    }
}

/// Fatal errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read corpus {path}: {source}")]
    CorpusRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corpus {path} is not a valid document: {source}")]
    CorpusFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode checkpoint {path}: {source}")]
    CheckpointEncode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to load config {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_category() {
        let timeout = FailureReason::from(UpstreamError::Timeout(Duration::from_secs(10)));
        assert_eq!(timeout.category(), "timeout");
        assert_eq!(FailureReason::ExtractionMismatch.category(), "extraction_mismatch");
        assert_eq!(
            FailureReason::Fetch(UpstreamError::Status(503)).to_string(),
            "fetch failed: upstream returned HTTP 503"
        );
    }

    #[test]
    fn test_pipeline_error_carries_path() {
        let err = PipelineError::CorpusRead {
            path: PathBuf::from("output/missing.json"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("output/missing.json"));
        assert!(msg.contains("no such file"));
    }
}
