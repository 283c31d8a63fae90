//! Configuration for the enrichment passes.
//!
//! Settings come from three layers, later layers winning:
//! 1. Built-in per-pass defaults ([`PassKind::defaults`])
//! 2. An optional YAML config file (`--config`)
//! 3. Command-line overrides (`--batch-size`, `--delay-ms`, ...)
//!
//! ```yaml
//! output_dir: output
//! fields:
//!   id: 작품ID
//!   guard: 작가명
//!   title: 제목
//!   start_date: 연재 시작일
//!   completion_status: 완결 여부
//! passes:
//!   html_verify:
//!     batch_size: 5
//!     delay_ms: 1500
//! ```

use crate::error::{PipelineError, Result};
use crate::passes::PassKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

/// Browser-like identification sent with every upstream request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Names of the entity fields the passes read and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    /// Unique, immutable entity key
    pub id: String,
    /// Eligibility gate (author name)
    pub guard: String,
    /// Used for log labels only
    pub title: String,
    /// Serialization start date, `YYYY-MM-DD`
    pub start_date: String,
    /// Serialization status token
    pub completion_status: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            guard: "author".to_string(),
            title: "title".to_string(),
            start_date: "startDate".to_string(),
            completion_status: "completionStatus".to_string(),
        }
    }
}

/// Upstream endpoints and request identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub accept_language: String,
    /// Volume list JSON endpoint
    pub api_base_url: String,
    /// Series detail HTML page
    pub detail_base_url: String,
    /// `totalCount` page-size bound sent to the volume list endpoint
    pub api_total_count: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            api_base_url: "https://series.naver.com/novel/volumeList.series".to_string(),
            detail_base_url: "https://series.naver.com/novel/detail.series".to_string(),
            api_total_count: 150,
        }
    }
}

/// Tuning for one pass. Unset values fall through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassSettings {
    pub batch_size: Option<usize>,
    pub delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub timeout_secs: Option<u64>,
}

impl PassSettings {
    /// Fill unset values from `fallback`.
    pub fn or(self, fallback: &PassSettings) -> PassSettings {
        PassSettings {
            batch_size: self.batch_size.or(fallback.batch_size),
            delay_ms: self.delay_ms.or(fallback.delay_ms),
            jitter_ms: self.jitter_ms.or(fallback.jitter_ms),
            max_retries: self.max_retries.or(fallback.max_retries),
            timeout_secs: self.timeout_secs.or(fallback.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassesConfig {
    pub api_start_date: PassSettings,
    pub html_start_date: PassSettings,
    pub html_verify: PassSettings,
}

impl PassesConfig {
    pub fn for_pass(&self, pass: PassKind) -> &PassSettings {
        match pass {
            PassKind::ApiStartDate => &self.api_start_date,
            PassKind::HtmlStartDate => &self.html_start_date,
            PassKind::HtmlVerify => &self.html_verify,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fields: FieldNames,
    pub http: HttpConfig,
    pub passes: PassesConfig,
    /// Where fresh checkpoints are created
    pub output_dir: PathBuf,
    /// Where prior checkpoints are looked for; defaults to `.` and `output_dir`
    pub search_dirs: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fields: FieldNames::default(),
            http: HttpConfig::default(),
            passes: PassesConfig::default(),
            output_dir: PathBuf::from("output"),
            search_dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Load the YAML config at `path`, or the defaults when no path is given.
    #[instrument(level = "info")]
    pub async fn load(path: Option<&Path>) -> Result<Config> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::ConfigFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let config = Config::from_yaml(&raw).map_err(|e| PipelineError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> std::result::Result<Config, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let f = &self.fields;
        for (name, value) in [
            ("fields.id", &f.id),
            ("fields.guard", &f.guard),
            ("fields.start_date", &f.start_date),
            ("fields.completion_status", &f.completion_status),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Configuration(format!("{name} must not be empty")));
            }
        }
        for (name, value) in [
            ("http.api_base_url", &self.http.api_base_url),
            ("http.detail_base_url", &self.http.detail_base_url),
        ] {
            Url::parse(value).map_err(|e| {
                PipelineError::Configuration(format!("{name} '{value}' is not a valid URL: {e}"))
            })?;
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "http.user_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn search_dirs(&self) -> Vec<PathBuf> {
        if self.search_dirs.is_empty() {
            vec![PathBuf::from("."), self.output_dir.clone()]
        } else {
            self.search_dirs.clone()
        }
    }

    /// Resolve the effective tuning for `pass`, applying `overrides` on top of
    /// the config file and the pass defaults.
    pub fn run_settings(&self, pass: PassKind, overrides: &PassSettings) -> Result<RunSettings> {
        let merged = overrides
            .clone()
            .or(self.passes.for_pass(pass))
            .or(&pass.defaults());
        RunSettings::try_from(merged)
    }
}

/// Fully resolved tuning for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub batch_size: usize,
    pub base_delay: Duration,
    pub jitter: Duration,
    pub max_retries: usize,
    pub timeout: Duration,
}

impl TryFrom<PassSettings> for RunSettings {
    type Error = PipelineError;

    fn try_from(s: PassSettings) -> Result<Self> {
        let missing = |name: &str| PipelineError::Configuration(format!("{name} is not set"));
        let batch_size = s.batch_size.ok_or_else(|| missing("batch_size"))?;
        let max_retries = s.max_retries.ok_or_else(|| missing("max_retries"))?;
        let timeout_secs = s.timeout_secs.ok_or_else(|| missing("timeout_secs"))?;
        if batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if max_retries == 0 {
            return Err(PipelineError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if timeout_secs == 0 {
            return Err(PipelineError::Configuration(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(RunSettings {
            batch_size,
            base_delay: Duration::from_millis(s.delay_ms.unwrap_or(0)),
            jitter: Duration::from_millis(s.jitter_ms.unwrap_or(0)),
            max_retries,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}
