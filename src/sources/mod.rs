//! Upstream sources queried once per entity.
//!
//! Each source implements [`UpstreamClient`]: one HTTP GET per call, a fixed
//! timeout, browser-like default headers, and **no internal retries**. The
//! retry budget belongs to [`crate::updater::EntityUpdater`].
//!
//! | Source | Module | Payload |
//! |--------|--------|---------|
//! | Volume list API | [`volume_list`] | JSON |
//! | Series detail page | [`detail_page`] | HTML |

pub mod detail_page;
pub mod volume_list;

pub use detail_page::DetailPageSource;
pub use volume_list::VolumeListSource;

use crate::config::HttpConfig;
use crate::error::{PipelineError, UpstreamError};
use crate::models::EntityId;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Raw response body handed to a [`crate::extractors::FieldExtractor`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    Json(Value),
    Html(String),
}

/// Fetches the raw upstream payload for one entity.
pub trait UpstreamClient {
    /// Perform exactly one request for `id`.
    async fn fetch(&self, id: &EntityId) -> Result<RawPayload, UpstreamError>;
}

/// Build the shared HTTP client with identification headers and timeout.
pub fn build_client(http: &HttpConfig, timeout: Duration) -> Result<Client, PipelineError> {
    let mut headers = HeaderMap::new();
    let accept_language = HeaderValue::from_str(&http.accept_language).map_err(|e| {
        PipelineError::Configuration(format!("http.accept_language is not a valid header: {e}"))
    })?;
    headers.insert(ACCEPT_LANGUAGE, accept_language);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    Client::builder()
        .user_agent(http.user_agent.as_str())
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// `<base>?productNo=<id>`
pub fn detail_url(base: &Url, id: &EntityId) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("productNo", id.as_str());
    url
}

/// Send a prepared request and return the body text of a 2xx response.
pub(crate) async fn fetch_text(
    request: RequestBuilder,
    url: &Url,
    timeout: Duration,
) -> Result<String, UpstreamError> {
    let t0 = Instant::now();
    let response = request.send().await.map_err(|e| classify(e, timeout))?;
    let status = response.status();
    if !status.is_success() {
        warn!(%url, status = status.as_u16(), "Upstream returned non-success status");
        return Err(UpstreamError::Status(status.as_u16()));
    }
    let body = response.text().await.map_err(|e| classify(e, timeout))?;
    debug!(
        %url,
        bytes = body.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Fetched upstream payload"
    );
    Ok(body)
}

fn classify(e: reqwest::Error, timeout: Duration) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout(timeout)
    } else if let Some(status) = e.status() {
        UpstreamError::Status(status.as_u16())
    } else {
        UpstreamError::Transport(e)
    }
}
