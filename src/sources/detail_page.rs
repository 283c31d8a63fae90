//! Series detail HTML page.

use super::{RawPayload, UpstreamClient, detail_url, fetch_text};
use crate::config::HttpConfig;
use crate::error::{PipelineError, UpstreamError};
use crate::models::EntityId;
use reqwest::Client;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::instrument;
use url::Url;

#[derive(Debug, Clone)]
pub struct DetailPageSource {
    client: Client,
    detail_base: Url,
    timeout: Duration,
}

impl DetailPageSource {
    pub fn new(client: Client, http: &HttpConfig, timeout: Duration) -> Result<Self, PipelineError> {
        let detail_base = Url::parse(&http.detail_base_url).map_err(|e| {
            PipelineError::Configuration(format!("http.detail_base_url is not a valid URL: {e}"))
        })?;
        Ok(Self {
            client,
            detail_base,
            timeout,
        })
    }
}

impl UpstreamClient for DetailPageSource {
    #[instrument(level = "debug", skip_all, fields(%id))]
    async fn fetch(&self, id: &EntityId) -> Result<RawPayload, UpstreamError> {
        let url = detail_url(&self.detail_base, id);
        let request = self.client.get(url.clone()).header(
            ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        );
        let body = fetch_text(request, &url, self.timeout).await?;
        Ok(RawPayload::Html(body))
    }
}
