//! Volume list JSON API.
//!
//! One GET per series:
//! `volumeList.series?productNo=<id>&sortOrder=ASC&totalCount=<n>`. The
//! endpoint behaves like an XHR from the detail page, so the request carries
//! a matching `Referer` and `X-Requested-With` header.

use super::{RawPayload, UpstreamClient, detail_url, fetch_text};
use crate::config::HttpConfig;
use crate::error::{PipelineError, UpstreamError};
use crate::models::EntityId;
use reqwest::Client;
use reqwest::header::{ACCEPT, REFERER};
use std::time::Duration;
use tracing::instrument;
use url::Url;

#[derive(Debug, Clone)]
pub struct VolumeListSource {
    client: Client,
    api_base: Url,
    detail_base: Url,
    total_count: u32,
    timeout: Duration,
}

impl VolumeListSource {
    pub fn new(client: Client, http: &HttpConfig, timeout: Duration) -> Result<Self, PipelineError> {
        let parse = |name: &str, value: &str| {
            Url::parse(value)
                .map_err(|e| PipelineError::Configuration(format!("{name} is not a valid URL: {e}")))
        };
        Ok(Self {
            client,
            api_base: parse("http.api_base_url", &http.api_base_url)?,
            detail_base: parse("http.detail_base_url", &http.detail_base_url)?,
            total_count: http.api_total_count,
            timeout,
        })
    }

    pub fn request_url(&self, id: &EntityId) -> Url {
        let mut url = self.api_base.clone();
        url.query_pairs_mut()
            .append_pair("productNo", id.as_str())
            .append_pair("sortOrder", "ASC")
            .append_pair("totalCount", &self.total_count.to_string());
        url
    }
}

impl UpstreamClient for VolumeListSource {
    #[instrument(level = "debug", skip_all, fields(%id))]
    async fn fetch(&self, id: &EntityId) -> Result<RawPayload, UpstreamError> {
        let url = self.request_url(id);
        let request = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(REFERER, detail_url(&self.detail_base, id).as_str())
            .header("X-Requested-With", "XMLHttpRequest");

        let body = fetch_text(request, &url, self.timeout).await?;
        serde_json::from_str(&body)
            .map(RawPayload::Json)
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}
