//! HTTP-backed [`SearchProvider`] over a generic JSON search endpoint.

use std::time::Duration;

use async_trait::async_trait;
use refenrich_core::{Error, Result, SearchApiConfig};
use refenrich_core::search::{SearchHit, SearchPage, SearchProvider};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

const SEARCH_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    #[serde(default)]
    results: Vec<RawHit>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Queries a JSON search endpoint of the form
/// `GET {endpoint}?q=<query>&offset=<offset>` with a bearer API key.
pub struct HttpSearchProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpSearchProvider {
    /// Build a provider from config, reading the API key from the
    /// environment variable it names.
    pub fn new(config: &SearchApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(SEARCH_DEADLINE)
            .build()
            .map_err(Error::Network)?;
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn fetch_page(&self, query: &str, offset: u32) -> Result<SearchPage> {
        let offset_str = offset.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(&self.api_key)
            .query(&[("q", query), ("offset", offset_str.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::TransientIo(format!("search timeout: {e}"))
                } else {
                    Error::Network(e)
                }
            })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::SearchRateLimited(format!(
                "HTTP {}",
                response.status()
            )));
        }
        if response.status() == StatusCode::PAYMENT_REQUIRED
            || response.status() == StatusCode::FORBIDDEN
        {
            return Err(Error::SearchQuotaExhausted);
        }
        if !response.status().is_success() {
            return Err(Error::TransientIo(format!(
                "search endpoint returned {}",
                response.status()
            )));
        }

        let body: RawSearchResponse = response
            .json()
            .await
            .map_err(|e| Error::TransientIo(format!("decode search response: {e}")))?;

        Ok(SearchPage {
            hits: body
                .results
                .into_iter()
                .map(|h| SearchHit {
                    title: h.title,
                    link: h.link,
                    snippet: h.snippet,
                })
                .collect(),
            has_more: body.has_more,
        })
    }
}
