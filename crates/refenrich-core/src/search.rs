//! Web search client: pagination, cross-query deduplication, and the
//! sequential rate-limit discipline imposed on the external search API.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::backoff;
use crate::types::Candidate;
use crate::{Error, Result};

/// One raw hit as returned by a search provider, before orchestrator-level
/// dedup keys are attached.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub link: String,
    /// Short extract.
    pub snippet: String,
}

/// A page of search results plus whether another page may exist.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Hits on this page.
    pub hits: Vec<SearchHit>,
    /// Whether the provider indicated more pages are available.
    pub has_more: bool,
}

/// Adapter over an external web-search provider.
///
/// Implementations should not dedup or rate-limit themselves; that is
/// [`SearchClient`]'s job, layered on top of a raw per-page fetch.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch one page of results for `query`, starting at `offset`.
    async fn fetch_page(&self, query: &str, offset: u32) -> Result<SearchPage>;
}

/// Per-query cap on unique URLs collected via pagination.
const PER_QUERY_CAP: usize = 20;

/// Maximum pages requested for a single query, regardless of `has_more`.
const MAX_PAGES_PER_QUERY: u32 = 4;

/// Sequential, rate-limited, deduplicating search client.
pub struct SearchClient<P: SearchProvider> {
    provider: P,
    min_interval: Duration,
    max_retries: u32,
}

impl<P: SearchProvider> SearchClient<P> {
    /// Build a client with the configured minimum inter-request interval.
    #[must_use]
    pub fn new(provider: P, min_interval_ms: u64) -> Self {
        Self {
            provider,
            min_interval: Duration::from_millis(min_interval_ms),
            max_retries: 3,
        }
    }

    /// Run `query`, paginating until the per-query cap is hit, the provider
    /// reports no more pages, or `MAX_PAGES_PER_QUERY` is reached. Retries
    /// transient failures with exponential backoff (1s/2s/4s).
    pub async fn search(&self, query: &str, originating_query_index: usize) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0u32;

        for page_num in 0..MAX_PAGES_PER_QUERY {
            if page_num > 0 {
                sleep(self.min_interval).await;
            }
            let page = self.fetch_with_retry(query, offset).await?;
            let page_len = page.hits.len();
            for (rank, hit) in page.hits.into_iter().enumerate() {
                let key = crate::normalize_url(&hit.link);
                if !seen.insert(key) {
                    continue;
                }
                candidates.push(Candidate {
                    url: hit.link,
                    title: hit.title,
                    snippet: hit.snippet,
                    originating_query: query.to_string(),
                    rank_within_query: offset + rank as u32,
                });
                if candidates.len() >= PER_QUERY_CAP {
                    break;
                }
            }
            if candidates.len() >= PER_QUERY_CAP || !page.has_more || page_len == 0 {
                break;
            }
            offset += page_len as u32;
        }

        let _ = originating_query_index;
        Ok(candidates)
    }

    async fn fetch_with_retry(&self, query: &str, offset: u32) -> Result<SearchPage> {
        let mut attempt = 0u32;
        loop {
            match self.provider.fetch_page(query, offset).await {
                Ok(page) => return Ok(page),
                Err(Error::SearchRateLimited(reason)) => {
                    if attempt >= self.max_retries {
                        return Err(Error::SearchRateLimited(reason));
                    }
                    warn!(query, attempt, "search rate limited, backing off");
                    backoff::wait(attempt).await;
                    attempt += 1;
                }
                Err(Error::TransientIo(reason)) => {
                    if attempt >= self.max_retries {
                        return Err(Error::TransientIo(reason));
                    }
                    warn!(query, attempt, "transient search error, retrying");
                    backoff::wait(attempt).await;
                    attempt += 1;
                }
                Err(other) => {
                    debug!(query, error = %other, "search failed without retry");
                    return Err(other);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockProvider {
        pages: Mutex<Vec<Result<SearchPage>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SearchProvider for MockProvider {
        async fn fetch_page(&self, _query: &str, _offset: u32) -> Result<SearchPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Ok(SearchPage { hits: Vec::new(), has_more: false });
            }
            pages.remove(0)
        }
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: "t".to_string(),
            link: url.to_string(),
            snippet: "s".to_string(),
        }
    }

    #[tokio::test]
    async fn dedups_across_pages_by_normalized_url() {
        let provider = MockProvider {
            pages: Mutex::new(vec![
                Ok(SearchPage {
                    hits: vec![hit("https://Example.com/a/"), hit("https://example.com/a")],
                    has_more: false,
                }),
            ]),
            calls: AtomicU32::new(0),
        };
        let client = SearchClient::new(provider, 0);
        let results = client.search("q", 0).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn retries_rate_limited_then_succeeds() {
        let provider = MockProvider {
            pages: Mutex::new(vec![
                Err(Error::SearchRateLimited("slow down".to_string())),
                Ok(SearchPage { hits: vec![hit("https://a.com/x")], has_more: false }),
            ]),
            calls: AtomicU32::new(0),
        };
        let client = SearchClient::new(provider, 0);
        let results = client.search("q", 0).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn quota_exhausted_is_not_retried() {
        let calls = std::sync::Arc::new(AtomicU32::new(0));
        struct CountingProvider(std::sync::Arc<AtomicU32>);
        #[async_trait]
        impl SearchProvider for CountingProvider {
            async fn fetch_page(&self, _query: &str, _offset: u32) -> Result<SearchPage> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(Error::SearchQuotaExhausted)
            }
        }
        let client = SearchClient::new(CountingProvider(calls.clone()), 0);
        let err = client.search("q", 0).await.unwrap_err();
        assert!(matches!(err, Error::SearchQuotaExhausted));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
