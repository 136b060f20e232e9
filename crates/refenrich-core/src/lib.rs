//! # refenrich-core
//!
//! Core functionality for refenrich — a batch pipeline that enriches
//! bibliographic references with a primary (source) and secondary (review)
//! URL, validated for accessibility and ranked by an LLM.
//!
//! ## Architecture
//!
//! - **Store**: tolerant line-oriented read/write of the reference file
//! - **Ledger**: crash-safe, lock-guarded progress record for resumable runs
//! - **Strategist**: query generation per reference
//! - **Search**: rate-limited, deduplicating web search client
//! - **Validator**: fetches and classifies candidate URL accessibility
//! - **Ranker**: LLM-based candidate scoring via a pipe-delimited grammar
//! - **Orchestrator**: sequences the above into the per-reference commit
//!
//! ## Quick Start
//!
//! ```no_run
//! use refenrich_core::{Error, RunConfig};
//!
//! let config = RunConfig::load(std::path::Path::new("refenrich.toml"))?;
//! println!("processing {:?}", config.input_file);
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`] with structured error
//! information:
//!
//! ```no_run
//! use refenrich_core::Error;
//!
//! fn handle(err: Error) {
//!     match err {
//!         Error::StoreFormatError(msg) => eprintln!("store parse error: {msg}"),
//!         e if e.is_recoverable() => eprintln!("recoverable: {e}"),
//!         e => eprintln!("fatal: {e}"),
//!     }
//! }
//! ```

/// Shared exponential backoff for retry loops.
pub mod backoff;
/// Run configuration: selection mode, thresholds, rate limits.
pub mod config;
/// Error types and result alias.
pub mod error;
/// Crash-safe, lock-guarded progress ledger.
pub mod ledger;
/// Sequences query generation, search, validation, ranking, and commit.
pub mod orchestrator;
/// LLM-based candidate ranking and pipe-delimited response parsing.
pub mod ranker;
/// Rate-limited, deduplicating web search client.
pub mod search;
/// Tolerant read/write of the line-oriented reference store.
pub mod store;
/// Query generation strategies.
pub mod strategist;
/// Core data types shared across the pipeline.
pub mod types;
/// URL accessibility validation.
pub mod validator;

pub use config::{LlmApiConfig, QueryMode, RateLimitConfig, RunConfig, SearchApiConfig, SelectionMode};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use orchestrator::{Orchestrator, ReferenceOutcome};
pub use ranker::{LlmRanker, RankCompletion};
pub use search::{SearchClient, SearchProvider};
pub use store::ReferenceStore;
pub use strategist::{render_queries, select_strategy, Strategy};
pub use types::*;
pub use validator::{AccessibilityValidator, Validate};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static TRACKING_PARAMS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
        "gclid",
        "fbclid",
        "ref",
        "mc_cid",
        "mc_eid",
    ]
});

static WWW_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^www\.").unwrap());

/// Normalize a URL into a stable deduplication key.
///
/// Lowercases scheme and host, strips known tracking query parameters, drops
/// a trailing slash, and drops a leading `www.` from the host. Used both for
/// cross-page/cross-query candidate dedup (see [`crate::search::SearchClient`])
/// and for the candidate identity key (see [`crate::types::Candidate::dedup_key`]).
///
/// URLs that fail to parse are returned lowercased and trimmed, so dedup
/// still degrades gracefully rather than panicking.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url.trim()) else {
        return url.trim().to_lowercase();
    };

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let host = WWW_PREFIX.replace(&host, "").to_string();
    let _ = parsed.set_host(Some(&host));

    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if retained.is_empty() {
        parsed.set_query(None);
    } else {
        let query = retained
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let scheme = parsed.scheme().to_lowercase();
    let mut path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }

    let mut key = format!("{scheme}://{host}{path}");
    if let Some(q) = parsed.query() {
        key.push('?');
        key.push_str(q);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_case_and_trailing_slash() {
        assert_eq!(
            normalize_url("HTTPS://Example.com/a/"),
            normalize_url("https://example.com/a")
        );
    }

    #[test]
    fn strips_tracking_params_but_keeps_others() {
        let a = normalize_url("https://example.com/a?utm_source=x&id=7");
        let b = normalize_url("https://example.com/a?id=7");
        assert_eq!(a, b);
    }

    #[test]
    fn drops_leading_www() {
        assert_eq!(
            normalize_url("https://www.example.com/a"),
            normalize_url("https://example.com/a")
        );
    }

    #[test]
    fn unparseable_url_degrades_to_lowercased_trim() {
        assert_eq!(normalize_url("  Not A Url  "), "not a url");
    }

    proptest::proptest! {
        /// Dedup keys must be a fixed point: normalizing an already-normalized
        /// URL can never produce a different key, or the dedup set would
        /// never converge across search pages.
        #[test]
        fn normalize_url_is_idempotent(
            scheme in "https?",
            host in "[a-z][a-z0-9]{0,10}\\.(com|org|edu)",
            path in "[a-z0-9/]{0,10}",
            query in "[a-z0-9=&_]{0,20}",
        ) {
            let url = format!("{scheme}://{host}/{path}?{query}");
            let once = normalize_url(&url);
            let twice = normalize_url(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
