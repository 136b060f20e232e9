//! Error types for the reference enrichment pipeline.
//!
//! Errors are grouped by which component raises them (store, ledger, search,
//! validator, ranker, orchestrator) so callers can match on a narrow set of
//! variants instead of string-sniffing. Each variant records whether the
//! failure is locally recoverable, per spec §7's error policy table.

use thiserror::Error;

/// The result type used throughout `refenrich-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed (reading/writing the store, ledger, or lock files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network request failed (search, validation fetch, or rank request).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Config file could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// A reference store line could not be tokenized into the minimal `{id}` subset.
    #[error("Store format error: {0}")]
    StoreFormatError(String),

    /// The store's temp-file write or rename failed; the run aborts without a ledger update.
    #[error("Store write failed: {0}")]
    StoreWriteFailed(String),

    /// Another batch run already holds the ledger's exclusive lock.
    #[error("Ledger locked: {0}")]
    LedgerLocked(String),

    /// The ledger file exists but is not valid JSON for the expected schema.
    #[error("Ledger corrupt: {0}")]
    LedgerCorrupt(String),

    /// The search API rejected a request with a rate-limit response; backoff and retry.
    #[error("Search rate limited: {0}")]
    SearchRateLimited(String),

    /// The search API's quota is exhausted for this run; not recoverable without operator action.
    #[error("Search quota exhausted")]
    SearchQuotaExhausted,

    /// A transient I/O failure during search or validation, after exhausting retries.
    #[error("Transient IO error: {0}")]
    TransientIo(String),

    /// A validation fetch did not complete before its deadline.
    #[error("Fetch timeout: {0}")]
    FetchTimeout(String),

    /// Fewer than half of a rank batch's expected lines parsed as valid score rows.
    #[error("Rank parse error: {0}")]
    RankParseError(String),

    /// A rank request did not complete before its deadline, even after a halved retry.
    #[error("Rank timeout")]
    RankTimeout,

    /// Two consecutive rank batch failures for one reference.
    #[error("Rank failed: {0}")]
    RankFailed(String),

    /// Requested resource was not found (e.g. no ledger at the given path).
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether retrying the same operation might succeed without operator intervention.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SearchRateLimited(_)
                | Self::TransientIo(_)
                | Self::FetchTimeout(_)
                | Self::RankParseError(_)
                | Self::RankTimeout
                | Self::Network(_)
        )
    }

    /// Short machine-stable category name, used for ledger stats and summaries.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::Config(_) => "config",
            Self::StoreFormatError(_) => "store_format_error",
            Self::StoreWriteFailed(_) => "store_write_failed",
            Self::LedgerLocked(_) => "ledger_locked",
            Self::LedgerCorrupt(_) => "ledger_corrupt",
            Self::SearchRateLimited(_) => "search_rate_limited",
            Self::SearchQuotaExhausted => "search_quota_exhausted",
            Self::TransientIo(_) => "transient_io",
            Self::FetchTimeout(_) => "fetch_timeout",
            Self::RankParseError(_) => "rank_parse_error",
            Self::RankTimeout => "rank_timeout",
            Self::RankFailed(_) => "rank_failed",
            Self::NotFound(_) => "not_found",
        }
    }
}
