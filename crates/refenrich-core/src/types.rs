//! Core data structures for the reference enrichment pipeline.
//!
//! These are explicit tagged records rather than the untyped field-bag the
//! source system used: every "has this field?" check becomes a pattern match
//! over a sum type (`ValidationStatus`, `Recommend`, ...), and parser output
//! carries a per-field [`FieldConfidence`] instead of sentinel strings.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// How confident the store parser is in a field it produced.
///
/// The tolerant parser (see [`crate::store`]) never fails outright; instead
/// a field that could not be matched against the grammar is marked
/// `Missing`, and one matched only via a fallback heuristic is `Uncertain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldConfidence {
    /// Matched the primary grammar rule.
    Found,
    /// Matched only via a fallback heuristic.
    Uncertain,
    /// Could not be extracted at all.
    Missing,
}

/// Per-field parse confidence recorded alongside a [`Reference`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseConfidence {
    /// Confidence in `authors`.
    pub authors: Option<FieldConfidence>,
    /// Confidence in `year`.
    pub year: Option<FieldConfidence>,
    /// Confidence in `title`.
    pub title: Option<FieldConfidence>,
    /// Confidence in `publication`.
    pub publication: Option<FieldConfidence>,
}

/// A bibliographic reference enriched by the pipeline.
///
/// `id` is immutable identity assigned externally (by the import process
/// that created the store). The orchestrator mutates only `queries`,
/// `candidates`, `urls`, and `flags`; `authors`/`year`/`title`/`publication`
/// are preserved verbatim unless an explicit edit occurs upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    /// Unique identity, assigned externally and never altered by the pipeline.
    pub id: u32,
    /// Author list as a free-form string.
    pub authors: Option<String>,
    /// Publication year, or a short qualifier such as "in press".
    pub year: Option<String>,
    /// Title of the work.
    pub title: Option<String>,
    /// Publisher or venue, if known.
    pub publication: Option<String>,
    /// 150-200 char free-text summary of why the work is relevant.
    pub relevance: Option<String>,
    /// Queries generated for the most recent pass, in render order.
    #[serde(default)]
    pub queries: Vec<String>,
    /// Candidate URLs last surveyed for this reference.
    #[serde(default)]
    pub candidates: Option<Vec<Candidate>>,
    /// The two canonical URL slots.
    #[serde(default)]
    pub urls: ReferenceUrls,
    /// Open enumeration of status tokens (see spec §6 for recognized values).
    #[serde(default)]
    pub flags: BTreeSet<String>,
    /// Best-effort parse confidence, populated by [`crate::store::load`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_confidence: Option<ParseConfidence>,
}

impl Reference {
    /// `true` when both URL slots are set and distinct is violated.
    ///
    /// The orchestrator must never commit a reference where this is `true`.
    #[must_use]
    pub fn violates_distinct_urls(&self) -> bool {
        match (&self.urls.primary, &self.urls.secondary) {
            (Some(p), Some(s)) => p == s,
            _ => false,
        }
    }

    /// Whether this reference was flagged for manual review in a prior pass.
    #[must_use]
    pub fn needs_manual_review(&self) -> bool {
        self.flags.contains("MANUAL_REVIEW")
    }

    /// Whether a prior pass recorded a validation failure worth steering the
    /// query strategist away from title-based search.
    #[must_use]
    pub fn prior_validation_failed(&self) -> bool {
        self.flags.contains("PAYWALL_DETECTED") || self.flags.contains("URL_VALIDATION_FAILED")
    }
}

/// The two canonical URL slots owned by the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceUrls {
    /// The work itself, ideally free full text.
    pub primary: Option<String>,
    /// A review or analysis of the work, distinct from `primary`.
    pub secondary: Option<String>,
}

/// A single search hit, prior to validation and ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// The hit's URL, as returned by the search provider.
    pub url: String,
    /// Search snippet title.
    pub title: String,
    /// Short extract from the search result.
    pub snippet: String,
    /// The query string that produced this hit.
    pub originating_query: String,
    /// Position of this hit within its originating query's result page.
    pub rank_within_query: u32,
}

impl Candidate {
    /// Deduplication key: lowercase scheme+host, tracking params stripped,
    /// trailing slash stripped.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        crate::normalize_url(&self.url)
    }
}

/// Outcome of fetching and classifying a candidate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Content fetched and matched the reference.
    Ok,
    /// HTTP status >= 400.
    HttpError,
    /// A `.pdf` URL returned an HTML content-type.
    ContentTypeMismatch,
    /// Paywall language detected in the body.
    Paywall,
    /// Login-wall language detected in the body.
    LoginRequired,
    /// Preview/sample-pages language detected in the body.
    PreviewOnly,
    /// HTTP 200 whose body indicates the resource does not exist.
    Soft404,
    /// The fetch did not complete before its deadline.
    Timeout,
    /// A connection-level failure occurred.
    NetworkError,
}

impl ValidationStatus {
    /// Whether a candidate with this status is rejected for the slot it was
    /// being considered for, absent any valid alternative.
    #[must_use]
    pub const fn is_rejected(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// Result of validating one candidate URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Classification outcome.
    pub status: ValidationStatus,
    /// HTTP status code, if a response was received.
    pub http_code: Option<u16>,
    /// URL after following redirects.
    pub effective_url: String,
    /// Names of the pattern families that matched (e.g. `"paywall"`).
    pub detected_patterns: Vec<String>,
    /// Confidence (0-100) in the pattern match that produced `status`.
    pub confidence: u8,
    /// Accessibility score (0-100) used to cap effective ranking scores.
    pub score: u8,
    /// Set when content was reachable but did not mention the reference.
    pub wrong_content: bool,
}

impl ValidationResult {
    /// A validation result for a candidate that was never fetched because
    /// the top-K cap was reached.
    #[must_use]
    pub fn not_validated() -> Self {
        Self {
            status: ValidationStatus::Ok,
            http_code: None,
            effective_url: String::new(),
            detected_patterns: Vec::new(),
            confidence: 0,
            score: 100,
            wrong_content: false,
        }
    }
}

/// Degree to which a candidate's title matched the reference's title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleMatch {
    /// Exact match.
    Exact,
    /// Partial overlap.
    Partial,
    /// No overlap.
    None,
}

/// Which slot the ranker recommends for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommend {
    /// Recommended as the primary URL.
    Primary,
    /// Recommended as the secondary URL.
    Secondary,
    /// Not recommended for either slot.
    Neither,
}

/// The LLM ranker's verdict for one (reference, candidate) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ranking {
    /// Score (0-100) for the primary slot.
    pub primary_score: u8,
    /// Score (0-100) for the secondary slot.
    pub secondary_score: u8,
    /// Short rationale for `primary_score`, truncated to 120 chars.
    pub primary_reason: String,
    /// Short rationale for `secondary_score`, truncated to 120 chars.
    pub secondary_reason: String,
    /// Title match quality.
    pub title_match: TitleMatch,
    /// Whether the author appears in the candidate's content.
    pub author_match: bool,
    /// The ranker's slot recommendation.
    pub recommend: Recommend,
}

/// A candidate together with its validation and ranking, as tracked inside
/// the orchestrator while assigning slots.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The candidate itself.
    pub candidate: Candidate,
    /// Validator outcome, if validation ran for this candidate.
    pub validation: Option<ValidationResult>,
    /// Ranker outcome, if ranking completed for this candidate.
    pub ranking: Option<Ranking>,
    /// Index of `candidate.originating_query` within the rendered query list.
    pub original_query_index: usize,
}

/// Non-English-language TLDs: a hit here is rarely the English-language
/// primary text the reference actually cites.
static NON_ENGLISH_TLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(de|fr|es|it|nl|jp|cn|ru|br)$").unwrap());

/// Review-aggregator domains: list a review without hosting its text.
const AGGREGATOR_DOMAINS: &[&str] = &["complete-review.com", "goodreads.com"];

/// Bibliography/catalog listing domains: a citation record, not the work.
const BIBLIOGRAPHY_LISTING_DOMAINS: &[&str] = &["worldcat.org"];

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase))
}

fn is_bibliography_listing(url: &str, host: &str) -> bool {
    BIBLIOGRAPHY_LISTING_DOMAINS.iter().any(|d| host == *d || host.ends_with(&format!(".{d}")))
        || (host == "philpapers.org" && url.contains("/rec/"))
}

impl ScoredCandidate {
    /// Cap on the primary slot score per §4.F, independent of whatever the
    /// ranker returned: a non-English TLD caps out at 70, and a title
    /// signaling a review-of-the-work rather than the work itself caps at 55.
    fn primary_cap(&self) -> u8 {
        let mut cap = 100;
        if let Some(host) = host_of(&self.candidate.url) {
            if NON_ENGLISH_TLD_RE.is_match(&host) {
                cap = cap.min(70);
            }
        }
        let title = self.candidate.title.to_lowercase();
        if title.contains("review of") || title.contains("book review") || title.contains("reviewed by") {
            cap = cap.min(55);
        }
        let url = self.candidate.url.to_lowercase();
        if ["quotations", "excerpts", "anthology", "selections"].iter().any(|kw| url.contains(*kw)) {
            cap = cap.min(65);
        }
        cap
    }

    /// Cap on the secondary slot score per §4.F: aggregator domains list a
    /// review without hosting it, bibliography listings are a citation
    /// record rather than a review.
    fn secondary_cap(&self) -> u8 {
        let mut cap = 100;
        if let Some(host) = host_of(&self.candidate.url) {
            if AGGREGATOR_DOMAINS.iter().any(|d| host == *d || host.ends_with(&format!(".{d}"))) {
                cap = cap.min(60);
            }
            if is_bibliography_listing(&self.candidate.url, &host) {
                cap = cap.min(55);
            }
        }
        cap
    }

    /// Content-type mismatch (a `.pdf` URL serving HTML) caps both slots at
    /// 40 regardless of what the ranker scored it: the candidate is likely
    /// not the document it claims to be.
    fn content_mismatch_cap(&self) -> u8 {
        if self.validation.as_ref().is_some_and(|v| v.status == ValidationStatus::ContentTypeMismatch) {
            40
        } else {
            100
        }
    }

    /// `min(ranker.primary_score, validator_cap, §4.F domain/content caps)`.
    #[must_use]
    pub fn effective_primary_score(&self) -> u8 {
        let llm = self.ranking.as_ref().map_or(0, |r| r.primary_score);
        let cap = self.validation.as_ref().map_or(100, |v| v.score);
        llm.min(cap).min(self.primary_cap()).min(self.content_mismatch_cap())
    }

    /// `min(ranker.secondary_score, validator_cap, §4.F domain/content caps)`.
    #[must_use]
    pub fn effective_secondary_score(&self) -> u8 {
        let llm = self.ranking.as_ref().map_or(0, |r| r.secondary_score);
        let cap = self.validation.as_ref().map_or(100, |v| v.score);
        llm.min(cap).min(self.secondary_cap()).min(self.content_mismatch_cap())
    }

    /// Whether the validator rejected this candidate outright (paywall,
    /// login, soft-404, http-error): never eligible for either slot.
    #[must_use]
    pub fn is_hard_rejected(&self) -> bool {
        matches!(
            self.validation.as_ref().map(|v| v.status),
            Some(
                ValidationStatus::Paywall
                    | ValidationStatus::LoginRequired
                    | ValidationStatus::Soft404
                    | ValidationStatus::HttpError
            )
        )
    }
}

/// One run's durable progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Timestamped identifier for this run.
    pub batch_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Hash of the configuration used, to detect accidental resume-with-different-config.
    pub config_hash: String,
    /// Reference IDs that have been committed (success or recorded error).
    pub completed: BTreeSet<u32>,
    /// Errors encountered, most recent last.
    pub errors: Vec<LedgerError>,
    /// Run-wide counters.
    pub stats: BatchStats,
    /// Current run status.
    pub status: BatchStatus,
}

/// Current status of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// The run is in progress.
    Running,
    /// The run paused (e.g. on quota exhaustion) and can be resumed.
    Paused,
    /// The run completed.
    Done,
}

/// A single recorded error, scoped to one reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerError {
    /// The reference ID the error occurred on.
    pub id: u32,
    /// Machine-stable error category (see [`crate::error::Error::category`]).
    pub error: String,
    /// When the error was recorded.
    pub at: DateTime<Utc>,
}

/// Run-wide counters, checkpointed after every reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    /// Total queries rendered across all references processed so far.
    pub queries_generated: u64,
    /// Total search requests issued.
    pub searches_run: u64,
    /// Total rank batches that returned a parseable result.
    pub ranks_completed: u64,
    /// References auto-finalized (both slots filled at score >= 85, `auto_finalize` on).
    pub auto_finalized: u64,
    /// References committed with `MANUAL_REVIEW` added.
    pub manual_review_added: u64,
    /// Error counts by category (see [`crate::error::Error::category`]).
    pub errors_by_kind: std::collections::BTreeMap<String, u64>,
}

impl BatchStats {
    /// Record an error against this batch's counters.
    pub fn record_error_kind(&mut self, category: &str) {
        *self.errors_by_kind.entry(category.to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violates_distinct_urls_only_when_equal_and_both_set() {
        let mut r = Reference {
            id: 1,
            authors: None,
            year: None,
            title: None,
            publication: None,
            relevance: None,
            queries: Vec::new(),
            candidates: None,
            urls: ReferenceUrls::default(),
            flags: BTreeSet::new(),
            parse_confidence: None,
        };
        assert!(!r.violates_distinct_urls());
        r.urls.primary = Some("https://a.example/x".to_string());
        assert!(!r.violates_distinct_urls());
        r.urls.secondary = Some("https://a.example/x".to_string());
        assert!(r.violates_distinct_urls());
        r.urls.secondary = Some("https://b.example/y".to_string());
        assert!(!r.violates_distinct_urls());
    }

    #[test]
    fn effective_scores_are_floored_by_validator_cap() {
        let sc = ScoredCandidate {
            candidate: Candidate {
                url: "https://example.com/a".to_string(),
                title: String::new(),
                snippet: String::new(),
                originating_query: String::new(),
                rank_within_query: 0,
            },
            validation: Some(ValidationResult {
                status: ValidationStatus::Paywall,
                http_code: Some(200),
                effective_url: "https://example.com/a".to_string(),
                detected_patterns: vec!["paywall".to_string()],
                confidence: 90,
                score: 50,
                wrong_content: false,
            }),
            ranking: Some(Ranking {
                primary_score: 95,
                secondary_score: 20,
                primary_reason: String::new(),
                secondary_reason: String::new(),
                title_match: TitleMatch::Exact,
                author_match: true,
                recommend: Recommend::Primary,
            }),
            original_query_index: 0,
        };
        assert_eq!(sc.effective_primary_score(), 50);
        assert_eq!(sc.effective_secondary_score(), 20);
        assert!(sc.is_hard_rejected());
    }
}
