//! Classifies a candidate URL by fetching it, not by domain heuristics.
//!
//! Redirects are followed (max 5 hops) within a 15 s deadline, using a
//! browser-like user agent and a lax TLS policy (many academic hosts carry
//! stale certificates). The first 50 KB of the body is scanned for paywall,
//! login, preview, and soft-404 pattern families before falling back to a
//! title-word-coverage check.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use crate::types::{Reference, ValidationResult, ValidationStatus};
use crate::{Error, Result};

/// Abstraction over URL accessibility validation, so the orchestrator can be
/// tested without performing real network fetches.
#[async_trait]
pub trait Validate: Send + Sync {
    /// Validate `url` against `reference`.
    async fn validate(&self, url: &str, reference: &Reference) -> ValidationResult;
}

#[async_trait]
impl Validate for AccessibilityValidator {
    async fn validate(&self, url: &str, reference: &Reference) -> ValidationResult {
        self.fetch_and_classify(url, reference).await
    }
}

const MAX_BODY_BYTES: usize = 50 * 1024;
const FETCH_DEADLINE: Duration = Duration::from_secs(15);

fn pattern_set(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!(r"(?i)\b{p}\b")).expect("valid pattern"))
        .collect()
}

static PAYWALL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    pattern_set(&[
        "subscribe to continue",
        "purchase this article",
        r"\$[0-9]+ to access",
        "institutional subscription required",
        "buy this article",
        "pay.?per.?view",
        "subscription required",
        "get full access",
        "unlock this article",
        "become a subscriber",
        "purchase access",
        "paywall",
    ])
});

static LOGIN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    pattern_set(&[
        "sign in to continue",
        "log in to view",
        "institutional access required",
        "please log in",
        "please sign in",
        "create a free account to continue",
        "login required",
        "sign in to your account",
        "member login",
        "access denied. please log in",
    ])
});

static PREVIEW_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    pattern_set(&[
        "limited preview",
        "sample pages",
        r"read [0-9]+ pages free",
        "preview only",
        "this is a preview",
        r"first [0-9]+ pages",
        "preview mode",
        "excerpt only",
        "free preview",
    ])
});

static SOFT_404_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    pattern_set(&[
        "page not found",
        "document unavailable",
        "doi not found",
        "we couldn.t find",
        "content not available",
        "resource not found",
        "this page no longer exists",
        "item not found",
    ])
});

static TIER1_HOST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|\.)(edu|gov)$|(^|\.)(archive|doi)\.org$").unwrap());

/// Whether `url`'s host (not its path) is a tier-1 source per §4.E.
fn is_tier1_host(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|host| TIER1_HOST_RE.is_match(&host))
}

/// Fetches and classifies candidate URLs.
pub struct AccessibilityValidator {
    client: Client,
}

impl AccessibilityValidator {
    /// Build a validator with a browser-like UA and relaxed TLS verification.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_DEADLINE)
            .redirect(reqwest::redirect::Policy::limited(5))
            .danger_accept_invalid_certs(true)
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            )
            .build()
            .map_err(Error::Network)?;
        Ok(Self { client })
    }

    /// Validate `url` against `reference`'s title for content-match scoring.
    async fn fetch_and_classify(&self, url: &str, reference: &Reference) -> ValidationResult {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ValidationResult {
                    status: ValidationStatus::Timeout,
                    http_code: None,
                    effective_url: url.to_string(),
                    detected_patterns: Vec::new(),
                    confidence: 100,
                    score: 0,
                    wrong_content: false,
                };
            }
            Err(_) => {
                return ValidationResult {
                    status: ValidationStatus::NetworkError,
                    http_code: None,
                    effective_url: url.to_string(),
                    detected_patterns: Vec::new(),
                    confidence: 100,
                    score: 0,
                    wrong_content: false,
                };
            }
        };

        let status = response.status();
        let effective_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if status.as_u16() >= 400 {
            return ValidationResult {
                status: ValidationStatus::HttpError,
                http_code: Some(status.as_u16()),
                effective_url,
                detected_patterns: Vec::new(),
                confidence: 100,
                score: 0,
                wrong_content: false,
            };
        }

        let expects_pdf = url.to_lowercase().ends_with(".pdf");
        if expects_pdf && content_type.to_lowercase().contains("html") {
            return ValidationResult {
                status: ValidationStatus::ContentTypeMismatch,
                http_code: Some(status.as_u16()),
                effective_url,
                detected_patterns: Vec::new(),
                confidence: 90,
                score: 15,
                wrong_content: false,
            };
        }

        let mut body_bytes: Vec<u8> = Vec::with_capacity(MAX_BODY_BYTES);
        let mut stream = response.bytes_stream();
        loop {
            if body_bytes.len() >= MAX_BODY_BYTES {
                break;
            }
            match stream.next().await {
                Some(Ok(chunk)) => {
                    let remaining = MAX_BODY_BYTES - body_bytes.len();
                    if chunk.len() > remaining {
                        body_bytes.extend_from_slice(&chunk[..remaining]);
                        break;
                    }
                    body_bytes.extend_from_slice(&chunk);
                }
                Some(Err(_)) => {
                    return ValidationResult {
                        status: ValidationStatus::NetworkError,
                        http_code: Some(status.as_u16()),
                        effective_url,
                        detected_patterns: Vec::new(),
                        confidence: 80,
                        score: 0,
                        wrong_content: false,
                    };
                }
                None => break,
            }
        }
        // The 50 KB cap may split a multi-byte UTF-8 sequence; lossy decode
        // degrades that boundary gracefully instead of failing the fetch.
        let truncated = String::from_utf8_lossy(&body_bytes).to_string();
        let lower = truncated.to_lowercase();

        let result = Self::classify_body(&lower, &effective_url, status, reference);
        debug!(url, status = ?result.status, score = result.score, "validated candidate");
        result
    }

    fn classify_body(
        lower_body: &str,
        effective_url: &str,
        status: StatusCode,
        reference: &Reference,
    ) -> ValidationResult {
        if let Some(result) = Self::match_family(lower_body, &PAYWALL_PATTERNS, effective_url, status, ValidationStatus::Paywall, 50) {
            return result;
        }
        if let Some(result) = Self::match_family(lower_body, &LOGIN_PATTERNS, effective_url, status, ValidationStatus::LoginRequired, 55) {
            return result;
        }
        if let Some(result) = Self::match_family(lower_body, &PREVIEW_PATTERNS, effective_url, status, ValidationStatus::PreviewOnly, 35) {
            return result;
        }
        if let Some(result) = Self::match_family(lower_body, &SOFT_404_PATTERNS, effective_url, status, ValidationStatus::Soft404, 0) {
            return result;
        }

        let covered = title_coverage(lower_body, reference.title.as_deref().unwrap_or_default());
        if covered >= 3 {
            let tier1 = is_tier1_host(effective_url);
            return ValidationResult {
                status: ValidationStatus::Ok,
                http_code: Some(status.as_u16()),
                effective_url: effective_url.to_string(),
                detected_patterns: Vec::new(),
                confidence: 90,
                score: if tier1 { 95 } else { 90 },
                wrong_content: false,
            };
        }

        ValidationResult {
            status: ValidationStatus::Ok,
            http_code: Some(status.as_u16()),
            effective_url: effective_url.to_string(),
            detected_patterns: Vec::new(),
            confidence: 60,
            score: 40,
            wrong_content: true,
        }
    }

    fn match_family(
        lower_body: &str,
        patterns: &[Regex],
        effective_url: &str,
        status: StatusCode,
        result_status: ValidationStatus,
        score: u8,
    ) -> Option<ValidationResult> {
        let matched: Vec<String> = patterns
            .iter()
            .filter(|re| re.is_match(lower_body))
            .map(|re| re.as_str().to_string())
            .collect();
        if matched.is_empty() {
            return None;
        }
        Some(ValidationResult {
            status: result_status,
            http_code: Some(status.as_u16()),
            effective_url: effective_url.to_string(),
            detected_patterns: matched,
            confidence: 85,
            score,
            wrong_content: false,
        })
    }
}

/// Count of the first 6 significant (len > 3) title words present in `body`.
fn title_coverage(lower_body: &str, title: &str) -> usize {
    title
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .take(6)
        .filter(|w| lower_body.contains(&w.to_lowercase()))
        .count()
}
