//! LLM-based candidate ranking: prompt construction and the pipe-delimited
//! score-matrix parser.
//!
//! Pipe-delimited output is used instead of JSON because a model's
//! free-form additions (markdown fences, leading prose) corrupt JSON but
//! are trivial to filter from a line-oriented format: any line not matching
//! `^\d+\|` after fence-stripping is simply not a data row.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::timeout;

use crate::backoff;
use crate::types::{Candidate, Ranking, Recommend, Reference, TitleMatch};
use crate::{Error, Result};

const RANK_TIMEOUT: Duration = Duration::from_secs(18);
const REASON_MAX_LEN: usize = 120;
const MAX_OUTPUT_TOKENS: u32 = 800;
const MIN_FIELDS: usize = 8;

/// A backend that turns a prompt into a raw chat-completion response.
#[async_trait]
pub trait RankCompletion: Send + Sync {
    /// Issue one chat-completion request and return the raw text response.
    async fn complete(&self, system_prompt: &str, user_prompt: &str, max_tokens: u32) -> Result<String>;
}

/// Ranks batches of candidates against a reference via an LLM backend.
pub struct LlmRanker<C: RankCompletion> {
    completion: C,
}

impl<C: RankCompletion> LlmRanker<C> {
    /// Build a ranker over the given completion backend.
    #[must_use]
    pub const fn new(completion: C) -> Self {
        Self { completion }
    }

    /// Rank one batch, retrying once with a halved batch on timeout or a
    /// parse-error rate above 50%, after the same backoff delay the search
    /// client uses for its own first retry.
    pub async fn rank_batch(&self, reference: &Reference, candidates: &[Candidate]) -> Result<Vec<(usize, Ranking)>> {
        match self.try_rank(reference, candidates).await {
            Ok(rankings) => Ok(rankings),
            Err(Error::RankTimeout) | Err(Error::RankParseError(_)) if candidates.len() > 1 => {
                backoff::wait(0).await;
                let half = candidates.len() / 2;
                let mut combined = self.try_rank(reference, &candidates[..half]).await?;
                combined.extend(self.try_rank(reference, &candidates[half..]).await?);
                Ok(combined)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_rank(&self, reference: &Reference, candidates: &[Candidate]) -> Result<Vec<(usize, Ranking)>> {
        let system_prompt = build_system_prompt();
        let user_prompt = build_user_prompt(reference, candidates);

        let raw = timeout(
            RANK_TIMEOUT,
            self.completion.complete(&system_prompt, &user_prompt, MAX_OUTPUT_TOKENS),
        )
        .await
        .map_err(|_| Error::RankTimeout)??;

        parse_rank_response(&raw, candidates.len())
    }
}

/// System prompt describing the output grammar and scoring tiers (§4.F.1).
#[must_use]
pub fn build_system_prompt() -> String {
    concat!(
        "You rank candidate URLs for a bibliographic reference. ",
        "Respond with exactly one line per candidate, no prose, no markdown fences, in this form:\n",
        "INDEX|PRIMARY|SECONDARY|PRIMARY_REASON|SECONDARY_REASON|TITLE_MATCH|AUTHOR_MATCH|RECOMMEND\n\n",
        "Primary scoring: 95-100 free full text from a tier-1 domain with an exact title match and no review indicators; ",
        "85-94 free full text from a general domain; 70-84 paywalled or preview full text; ",
        "60-74 a publisher/purchase page as a last resort; <=55 a review, quotations, aggregator, or wrong-language page.\n",
        "Secondary scoring: 90-100 a scholarly review article; 75-89 a non-academic but critical review; ",
        "60-74 an academic discussion citing the work; <=60 a bibliography/metadata page or topic-only discussion.\n",
        "Caps you must apply: a non-English TLD caps primary at 70; a title containing 'review of'/'book review'/'reviewed by' caps primary at 55; ",
        "a URL containing 'quotations', 'excerpts', 'anthology', or 'selections' caps primary at 65; ",
        "known review-aggregator domains cap secondary at 60; known bibliography-listing domains cap secondary at 55; ",
        "a content-type mismatch caps both at 40.\n",
        "TITLE_MATCH is one of exact|partial|none. AUTHOR_MATCH is yes|no. RECOMMEND is primary|secondary|neither."
    )
    .to_string()
}

/// User prompt listing the reference and its numbered candidates.
#[must_use]
pub fn build_user_prompt(reference: &Reference, candidates: &[Candidate]) -> String {
    let mut out = format!(
        "Reference: {} ({}). {}.\n\nCandidates:\n",
        reference.authors.as_deref().unwrap_or("Unknown"),
        reference.year.as_deref().unwrap_or("n.d."),
        reference.title.as_deref().unwrap_or("Untitled"),
    );
    for (i, c) in candidates.iter().enumerate() {
        out.push_str(&format!("{}. {} — {}\n   {}\n", i + 1, c.title, c.url, c.snippet));
    }
    out
}

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^```[a-zA-Z]*\s*$").unwrap());
static ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\d+)\|").unwrap());

/// Parse a raw completion response into `(candidate_index, Ranking)` pairs.
///
/// Fails the whole batch with [`Error::RankParseError`] when more than half
/// of `expected_lines` fail to parse.
pub fn parse_rank_response(raw: &str, expected_lines: usize) -> Result<Vec<(usize, Ranking)>> {
    let stripped = FENCE_RE.replace_all(raw, "");
    let mut results = Vec::new();
    let mut parse_errors = 0usize;
    let mut candidate_lines = 0usize;

    for line in stripped.lines() {
        let line = line.trim();
        if !ROW_RE.is_match(line) {
            continue;
        }
        candidate_lines += 1;
        match parse_row(line) {
            Some((idx, ranking)) => results.push((idx, ranking)),
            None => parse_errors += 1,
        }
    }

    let denominator = expected_lines.max(candidate_lines).max(1);
    if parse_errors * 2 > denominator {
        return Err(Error::RankParseError(format!(
            "{parse_errors} of {denominator} lines failed to parse"
        )));
    }

    Ok(results)
}

fn parse_row(line: &str) -> Option<(usize, Ranking)> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }
    let index: usize = fields[0].trim().parse::<usize>().ok()?.checked_sub(1)?;
    let primary_score = fields[1].trim().parse::<f64>().ok()?.round().clamp(0.0, 100.0) as u8;
    let secondary_score = fields[2].trim().parse::<f64>().ok()?.round().clamp(0.0, 100.0) as u8;
    let primary_reason = truncate(fields[3].trim(), REASON_MAX_LEN);
    let secondary_reason = truncate(fields[4].trim(), REASON_MAX_LEN);
    let title_match = match fields[5].trim().to_lowercase().as_str() {
        "exact" => TitleMatch::Exact,
        "partial" => TitleMatch::Partial,
        _ => TitleMatch::None,
    };
    let author_match = matches!(fields[6].trim().to_lowercase().as_str(), "yes" | "true");
    let recommend = match fields[7].trim().to_lowercase().as_str() {
        "primary" => Recommend::Primary,
        "secondary" => Recommend::Secondary,
        _ => Recommend::Neither,
    };

    Some((
        index,
        Ranking {
            primary_score,
            secondary_score,
            primary_reason,
            secondary_reason,
            title_match,
            author_match,
            recommend,
        },
    ))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_row() {
        let raw = "1|95|20|Free full text, tier-1 domain|Not a review|exact|yes|primary";
        let rows = parse_rank_response(raw, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 0);
        assert_eq!(rows[0].1.primary_score, 95);
        assert_eq!(rows[0].1.recommend, Recommend::Primary);
    }

    #[test]
    fn strips_markdown_fences_before_matching_rows() {
        let raw = "```\n1|90|10|ok|ok|exact|yes|primary\n```";
        let rows = parse_rank_response(raw, 1).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn reasons_are_truncated_to_120_chars() {
        let long_reason = "x".repeat(200);
        let raw = format!("1|90|10|{long_reason}|ok|exact|yes|primary");
        let rows = parse_rank_response(&raw, 1).unwrap();
        assert_eq!(rows[0].1.primary_reason.len(), REASON_MAX_LEN);
    }

    #[test]
    fn more_than_half_parse_errors_fails_the_batch() {
        let raw = "1|bad\n2|also-bad\n3|90|10|ok|ok|exact|yes|primary";
        let err = parse_rank_response(raw, 3).unwrap_err();
        assert!(matches!(err, Error::RankParseError(_)));
    }

    #[test]
    fn single_candidate_batch_still_parses() {
        let raw = "1|60|80|discussion|scholarly review|partial|no|secondary";
        let rows = parse_rank_response(raw, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.recommend, Recommend::Secondary);
    }

    #[test]
    fn ignores_leading_prose_lines() {
        let raw = "Sure, here is the ranking:\n1|90|10|ok|ok|exact|yes|primary";
        let rows = parse_rank_response(raw, 1).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
