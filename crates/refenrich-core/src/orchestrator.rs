//! Sequences the per-reference workflow: generate queries, search, validate,
//! rank, select, and commit.
//!
//! ```text
//! Selected → Queried → Searched → Validated → Ranked → Assigned → Committed
//! ```
//!
//! The state machine itself is implicit in the control flow of
//! [`Orchestrator::process_reference`]; what's explicit is the deterministic
//! selection rule and the failure semantics, both driven directly off the
//! per-reference contract in §4.G.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::ranker::{LlmRanker, RankCompletion};
use crate::search::{SearchClient, SearchProvider};
use crate::store::ReferenceStore;
use crate::strategist::render_queries;
use crate::types::{Reference, ScoredCandidate};
use crate::validator::Validate;
use crate::{Error, Result};

/// Batch schema version tagged onto every committed reference's flags.
const BATCH_VERSION: &str = "BATCH_v1.0";

/// Maximum concurrent accessibility fetches per reference.
const MAX_CONCURRENT_VALIDATIONS: usize = 4;

/// Outcome of processing a single reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceOutcome {
    /// Committed with at least one slot filled, or correctly left empty with
    /// `MANUAL_REVIEW` because nothing cleared threshold.
    Committed {
        /// The reference ID.
        id: u32,
    },
    /// Two consecutive rank batch failures: reference left untouched.
    RankFailed {
        /// The reference ID.
        id: u32,
    },
}

/// Drives one reference through the full pipeline.
pub struct Orchestrator<'a, P: SearchProvider, C: RankCompletion, V: Validate> {
    config: &'a RunConfig,
    search: &'a SearchClient<P>,
    ranker: &'a LlmRanker<C>,
    validator: &'a V,
}

impl<'a, P: SearchProvider, C: RankCompletion, V: Validate> Orchestrator<'a, P, C, V> {
    /// Build an orchestrator over its three external collaborators.
    #[must_use]
    pub const fn new(
        config: &'a RunConfig,
        search: &'a SearchClient<P>,
        ranker: &'a LlmRanker<C>,
        validator: &'a V,
    ) -> Self {
        Self {
            config,
            search,
            ranker,
            validator,
        }
    }

    /// Run the full per-reference workflow and commit the result into `store`.
    pub async fn process_reference(&self, store: &mut ReferenceStore, mut reference: Reference) -> Result<ReferenceOutcome> {
        debug!(id = reference.id, "processing reference");
        // Selected -> Queried
        let queries = render_queries(
            &reference,
            self.config.query_mode,
            self.config.primary_split,
            self.config.secondary_split,
        );
        reference.queries = queries.clone();

        // Queried -> Searched
        let mut candidates = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (idx, query) in queries.iter().enumerate() {
            let hits = self.search.search(query, idx).await?;
            for c in hits {
                if seen.insert(c.dedup_key()) {
                    candidates.push((idx, c));
                }
            }
            sleep(std::time::Duration::from_millis(self.config.rate_limit.search_ms)).await;
        }

        // Searched -> Validated (top validate_top_k by rank position pre-ranking)
        let top_k = self.config.validate_top_k as usize;
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|(idx, candidate)| ScoredCandidate {
                candidate,
                validation: None,
                ranking: None,
                original_query_index: idx,
            })
            .collect();

        let validations: Vec<_> = stream::iter(scored.iter().take(top_k).map(|sc| {
            let url = sc.candidate.url.clone();
            let reference = &reference;
            async move { self.validator.validate(&url, reference).await }
        }))
        .buffered(MAX_CONCURRENT_VALIDATIONS)
        .collect()
        .await;
        for (sc, result) in scored.iter_mut().take(top_k).zip(validations) {
            sc.validation = Some(result);
        }

        // Validated -> Ranked
        let mut rank_failures = 0u32;
        for batch in scored.chunks_mut(self.config.rank_batch_size as usize) {
            let batch_candidates: Vec<_> = batch.iter().map(|sc| sc.candidate.clone()).collect();
            match self.ranker.rank_batch(&reference, &batch_candidates).await {
                Ok(rankings) => {
                    rank_failures = 0;
                    for (idx, ranking) in rankings {
                        if let Some(sc) = batch.get_mut(idx) {
                            sc.ranking = Some(ranking);
                        }
                    }
                }
                Err(e) => {
                    rank_failures += 1;
                    warn!(id = reference.id, error = %e, rank_failures, "rank batch failed");
                    if rank_failures >= 2 {
                        return Ok(ReferenceOutcome::RankFailed { id: reference.id });
                    }
                }
            }
        }
        if scored.iter().all(|sc| sc.ranking.is_none()) && !scored.is_empty() {
            return Ok(ReferenceOutcome::RankFailed { id: reference.id });
        }

        // Ranked -> Assigned
        let (primary, secondary) = select(&scored, self.config.primary_threshold, self.config.secondary_threshold);

        reference.flags.remove("MANUAL_REVIEW");
        match primary {
            Some(idx) => reference.urls.primary = Some(scored[idx].candidate.url.clone()),
            None => {
                reference.flags.insert("MANUAL_REVIEW".to_string());
            }
        }
        if let Some(idx) = secondary {
            reference.urls.secondary = Some(scored[idx].candidate.url.clone());
        }
        reference.flags.insert(BATCH_VERSION.to_string());

        if self.config.auto_finalize {
            let both_high = primary.is_some_and(|i| scored[i].effective_primary_score() >= 85)
                && secondary.is_some_and(|i| scored[i].effective_secondary_score() >= 85);
            if both_high {
                reference.flags.insert("FINALIZED".to_string());
            }
        }

        // Assigned -> Committed
        let id = reference.id;
        info!(
            id,
            primary = reference.urls.primary.is_some(),
            secondary = reference.urls.secondary.is_some(),
            manual_review = reference.flags.contains("MANUAL_REVIEW"),
            "committing reference"
        );
        store.update(reference);
        Ok(ReferenceOutcome::Committed { id })
    }
}

/// Deterministic selection rule, §4.G.
///
/// Returns `(primary_index, secondary_index)` into `scored`.
#[must_use]
pub fn select(
    scored: &[ScoredCandidate],
    threshold_primary: f64,
    threshold_secondary: f64,
) -> (Option<usize>, Option<usize>) {
    let eligible_primary: Vec<usize> = scored
        .iter()
        .enumerate()
        .filter(|(_, sc)| !sc.is_hard_rejected() && f64::from(sc.effective_primary_score()) >= threshold_primary)
        .map(|(i, _)| i)
        .collect();

    let primary = best_by_tiebreak(scored, &eligible_primary, |sc| sc.effective_primary_score());

    let mutual_exclusivity_applies = primary.is_some_and(|i| scored[i].effective_primary_score() >= 85);

    let eligible_secondary: Vec<usize> = scored
        .iter()
        .enumerate()
        .filter(|(i, sc)| {
            if Some(*i) == primary || sc.is_hard_rejected() {
                return false;
            }
            if f64::from(sc.effective_secondary_score()) < threshold_secondary {
                return false;
            }
            if mutual_exclusivity_applies {
                // Intrinsic to the candidate itself: is it clearly more
                // review-like than source-like on its own merits, not
                // relative to whichever candidate won the primary slot.
                let delta = i32::from(sc.effective_secondary_score()) - i32::from(sc.effective_primary_score());
                if delta < 20 {
                    return false;
                }
            }
            true
        })
        .map(|(i, _)| i)
        .collect();

    let secondary = best_by_tiebreak(scored, &eligible_secondary, |sc| sc.effective_secondary_score());

    (primary, secondary)
}

fn best_by_tiebreak(
    scored: &[ScoredCandidate],
    eligible: &[usize],
    score_fn: impl Fn(&ScoredCandidate) -> u8,
) -> Option<usize> {
    eligible
        .iter()
        .copied()
        .max_by(|&a, &b| {
            let sa = &scored[a];
            let sb = &scored[b];
            score_fn(sa)
                .cmp(&score_fn(sb))
                .then_with(|| {
                    let acc_a = sa.validation.as_ref().map_or(0, |v| v.score);
                    let acc_b = sb.validation.as_ref().map_or(0, |v| v.score);
                    acc_a.cmp(&acc_b)
                })
                .then_with(|| sb.candidate.rank_within_query.cmp(&sa.candidate.rank_within_query))
                .then_with(|| sb.original_query_index.cmp(&sa.original_query_index))
        })
}

/// Render a dry-run plan (queries only, zero external calls) for `reference`.
#[must_use]
pub fn dry_run_plan(reference: &Reference, config: &RunConfig) -> Vec<String> {
    render_queries(
        reference,
        config.query_mode,
        config.primary_split,
        config.secondary_split,
    )
}

/// Track per-stat counters during a run; kept separate from the ledger so
/// unit tests can assert on it without a filesystem-backed ledger.
#[derive(Debug, Default)]
pub struct RunStats {
    /// Counts keyed by error category.
    pub errors_by_kind: HashMap<String, u64>,
}

impl RunStats {
    /// Record an error against this run's counters.
    pub fn record(&mut self, error: &Error) {
        *self.errors_by_kind.entry(error.category().to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candidate, Ranking, Recommend, TitleMatch, ValidationResult, ValidationStatus};

    fn candidate(url: &str, rank: u32) -> Candidate {
        Candidate {
            url: url.to_string(),
            title: "t".to_string(),
            snippet: "s".to_string(),
            originating_query: "q".to_string(),
            rank_within_query: rank,
        }
    }

    fn scored(url: &str, primary: u8, secondary: u8, accessibility: u8, rank: u32, qidx: usize) -> ScoredCandidate {
        ScoredCandidate {
            candidate: candidate(url, rank),
            validation: Some(ValidationResult {
                status: ValidationStatus::Ok,
                http_code: Some(200),
                effective_url: url.to_string(),
                detected_patterns: Vec::new(),
                confidence: 90,
                score: accessibility,
                wrong_content: false,
            }),
            ranking: Some(Ranking {
                primary_score: primary,
                secondary_score: secondary,
                primary_reason: String::new(),
                secondary_reason: String::new(),
                title_match: TitleMatch::Exact,
                author_match: true,
                recommend: Recommend::Primary,
            }),
            original_query_index: qidx,
        }
    }

    #[test]
    fn clear_free_full_text_selects_primary_only() {
        let candidates = vec![scored("https://archive.org/a", 95, 20, 100, 0, 0)];
        let (primary, secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, Some(0));
        assert_eq!(secondary, None);
    }

    #[test]
    fn paywalled_journal_and_scholarly_review_fill_both_slots() {
        let candidates = vec![
            scored("https://uci.edu/tversky.pdf", 92, 10, 95, 0, 0),
            scored("https://jstor.org/review", 20, 90, 90, 1, 0),
        ];
        let (primary, secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, Some(0));
        assert_eq!(secondary, Some(1));
    }

    #[test]
    fn mutual_exclusivity_blocks_when_candidate_is_not_clearly_review_like() {
        let candidates = vec![
            scored("https://a.example/primary", 95, 10, 90, 0, 0),
            // Own delta (90 - 85 = 5) is under the 20-point gap, even though
            // its secondary score alone would clear the threshold.
            scored("https://b.example/secondary", 85, 90, 90, 1, 0),
        ];
        let (primary, secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, Some(0));
        assert_eq!(secondary, None, "candidate's own eff_secondary - eff_primary is only 5");
    }

    #[test]
    fn mutual_exclusivity_allows_candidate_clearly_more_review_like_than_source_like() {
        let candidates = vec![
            scored("https://a.example/primary", 95, 10, 90, 0, 0),
            // Own delta (83 - 5 = 78) clears the 20-point gap: this
            // candidate is eligible on its own merits regardless of how
            // strong the already-selected primary happens to be.
            scored("https://b.example/secondary", 5, 83, 90, 1, 0),
        ];
        let (primary, secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, Some(0));
        assert_eq!(secondary, Some(1));
    }

    #[test]
    fn bibliography_listing_trap_is_capped_below_secondary_threshold() {
        // The ranker ignores the prompt's caps (raw secondary=95); the
        // orchestrator's own domain-cap enforcement must clamp philpapers
        // rec pages to secondary <= 55 regardless.
        let candidates = vec![
            scored("https://philpapers.org/rec/X", 50, 95, 90, 0, 0),
            scored("https://actualreview.com/x", 40, 88, 90, 1, 0),
        ];
        let (primary, secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, None);
        assert_eq!(secondary, Some(1));
    }

    #[test]
    fn aggregator_domain_secondary_is_capped_even_when_ranker_scores_it_high() {
        let candidates = vec![scored("https://goodreads.com/book/123", 10, 99, 95, 0, 0)];
        let (_, secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(secondary, None, "goodreads.com secondary must be capped to 60, below threshold");
    }

    #[test]
    fn non_english_tld_caps_primary_below_threshold_even_when_ranker_scores_it_high() {
        let candidates = vec![scored("https://example.de/paper.pdf", 98, 10, 95, 0, 0)];
        let (primary, _) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, None, "capped to 70, below the 75.0 threshold despite a raw score of 98");
    }

    #[test]
    fn soft_404_is_excluded_even_with_high_llm_score() {
        let mut soft_404 = scored("https://uky.edu/anderson.pdf", 95, 10, 0, 0, 0);
        soft_404.validation.as_mut().unwrap().status = ValidationStatus::Soft404;
        let fallback = scored("https://other.edu/anderson.pdf", 90, 10, 95, 1, 0);
        let candidates = vec![soft_404, fallback];
        let (primary, _secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, Some(1));
    }

    #[test]
    fn no_candidate_clearing_threshold_leaves_both_slots_empty() {
        let candidates = vec![scored("https://weak.example/x", 40, 30, 50, 0, 0)];
        let (primary, secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, None);
        assert_eq!(secondary, None);
    }

    #[test]
    fn ties_broken_by_accessibility_then_rank_then_query_index() {
        let candidates = vec![
            scored("https://a.example/x", 90, 10, 80, 2, 1),
            scored("https://b.example/y", 90, 10, 95, 0, 0),
        ];
        let (primary, _secondary) = select(&candidates, 75.0, 75.0);
        assert_eq!(primary, Some(1), "higher accessibility score should win the tie");
    }
}
