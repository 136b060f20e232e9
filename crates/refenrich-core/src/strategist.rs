//! Selects a search strategy for a reference and renders its query list.

use crate::config::QueryMode;
use crate::types::Reference;

/// Hard cap on a rendered query's length; over-long titles are truncated at
/// a word boundary.
const MAX_QUERY_LEN: usize = 200;

/// Which strategy produced a reference's query list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Quote the first 60 chars of the title plus author surname and year.
    TitleFirst60Chars,
    /// Five unquoted keyword phrases drawn from title and relevance.
    TitleKeywords5Terms,
    /// Tier-1-domain keywords OR-ed with the title.
    PlusBest2FromTier1,
}

/// Pure, deterministic strategy selection per the reference's state.
#[must_use]
pub fn select_strategy(reference: &Reference) -> Strategy {
    if reference.needs_manual_review() || reference.prior_validation_failed() {
        return Strategy::TitleKeywords5Terms;
    }
    let title_len = reference.title.as_deref().map_or(0, str::len);
    if title_len < 20 || reference.authors.is_none() || reference.year.is_none() {
        return Strategy::PlusBest2FromTier1;
    }
    Strategy::TitleFirst60Chars
}

/// Render the bounded, ordered query list for one reference.
#[must_use]
pub fn render_queries(reference: &Reference, mode: QueryMode, primary_split: u32, secondary_split: u32) -> Vec<String> {
    match mode {
        QueryMode::Smart => render_smart(reference, select_strategy(reference)),
        QueryMode::Standard => render_standard(reference, primary_split, secondary_split),
    }
}

fn author_surname(authors: Option<&str>) -> String {
    authors
        .and_then(|a| a.split(|c: char| c == ',' || c == '&' || c == ' ').next())
        .unwrap_or_default()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

fn truncate_at_word_boundary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let slice = &s[..end];
    match slice.rfind(' ') {
        Some(idx) if idx > 0 => slice[..idx].to_string(),
        _ => slice.to_string(),
    }
}

fn render(query: String) -> String {
    truncate_at_word_boundary(&query, MAX_QUERY_LEN)
}

fn render_smart(reference: &Reference, strategy: Strategy) -> Vec<String> {
    let title = reference.title.as_deref().unwrap_or_default();
    let surname = author_surname(reference.authors.as_deref());
    let year = reference.year.as_deref().unwrap_or_default();

    match strategy {
        Strategy::TitleFirst60Chars => {
            let head: String = title.chars().take(60).collect();
            vec![render(format!(r#""{head}" {surname} {year} filetype:pdf"#))]
        }
        Strategy::TitleKeywords5Terms => {
            let keywords = keyword_phrases(title, reference.relevance.as_deref(), 5);
            vec![render(keywords.join(" "))]
        }
        Strategy::PlusBest2FromTier1 => {
            let tier1 = "site:.edu OR site:.gov OR site:archive.org OR site:doi.org";
            vec![render(format!("{title} {tier1}"))]
        }
    }
}

/// Up to 8 queries, allocated `primary_split + secondary_split == 8`
/// between the primary and secondary template pools; see [`allocate`] for
/// why the true count can come in under that budget.
fn render_standard(reference: &Reference, primary_split: u32, secondary_split: u32) -> Vec<String> {
    let title = reference.title.as_deref().unwrap_or_default();
    let surname = author_surname(reference.authors.as_deref());
    let authors = reference.authors.as_deref().unwrap_or_default();
    let year = reference.year.as_deref().unwrap_or_default();
    let publication = reference.publication.as_deref().unwrap_or_default();
    let head: String = title.chars().take(60).collect();

    let primary_templates = [
        format!(r#""{head}" {surname} {year} filetype:pdf"#),
        format!(r#""{title}" {authors} site:.edu OR site:.gov"#),
        format!("{title} {authors} archive.org OR researchgate.net"),
    ];
    let primary_fallback = format!(r#""{title}" {publication} book"#);

    let secondary_templates = [
        format!(r#""{title}" review"#),
        format!(r#""{title}" "book review" {authors}"#),
        format!("{title} {authors} analysis OR critique"),
    ];
    let secondary_fallback = {
        let keywords = keyword_phrases(title, reference.relevance.as_deref(), 3);
        format!("{} scholarly discussion", keywords.join(" "))
    };

    let mut queries = Vec::with_capacity((primary_split + secondary_split) as usize);
    queries.extend(allocate(&primary_templates, &primary_fallback, primary_split));
    queries.extend(allocate(&secondary_templates, &secondary_fallback, secondary_split));
    queries.into_iter().map(render).collect()
}

/// Fill up to `count` slots from `templates`, each used at most once, plus
/// a single trailing `fallback` slot for whatever budget remains.
///
/// Never repeats a template or emits `fallback` more than once: an
/// identical query string sent twice is a wasted external search call, so
/// when `count` exceeds `templates.len() + 1` the extra budget goes unused
/// rather than duplicated.
fn allocate(templates: &[String], fallback: &str, count: u32) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }
    let fallback_count = (f64::from(count) * 0.25).round().max(1.0) as u32;
    let template_budget = count.saturating_sub(fallback_count);
    let template_count = template_budget.min(templates.len() as u32);

    let mut out: Vec<String> = templates[..template_count as usize].to_vec();
    if count > template_count {
        out.push(fallback.to_string());
    }
    out
}

/// Crude keyword extraction: longest words from title, then relevance, deduped.
fn keyword_phrases(title: &str, relevance: Option<&str>, n: usize) -> Vec<String> {
    let mut words: Vec<&str> = title
        .split_whitespace()
        .chain(relevance.into_iter().flat_map(str::split_whitespace))
        .filter(|w| w.len() > 3)
        .collect();
    words.sort_by_key(|w| std::cmp::Reverse(w.len()));
    let mut seen = std::collections::HashSet::new();
    words
        .into_iter()
        .filter(|w| seen.insert(w.to_lowercase()))
        .take(n)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReferenceUrls;
    use std::collections::BTreeSet;

    fn reference(title: &str, authors: Option<&str>, year: Option<&str>) -> Reference {
        Reference {
            id: 1,
            authors: authors.map(str::to_string),
            year: year.map(str::to_string),
            title: Some(title.to_string()),
            publication: None,
            relevance: None,
            queries: Vec::new(),
            candidates: None,
            urls: ReferenceUrls::default(),
            flags: BTreeSet::new(),
            parse_confidence: None,
        }
    }

    #[test]
    fn manual_review_forces_keyword_strategy() {
        let mut r = reference("Science and Human Behavior", Some("Skinner"), Some("1953"));
        r.flags.insert("MANUAL_REVIEW".to_string());
        assert_eq!(select_strategy(&r), Strategy::TitleKeywords5Terms);
    }

    #[test]
    fn short_title_forces_tier1_strategy() {
        let r = reference("Short", Some("A"), Some("2000"));
        assert_eq!(select_strategy(&r), Strategy::PlusBest2FromTier1);
    }

    #[test]
    fn missing_author_forces_tier1_strategy() {
        let r = reference("A Sufficiently Long Title Here", None, Some("2000"));
        assert_eq!(select_strategy(&r), Strategy::PlusBest2FromTier1);
    }

    #[test]
    fn normal_reference_uses_title_first_60() {
        let r = reference("A Sufficiently Long Title For This Reference", Some("Smith"), Some("2000"));
        assert_eq!(select_strategy(&r), Strategy::TitleFirst60Chars);
    }

    #[test]
    fn rendered_queries_never_exceed_200_chars() {
        let long_title = "A ".repeat(150);
        let r = reference(long_title.trim(), Some("Smith"), Some("2000"));
        let queries = render_queries(&r, QueryMode::Smart, 6, 2);
        for q in queries {
            assert!(q.len() <= MAX_QUERY_LEN, "{} chars: {q}", q.len());
        }
    }

    #[test]
    fn standard_mode_never_repeats_a_query() {
        let r = reference("A Sufficiently Long Title For This Reference", Some("Smith"), Some("2000"));
        let queries = render_standard(&r, 6, 2);
        let unique: BTreeSet<_> = queries.iter().collect();
        assert_eq!(unique.len(), queries.len(), "duplicate query in {queries:?}");
    }

    #[test]
    fn even_split_fills_the_full_budget_with_distinct_queries() {
        // 4 primary + 4 secondary exactly matches the 3-templates-plus-
        // fallback pool on each side, so every requested slot is used.
        let r = reference("A Sufficiently Long Title For This Reference", Some("Smith"), Some("2000"));
        let queries = render_standard(&r, 4, 4);
        assert_eq!(queries.len(), 8);
        let unique: BTreeSet<_> = queries.iter().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn allocate_caps_template_reuse_and_fallback_repetition() {
        let templates = vec!["t0".to_string(), "t1".to_string(), "t2".to_string()];
        let out = allocate(&templates, "fallback", 6);
        let unique: BTreeSet<_> = out.iter().collect();
        assert_eq!(unique.len(), out.len(), "duplicate entries in {out:?}");
        assert!(out.iter().filter(|q| *q == "fallback").count() <= 1);
    }
}
