//! Round-trip read/write of the line-oriented reference store.
//!
//! Each non-empty line that begins with `[<id>]` encodes one [`Reference`]
//! in a tolerant field grammar:
//!
//! ```text
//! [<id>] <bibliography> [FLAGS[<tokens>]] [PRIMARY_URL[<url>]] [SECONDARY_URL[<url>]] [Relevance: <text>]
//! ```
//!
//! Lines that do not start with `[` (comments, blanks, anything else) are
//! preserved verbatim and re-emitted unchanged by [`save`]. Lines that start
//! with `[` but fail even the minimal `{id}` tokenization are a hard parse
//! failure; everything else degrades gracefully into an `Uncertain` or
//! `Missing` [`FieldConfidence`] rather than an error.

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SelectionMode;
use crate::types::{FieldConfidence, ParseConfidence, Reference, ReferenceUrls};
use crate::{Error, Result};

/// One parsed line: either a reference, or a verbatim passthrough.
#[derive(Debug, Clone)]
enum Line {
    Reference {
        reference: Reference,
        /// The original text this entry was parsed from (one or more
        /// physical lines, joined by `\n`). Re-emitted verbatim by `save`
        /// unless `touched` is set.
        raw: String,
        /// Set once `update()` replaces this entry; only touched entries
        /// are re-derived through `serialize` on save.
        touched: bool,
    },
    Verbatim(String),
}

/// An in-memory reference store, ordered as read from disk.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStore {
    lines: Vec<Line>,
}

static ID_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[(\d+)\]\s*").unwrap());
static FLAGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"FLAGS\[([^\]]*)\]").unwrap());
static PRIMARY_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"PRIMARY_URL\[([^\]]*)\]").unwrap());
static SECONDARY_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"SECONDARY_URL\[([^\]]*)\]").unwrap());
static RELEVANCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Relevance:\s*(.*)$").unwrap());
static CONT_FLAGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^FLAGS\[([^\]]*)\]\s*$").unwrap());
static CONT_PRIMARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Primary URL:\s*(.*)$").unwrap());
static CONT_SECONDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Secondary URL:\s*(.*)$").unwrap());
static BIBLIOGRAPHY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<authors>[^(]+?)\s*\((?P<year>[0-9]{4}|in press)\)\.\s*(?P<title>[^.]+)\.\s*(?P<publication>.*?)\.?\s*$").unwrap());
static TRAILING_DOTS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{3,}\s*$").unwrap());
static MONTH_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2}[,]?\s*(\d{4})?\)?\s*").unwrap()
});

impl ReferenceStore {
    /// Load a store from `path`, tolerating malformed lines per reference
    /// (see module docs) but failing on I/O errors.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse raw store text into a [`ReferenceStore`].
    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = Vec::new();
        let mut iter = contents.lines().peekable();
        while let Some(raw) = iter.next() {
            if !raw.trim_start().starts_with('[') {
                lines.push(Line::Verbatim(raw.to_string()));
                continue;
            }
            let Some(caps) = ID_PREFIX.captures(raw.trim_start()) else {
                return Err(Error::StoreFormatError(format!(
                    "line does not tokenize to a minimal {{id}}: {raw:?}"
                )));
            };
            let id: u32 = caps[1].parse().map_err(|_| {
                Error::StoreFormatError(format!("non-numeric id in line: {raw:?}"))
            })?;

            let mut body = raw.trim_start()[caps[0].len()..].to_string();
            let mut raw_text = raw.to_string();

            // Absorb historical multi-line continuations: FLAGS[...] / Primary
            // URL: / Secondary URL: on subsequent lines belonging to this entry.
            while let Some(next) = iter.peek() {
                let trimmed = next.trim();
                if CONT_FLAGS_RE.is_match(trimmed)
                    || CONT_PRIMARY_RE.is_match(trimmed)
                    || CONT_SECONDARY_RE.is_match(trimmed)
                {
                    body.push(' ');
                    if let Some(c) = CONT_PRIMARY_RE.captures(trimmed) {
                        body.push_str(&format!("PRIMARY_URL[{}]", c[1].trim()));
                    } else if let Some(c) = CONT_SECONDARY_RE.captures(trimmed) {
                        body.push_str(&format!("SECONDARY_URL[{}]", c[1].trim()));
                    } else {
                        body.push_str(trimmed);
                    }
                    raw_text.push('\n');
                    raw_text.push_str(next);
                    iter.next();
                } else {
                    break;
                }
            }

            lines.push(Line::Reference {
                reference: Self::parse_body(id, &body),
                raw: raw_text,
                touched: false,
            });
        }
        Ok(Self { lines })
    }

    fn parse_body(id: u32, body: &str) -> Reference {
        let mut confidence = ParseConfidence::default();

        let flags: std::collections::BTreeSet<String> = FLAGS_RE
            .captures(body)
            .map(|c| {
                c[1].split_whitespace()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let primary = PRIMARY_URL_RE
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty());
        let secondary = SECONDARY_URL_RE
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty());
        let relevance = RELEVANCE_RE
            .captures(body)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty());

        // Strip the known trailing suffixes to leave only the bibliography head.
        let mut head = body.to_string();
        for re in [&*FLAGS_RE, &*PRIMARY_URL_RE, &*SECONDARY_URL_RE] {
            head = re.replace_all(&head, "").to_string();
        }
        if let Some(m) = RELEVANCE_RE.find(&head) {
            head.truncate(m.start());
        }
        let head = head.trim().to_string();

        let (authors, year, title, publication) =
            if let Some(caps) = BIBLIOGRAPHY_RE.captures(&head) {
                confidence.authors = Some(FieldConfidence::Found);
                confidence.year = Some(FieldConfidence::Found);
                confidence.title = Some(FieldConfidence::Found);
                confidence.publication = Some(if caps["publication"].is_empty() {
                    FieldConfidence::Missing
                } else {
                    FieldConfidence::Found
                });
                (
                    Some(caps["authors"].trim().to_string()),
                    Some(caps["year"].to_string()),
                    Some(Self::clean_title(&caps["title"])),
                    (!caps["publication"].is_empty())
                        .then(|| caps["publication"].trim().to_string()),
                )
            } else {
                // Fallback: salvage a title-like fragment, marking everything
                // else missing/uncertain.
                let salvaged = MONTH_PREFIX_RE.replace(&head, "");
                let title = if salvaged.trim().is_empty() {
                    None
                } else {
                    confidence.title = Some(FieldConfidence::Uncertain);
                    Some(Self::clean_title(salvaged.trim()))
                };
                confidence.authors = Some(FieldConfidence::Missing);
                confidence.year = Some(FieldConfidence::Missing);
                confidence.publication = Some(FieldConfidence::Missing);
                (None, None, title, None)
            };

        Reference {
            id,
            authors,
            year,
            title,
            publication,
            relevance,
            queries: Vec::new(),
            candidates: None,
            urls: ReferenceUrls { primary, secondary },
            flags,
            parse_confidence: Some(confidence),
        }
    }

    fn clean_title(raw: &str) -> String {
        TRAILING_DOTS_RE.replace(raw, "").trim().to_string()
    }

    /// Serialize a single reference back to its one-line store form.
    #[must_use]
    pub fn serialize(reference: &Reference) -> String {
        let mut out = format!("[{}] ", reference.id);
        let authors = reference.authors.as_deref().unwrap_or("");
        let year = reference.year.as_deref().unwrap_or("");
        let title = reference.title.as_deref().unwrap_or("");
        match (reference.year.is_some(), reference.authors.is_some()) {
            (true, true) => out.push_str(&format!("{authors} ({year}). {title}.")),
            _ => out.push_str(title),
        }
        if let Some(publication) = &reference.publication {
            out.push(' ');
            out.push_str(publication);
            if !publication.ends_with('.') {
                out.push('.');
            }
        }
        if !reference.flags.is_empty() {
            let tokens = reference
                .flags
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&format!(" FLAGS[{tokens}]"));
        }
        if let Some(url) = &reference.urls.primary {
            out.push_str(&format!(" PRIMARY_URL[{}]", escape_url(url)));
        }
        if let Some(url) = &reference.urls.secondary {
            out.push_str(&format!(" SECONDARY_URL[{}]", escape_url(url)));
        }
        if let Some(relevance) = &reference.relevance {
            out.push_str(&format!(" Relevance: {relevance}"));
        }
        out
    }

    /// All references in file order.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::Reference { reference, .. } => Some(reference),
                Line::Verbatim(_) => None,
            })
            .collect()
    }

    /// Select references whose flags satisfy `predicate`.
    #[must_use]
    pub fn filter<F>(&self, predicate: F) -> Vec<&Reference>
    where
        F: Fn(&Reference) -> bool,
    {
        self.references().into_iter().filter(|r| predicate(r)).collect()
    }

    /// Select references matching a run's `selection_mode`, §6.
    #[must_use]
    pub fn select(&self, mode: &SelectionMode) -> Vec<&Reference> {
        match mode {
            SelectionMode::Range { id_start, id_end } => {
                self.filter(|r| r.id >= *id_start && r.id < *id_end)
            }
            SelectionMode::Criteria { not_finalized } => self.filter(|r| {
                if *not_finalized {
                    !r.flags.contains("FINALIZED")
                } else {
                    true
                }
            }),
            SelectionMode::AllIncomplete => {
                self.filter(|r| r.urls.primary.is_none() && r.urls.secondary.is_none())
            }
        }
    }

    /// Replace the reference with matching `id`, if present. Marks the
    /// entry touched so `save` re-derives its line from `reference` instead
    /// of re-emitting the original text verbatim.
    pub fn update(&mut self, reference: Reference) {
        for line in &mut self.lines {
            if let Line::Reference {
                reference: existing,
                touched,
                ..
            } = line
            {
                if existing.id == reference.id {
                    *existing = reference;
                    *touched = true;
                    return;
                }
            }
        }
    }

    /// Write the store to `path` via write-temp-then-rename. References
    /// `update()` never touched this run are re-emitted byte-identical to
    /// the text they were parsed from; only touched entries go through
    /// `serialize`. Verbatim lines are never re-derived.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match line {
                Line::Reference {
                    reference,
                    raw,
                    touched,
                } => {
                    if *touched {
                        out.push_str(&Self::serialize(reference));
                    } else {
                        out.push_str(raw);
                    }
                }
                Line::Verbatim(s) => out.push_str(s),
            }
        }

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &out)
            .map_err(|e| Error::StoreWriteFailed(format!("write temp file: {e}")))?;

        #[cfg(target_os = "windows")]
        if path.exists() {
            fs::remove_file(path)
                .map_err(|e| Error::StoreWriteFailed(format!("remove existing store: {e}")))?;
        }

        fs::rename(&tmp_path, path)
            .map_err(|e| Error::StoreWriteFailed(format!("commit store: {e}")))?;
        Ok(())
    }
}

/// Percent-encode any `]` in a URL so it cannot be mistaken for the closing
/// bracket of a `PRIMARY_URL[...]`/`SECONDARY_URL[...]` token.
fn escape_url(url: &str) -> String {
    url.replace(']', "%5D")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_round_trips_byte_identical() {
        let line = "[10] Skinner, B. F. (1953). Science and Human Behavior. Macmillan.";
        let store = ReferenceStore::parse(line).unwrap();
        let refs = store.references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].authors.as_deref(), Some("Skinner, B. F."));
        assert_eq!(refs[0].year.as_deref(), Some("1953"));
        assert_eq!(refs[0].title.as_deref(), Some("Science and Human Behavior"));
        assert_eq!(ReferenceStore::serialize(refs[0]), line);
    }

    #[test]
    fn verbatim_and_blank_lines_preserved() {
        let text = "# a comment\n\n[1] A (2000). T. P.\n";
        let store = ReferenceStore::parse(text).unwrap();
        let mut buf = String::new();
        for (i, l) in store.lines.iter().enumerate() {
            if i > 0 {
                buf.push('\n');
            }
            match l {
                Line::Reference { raw, .. } => buf.push_str(raw),
                Line::Verbatim(s) => buf.push_str(s),
            }
        }
        assert_eq!(buf, "# a comment\n\n[1] A (2000). T. P.");
    }

    #[test]
    fn malformed_id_prefix_is_a_hard_error() {
        let err = ReferenceStore::parse("[not-a-number] A (2000). T.").unwrap_err();
        assert!(matches!(err, Error::StoreFormatError(_)));
    }

    #[test]
    fn unparseable_bibliography_head_degrades_to_missing_fields() {
        let store = ReferenceStore::parse("[5] some unparsable mess without a year").unwrap();
        let refs = store.references();
        assert_eq!(refs[0].authors, None);
        assert_eq!(refs[0].year, None);
        let conf = refs[0].parse_confidence.as_ref().unwrap();
        assert_eq!(conf.authors, Some(FieldConfidence::Missing));
    }

    #[test]
    fn multiline_continuation_is_absorbed_and_resaved_single_line() {
        let text = "[7] A (2001). T. P.\n  FLAGS[MANUAL_REVIEW]\n  Primary URL: https://example.com/a\n";
        let store = ReferenceStore::parse(text).unwrap();
        let refs = store.references();
        assert!(refs[0].flags.contains("MANUAL_REVIEW"));
        assert_eq!(refs[0].urls.primary.as_deref(), Some("https://example.com/a"));
        let serialized = ReferenceStore::serialize(refs[0]);
        assert_eq!(serialized.lines().count(), 1);
    }

    #[test]
    fn trailing_ellipsis_removed_from_title() {
        let store = ReferenceStore::parse("[3] A (1999). A Long Title That Got Cut Off....  P.").unwrap();
        let refs = store.references();
        assert!(!refs[0].title.as_deref().unwrap().ends_with("..."));
    }

    #[test]
    fn escapes_closing_bracket_in_urls() {
        let mut r = ReferenceStore::parse("[1] A (2000). T.").unwrap();
        let mut reference = r.references()[0].clone();
        reference.urls.primary = Some("https://example.com/a]b".to_string());
        r.update(reference);
        let line = ReferenceStore::serialize(r.references()[0]);
        assert!(line.contains("PRIMARY_URL[https://example.com/a%5Db]"));
    }

    #[test]
    fn select_all_incomplete_skips_references_with_either_url_set() {
        let store = ReferenceStore::parse(
            "[1] A (2000). T. P.\n[2] B (2001). U. Q. PRIMARY_URL[https://x.example]",
        )
        .unwrap();
        let selected = store.select(&SelectionMode::AllIncomplete);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, 1);
    }

    #[test]
    fn select_range_is_half_open() {
        let store = ReferenceStore::parse("[1] A (2000). T.\n[2] B (2000). T.\n[3] C (2000). T.").unwrap();
        let selected = store.select(&SelectionMode::Range { id_start: 1, id_end: 3 });
        let ids: Vec<u32> = selected.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn save_then_load_preserves_untouched_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.txt");
        let original = "[1] A (2000). T. P.\n[2] B (2001). U. Q.";
        fs::write(&path, original).unwrap();

        let store = ReferenceStore::load(&path).unwrap();
        store.save(&path).unwrap();
        let reloaded = fs::read_to_string(&path).unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn save_preserves_non_canonical_spacing_on_untouched_lines() {
        // Extra inter-field spacing and a missing trailing period don't
        // match `serialize`'s canonical template, so only a verbatim
        // passthrough keeps this byte-identical.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.txt");
        let original = "[1] Skinner, B. F.  (1953).  Science and Human Behavior. Macmillan";
        fs::write(&path, original).unwrap();

        let store = ReferenceStore::load(&path).unwrap();
        store.save(&path).unwrap();
        let reloaded = fs::read_to_string(&path).unwrap();
        assert_eq!(reloaded, original);
    }

    #[test]
    fn save_reserializes_only_the_touched_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.txt");
        let original = "[1] Skinner, B. F.  (1953).  Science.  Macmillan\n[2] B (2001). U. Q.";
        fs::write(&path, original).unwrap();

        let mut store = ReferenceStore::load(&path).unwrap();
        let mut touched = store.references()[1].clone();
        touched.urls.primary = Some("https://example.com/b".to_string());
        store.update(touched);
        store.save(&path).unwrap();

        let reloaded = fs::read_to_string(&path).unwrap();
        let mut lines = reloaded.lines();
        assert_eq!(
            lines.next().unwrap(),
            "[1] Skinner, B. F.  (1953).  Science.  Macmillan"
        );
        assert_eq!(
            lines.next().unwrap(),
            "[2] B (2001). U. Q. PRIMARY_URL[https://example.com/b]"
        );
    }
}
