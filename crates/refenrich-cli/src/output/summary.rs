//! End-of-run reporting: counts per error kind plus a tail of recent errors.

use colored::Colorize;
use refenrich_core::BatchProgress;
use serde::Serialize;

/// JSON-serializable view of a run's outcome, used with `--json`.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    batch_id: String,
    status: String,
    completed: usize,
    errors_by_kind: std::collections::BTreeMap<String, u64>,
    recent_errors: Vec<RecentError>,
}

#[derive(Debug, Serialize)]
struct RecentError {
    id: u32,
    error: String,
    at: String,
}

/// Tail length for the recent-errors list, per the reporting contract.
const RECENT_ERRORS_TAIL: usize = 20;

impl RunSummary {
    /// Build a summary from the final ledger state.
    #[must_use]
    pub fn from_progress(progress: &BatchProgress) -> Self {
        let recent_errors = progress
            .errors
            .iter()
            .rev()
            .take(RECENT_ERRORS_TAIL)
            .map(|e| RecentError {
                id: e.id,
                error: e.error.clone(),
                at: e.at.to_rfc3339(),
            })
            .collect();
        Self {
            batch_id: progress.batch_id.clone(),
            status: format!("{:?}", progress.status).to_lowercase(),
            completed: progress.completed.len(),
            errors_by_kind: progress.stats.errors_by_kind.clone(),
            recent_errors,
        }
    }

    /// Render as pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render as a human-readable report.
    #[must_use]
    pub fn to_human(&self) -> String {
        let mut out = format!(
            "{} {} — {} references completed ({})\n",
            "batch".bold(),
            self.batch_id,
            self.completed,
            self.status
        );
        if self.errors_by_kind.is_empty() {
            out.push_str("no errors recorded\n");
        } else {
            out.push_str("errors by kind:\n");
            for (kind, count) in &self.errors_by_kind {
                out.push_str(&format!("  {kind}: {count}\n"));
            }
            out.push_str(&format!(
                "most recent {} error(s):\n",
                self.recent_errors.len()
            ));
            for e in &self.recent_errors {
                out.push_str(&format!("  [{}] {} at {}\n", e.id, e.error, e.at));
            }
        }
        out
    }
}
