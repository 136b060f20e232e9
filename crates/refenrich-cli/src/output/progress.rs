//! Minimal progress bar construction, shared across the batch run.

use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;

/// Builds progress bars with a consistent style.
pub struct ProgressDisplay;

impl ProgressDisplay {
    /// A determinate bar over `total` references, hidden entirely when
    /// stderr isn't a terminal (piped output, CI logs).
    #[must_use]
    pub fn bar(total: u64) -> ProgressBar {
        if !std::io::stderr().is_terminal() {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar
    }
}
