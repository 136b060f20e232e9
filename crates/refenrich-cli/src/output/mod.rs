//! Terminal-facing reporting: progress bars and the end-of-run summary.

pub mod progress;
pub mod summary;
