//! Durable, crash-safe progress checkpoint for a batch run.
//!
//! The ledger is a single JSON document written with a write-temp,
//! fsync, rename sequence after every reference, and protected for the
//! lifetime of a run by an exclusive lock on a sibling `.lock` file so two
//! batch processes can never touch the same store concurrently.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::types::{BatchProgress, BatchStats, BatchStatus, LedgerError};
use crate::{Error, Result};

/// Holds the exclusive lock for the lifetime of a batch run.
///
/// Dropping this releases the lock; callers should keep it alive for as
/// long as the ledger may be written.
pub struct Ledger {
    path: PathBuf,
    lock_file: File,
    progress: BatchProgress,
}

impl Ledger {
    /// Acquire the lock and load existing progress, or start a fresh one if
    /// no ledger exists yet at `path`.
    pub fn load_or_new(path: &Path, config_hash: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::LedgerLocked(lock_path.display().to_string()))?;

        let progress = if path.exists() {
            let contents = fs::read_to_string(path)?;
            let progress: BatchProgress = serde_json::from_str(&contents)
                .map_err(|e| Error::LedgerCorrupt(format!("{}: {e}", path.display())))?;
            if progress.config_hash != config_hash {
                warn!(
                    batch_id = %progress.batch_id,
                    "resuming with a different config hash than the original run"
                );
            }
            info!(batch_id = %progress.batch_id, completed = progress.completed.len(), "resuming batch");
            progress
        } else {
            let progress = Self::begin(config_hash);
            info!(batch_id = %progress.batch_id, "starting new batch");
            progress
        };

        Ok(Self {
            path: path.to_path_buf(),
            lock_file,
            progress,
        })
    }

    /// A fresh `BatchProgress` for a new run.
    fn begin(config_hash: &str) -> BatchProgress {
        let now = Utc::now();
        BatchProgress {
            batch_id: format!("batch_{}", now.format("%Y%m%dT%H%M%SZ")),
            started_at: now,
            config_hash: config_hash.to_string(),
            completed: std::collections::BTreeSet::new(),
            errors: Vec::new(),
            stats: BatchStats::default(),
            status: BatchStatus::Running,
        }
    }

    /// Current progress snapshot.
    #[must_use]
    pub const fn progress(&self) -> &BatchProgress {
        &self.progress
    }

    /// Load an existing ledger's progress for read-only reporting, without
    /// acquiring the run lock or starting a batch.
    pub fn inspect(path: &Path) -> Result<BatchProgress> {
        if !path.exists() {
            return Err(Error::LedgerCorrupt(format!("no ledger found at {}", path.display())));
        }
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| Error::LedgerCorrupt(format!("{}: {e}", path.display())))
    }

    /// Whether `id` was already completed by a prior (or this) run.
    #[must_use]
    pub fn is_completed(&self, id: u32) -> bool {
        self.progress.completed.contains(&id)
    }

    /// Record a successful commit for `id` and checkpoint.
    pub fn record(&mut self, id: u32) -> Result<()> {
        self.progress.completed.insert(id);
        self.checkpoint()
    }

    /// Record an error for `id` (the reference is still marked completed:
    /// the run never re-processes it) and checkpoint.
    pub fn record_error(&mut self, id: u32, category: &str) -> Result<()> {
        self.progress.completed.insert(id);
        self.progress.errors.push(LedgerError {
            id,
            error: category.to_string(),
            at: Utc::now(),
        });
        self.progress.stats.record_error_kind(category);
        self.checkpoint()
    }

    /// Mark the run paused (resumable) and checkpoint.
    pub fn pause(&mut self) -> Result<()> {
        self.progress.status = BatchStatus::Paused;
        self.checkpoint()
    }

    /// Mark the run done and checkpoint.
    pub fn finish(&mut self) -> Result<()> {
        self.progress.status = BatchStatus::Done;
        self.checkpoint()
    }

    /// Mutable access to the run-wide counters, for components that update
    /// stats outside of `record`/`record_error` (e.g. queries generated).
    pub fn stats_mut(&mut self) -> &mut BatchStats {
        &mut self.progress.stats
    }

    fn checkpoint(&self) -> Result<()> {
        debug!(path = %self.path.display(), completed = self.progress.completed.len(), "checkpointing ledger");
        let json = serde_json::to_string_pretty(&self.progress)
            .map_err(|e| Error::LedgerCorrupt(format!("serialize: {e}")))?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        #[cfg(target_os = "windows")]
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock_file);
    }
}
