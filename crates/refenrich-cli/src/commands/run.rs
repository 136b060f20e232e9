//! Drives one batch run end to end: load config and store, select
//! references, process each through the orchestrator, checkpoint the
//! ledger, and report a summary.

use anyhow::{Context, Result};
use refenrich_core::orchestrator::dry_run_plan;
use refenrich_core::{
    AccessibilityValidator, Error, Ledger, LlmRanker, Orchestrator, ReferenceOutcome,
    ReferenceStore, RunConfig, SearchClient,
};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::output::progress::ProgressDisplay;
use crate::output::summary::RunSummary;
use crate::providers::llm::HttpRankCompletion;
use crate::providers::search::HttpSearchProvider;

/// Process exit code for a completed (or aborted) run, §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Every selected reference committed without error.
    Success = 0,
    /// A fatal, run-level error (config, lock, store write).
    Fatal = 1,
    /// Some references were recorded as errors; the rest succeeded.
    Partial = 2,
    /// Search quota exhausted; the batch paused and can be resumed.
    QuotaExhausted = 3,
}

impl ExitCode {
    /// Convert to the process's raw exit status.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Run the batch described by `cli`.
pub async fn execute(cli: &Cli) -> Result<ExitCode> {
    let config = RunConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    if cli.inspect {
        return inspect_ledger(cli, &config);
    }

    let mut store = ReferenceStore::load(&config.input_file)
        .with_context(|| format!("loading reference store from {}", config.input_file.display()))?;

    if cli.dry_run {
        return run_dry(&config, &store);
    }

    let ledger_path = config.ledger_path();
    if cli.force && ledger_path.exists() {
        std::fs::remove_file(&ledger_path).context("removing ledger for --force")?;
    }
    let _ = cli.resume; // resuming is the default whenever a ledger already exists

    let mut ledger = Ledger::load_or_new(&ledger_path, &config.content_hash())
        .context("acquiring the ledger lock")?;

    let selected: Vec<_> = store
        .select(&config.selection_mode)
        .into_iter()
        .filter(|r| !ledger.is_completed(r.id))
        .cloned()
        .collect();
    let selected = match config.max_references {
        Some(max) => selected.into_iter().take(max as usize).collect(),
        None => selected,
    };

    info!(count = selected.len(), "references selected for this run");

    let search_provider = HttpSearchProvider::new(&config.search_api)?;
    let search = SearchClient::new(search_provider, config.rate_limit.search_ms);
    let completion = HttpRankCompletion::new(&config.llm_api)?;
    let ranker = LlmRanker::new(completion);
    let validator = AccessibilityValidator::new()?;
    let orchestrator = Orchestrator::new(&config, &search, &ranker, &validator);

    let bar = ProgressDisplay::bar(selected.len() as u64);
    let mut had_errors = false;
    let mut quota_exhausted = false;

    for (i, reference) in selected.into_iter().enumerate() {
        let id = reference.id;
        match orchestrator.process_reference(&mut store, reference).await {
            Ok(ReferenceOutcome::Committed { id }) => {
                store
                    .save(&config.output_file)
                    .with_context(|| format!("writing store after committing reference {id}"))?;
                ledger.record(id)?;
            }
            Ok(ReferenceOutcome::RankFailed { id }) => {
                store
                    .save(&config.output_file)
                    .with_context(|| format!("writing store after reference {id}"))?;
                ledger.record_error(id, "rank_failed")?;
                had_errors = true;
            }
            Err(Error::SearchQuotaExhausted) => {
                warn!(id, "search quota exhausted, pausing batch");
                ledger.pause()?;
                quota_exhausted = true;
                break;
            }
            Err(e) => {
                error!(id, error = %e, "reference failed");
                ledger.record_error(id, e.category())?;
                had_errors = true;
            }
        }

        bar.set_position((i + 1) as u64);
        sleep(std::time::Duration::from_millis(config.rate_limit.inter_ref_ms)).await;
    }
    bar.finish_and_clear();

    if !quota_exhausted {
        ledger.finish()?;
    }

    let summary = RunSummary::from_progress(ledger.progress());
    if cli.json {
        println!("{}", summary.to_json()?);
    } else {
        print!("{}", summary.to_human());
    }

    Ok(if quota_exhausted {
        ExitCode::QuotaExhausted
    } else if had_errors {
        ExitCode::Partial
    } else {
        ExitCode::Success
    })
}

/// Print an existing ledger's summary and exit, without locking it or
/// running a batch.
fn inspect_ledger(cli: &Cli, config: &RunConfig) -> Result<ExitCode> {
    let ledger_path = config.ledger_path();
    let progress = Ledger::inspect(&ledger_path)
        .with_context(|| format!("inspecting ledger at {}", ledger_path.display()))?;
    let summary = RunSummary::from_progress(&progress);
    if cli.json {
        println!("{}", summary.to_json()?);
    } else {
        print!("{}", summary.to_human());
    }
    Ok(ExitCode::Success)
}

fn run_dry(config: &RunConfig, store: &ReferenceStore) -> Result<ExitCode> {
    let selected = store.select(&config.selection_mode);
    for reference in selected {
        let plan = dry_run_plan(reference, config);
        println!("[{}] {} quer{}:", reference.id, plan.len(), if plan.len() == 1 { "y" } else { "ies" });
        for q in &plan {
            println!("  - {q}");
        }
    }
    Ok(ExitCode::Success)
}
