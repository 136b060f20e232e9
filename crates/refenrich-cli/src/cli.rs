//! Command-line argument definitions for `refenrich`.

use std::path::PathBuf;

use clap::Parser;

/// Batch-enrich a bibliographic reference store with primary and secondary
/// URLs.
#[derive(Parser, Clone, Debug)]
#[command(name = "refenrich")]
#[command(version)]
#[command(about = "Enrich bibliographic references with validated, ranked URLs", long_about = None)]
pub struct Cli {
    /// Path to the run configuration (TOML).
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Render queries and report the plan without any external calls.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the existing ledger's summary and exit, without running a batch.
    #[arg(long)]
    pub inspect: bool,

    /// Resume from an existing ledger (default behavior when one exists).
    #[arg(long)]
    pub resume: bool,

    /// Ignore any existing ledger and start a fresh batch.
    #[arg(long)]
    pub force: bool,

    /// Emit debug-level logs.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Suppress informational messages; only errors are printed.
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Disable all ANSI colors in output (also respects `NO_COLOR`).
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Emit machine-readable JSON summary instead of a human-readable report.
    #[arg(long, global = true)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::try_parse_from(["refenrich", "run.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("run.toml"));
        assert!(!cli.dry_run);
        assert!(!cli.force);
    }

    #[test]
    fn parses_dry_run_and_force_flags() {
        let cli = Cli::try_parse_from(["refenrich", "run.toml", "--dry-run", "--force"]).unwrap();
        assert!(cli.dry_run);
        assert!(cli.force);
    }

    #[test]
    fn rejects_missing_config_path() {
        assert!(Cli::try_parse_from(["refenrich"]).is_err());
    }

    #[test]
    fn parses_inspect_flag() {
        let cli = Cli::try_parse_from(["refenrich", "run.toml", "--inspect"]).unwrap();
        assert!(cli.inspect);
    }
}
