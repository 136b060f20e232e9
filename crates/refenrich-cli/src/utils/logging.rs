//! Tracing subscriber setup driven by the CLI's verbosity flags.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::cli::Cli;

/// Initialize the global tracing subscriber for this process.
///
/// `--quiet` forces errors only, `--verbose` forces debug, `--json` forces
/// errors only so stdout stays clean for machine consumption. All log
/// output goes to stderr so it never interleaves with the JSON summary.
pub fn initialize(cli: &Cli) -> Result<()> {
    let level = if cli.json {
        Level::ERROR
    } else if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if cli.no_color || std::env::var("NO_COLOR").is_ok() || cli.json {
        colored::control::set_override(false);
    }

    Ok(())
}
