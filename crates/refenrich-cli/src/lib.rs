//! `refenrich` — the command-line entry point for the reference enrichment
//! pipeline. The binary itself (`src/main.rs`) is a thin `#[tokio::main]`
//! wrapper; everything else lives here so it is testable as a library.

pub mod cli;
pub mod commands;
pub mod output;
pub mod providers;
pub mod utils;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use commands::run::ExitCode;

/// Parse arguments, initialize logging, and dispatch to the run command.
pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    utils::logging::initialize(&cli)?;
    commands::run::execute(&cli).await
}
