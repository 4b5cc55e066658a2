//! `actionctl`: local operator tooling for the action orchestration core.
//!
//! Binary name: `actionctl`.
//!
//! Validates workflow YAML, runs a workflow against the console mock
//! executor, and inspects the metrics journal. The real web dashboard and
//! platform executors stay out of scope for this binary.

mod cli;
mod commands;
mod mock_executor;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,actioncore=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(actioncore_infra::default_data_dir);

    match cli.command {
        Commands::Validate { path } => commands::validate::validate(&path, cli.json).await?,
        Commands::Run { path, journal } => commands::run::run(&path, &data_dir, journal, cli.json).await?,
        Commands::Metrics { path } => {
            let config = actioncore_infra::load_core_config(&data_dir).await;
            let journal_path = path.unwrap_or_else(|| data_dir.join(&config.metrics_path));
            commands::metrics::metrics(&journal_path, cli.json).await?
        }
    }

    Ok(())
}
