//! CLI command definitions for the `actionctl` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operate the action orchestration core from the command line.
#[derive(Parser)]
#[command(name = "actionctl", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for info, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding `config.toml` and the metrics/executions
    /// journals. Defaults to `~/.actioncore`.
    #[arg(long, env = "ACTIONCORE_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow definition file (step ids, dependency cycles).
    Validate {
        /// Path to a YAML workflow definition.
        path: PathBuf,
    },

    /// Run a workflow definition against the built-in console/mock executor.
    Run {
        /// Path to a YAML workflow definition.
        path: PathBuf,
        /// Also append the resulting execution to the executions journal.
        #[arg(long)]
        journal: bool,
    },

    /// Show aggregate metrics computed from the metrics journal.
    Metrics {
        /// Override the metrics journal path (defaults to `config.toml`'s
        /// `metrics_path` under the data directory).
        #[arg(long)]
        path: Option<PathBuf>,
    },
}
