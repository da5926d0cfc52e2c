//! CLI definitions for cronstack.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// cronstack CLI.
#[derive(Parser)]
#[command(name = "cronstack")]
#[command(about = "Run cron jobs in isolated workers")]
#[command(version)]
pub(crate) struct Cli {
    /// Manifest path (default: ./cronstack.toml, then the user config directory)
    #[arg(short, long, global = true, env = "CRONSTACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Working directory for jobs; relative paths in the manifest resolve against it
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `cronstack=trace` (RUST_LOG wins)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start the supervisor in the foreground
    Start(StartArgs),

    /// List jobs with their next occurrence
    List {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Validate the manifest
    Check,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}

#[derive(Args, Debug, Default)]
pub(crate) struct StartArgs {
    /// Only run these jobs (default: all)
    pub jobs: Vec<String>,

    /// Run each job on its next occurrence, then exit
    #[arg(long, conflicts_with = "once_now")]
    pub once: bool,

    /// Run each job immediately, then exit
    #[arg(long)]
    pub once_now: bool,

    /// Time zone schedules are evaluated in, e.g. `Europe/Berlin`
    #[arg(long)]
    pub time_zone: Option<String>,
}
