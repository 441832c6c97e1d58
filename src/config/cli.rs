use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::cascade::CacheSignal;

/// Command-line arguments for the cascade binary.
#[derive(Debug, Parser)]
#[command(
    name = "cache-cascade",
    version,
    about = "Staggered cache invalidation worker"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CASCADE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the scheduler, advancing the cascade on every tick.
    Run(RunArgs),
    /// Advance the cascade by a single tick and exit.
    Process,
    /// Print the persisted cascade.
    Status,
    /// Delete the persisted cascade.
    Clear,
    /// Raise a cache signal and persist the resulting cascade.
    Dispatch(DispatchArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RunArgs {
    /// Override the tick schedule (six-field cron expression).
    #[arg(long = "schedule", value_name = "CRON")]
    pub schedule: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct DispatchArgs {
    /// Signal to raise, by hook name (`post/content_updated`) or name (`content_updated`).
    #[arg(value_name = "SIGNAL")]
    pub signal: CacheSignal,
}

/// Overrides shared by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the queue backend (memory|file|postgres).
    #[arg(long = "queue-backend", value_name = "BACKEND", global = true)]
    pub queue_backend: Option<String>,

    /// Override the directory used by the file backend.
    #[arg(
        long = "queue-directory",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub queue_directory: Option<PathBuf>,

    /// Override the database connection URL used by the postgres backend.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the durable key holding the queue.
    #[arg(long = "queue-key", value_name = "KEY", global = true)]
    pub queue_key: Option<String>,
}
