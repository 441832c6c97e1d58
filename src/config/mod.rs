//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroU32, path::PathBuf, str::FromStr};

use apalis_cron::Schedule;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::jobs::{DEFAULT_CACHE_QUEUE_SCHEDULE, cache_queue_schedule};
use crate::cascade::CascadeConfig;
use crate::invalidators::{CloudflareConfig, ObjectCacheConfig, PageCacheConfig};

pub use cli::{CliArgs, Command, DispatchArgs, Overrides, RunArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cascade";
const ENV_PREFIX: &str = "CASCADE";
const DEFAULT_QUEUE_BACKEND: &str = "file";
const DEFAULT_QUEUE_DIRECTORY: &str = "var/cascade";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub queue: QueueSettings,
    pub scheduler: SchedulerSettings,
    pub cascade: CascadeConfig,
    pub object_cache: ObjectCacheConfig,
    pub page_cache: PageCacheConfig,
    pub cloudflare: CloudflareConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backend: QueueBackend,
}

/// Durable store backing the queue document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    /// Process-local; lost on exit.
    Memory,
    File {
        directory: PathBuf,
    },
    Postgres {
        url: String,
        max_connections: NonZeroU32,
    },
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub expression: String,
    pub schedule: Schedule,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_overrides(&cli.overrides);
    if let Some(Command::Run(args)) = cli.command.as_ref() {
        raw.apply_run_overrides(args);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    queue: RawQueueSettings,
    scheduler: RawSchedulerSettings,
    cascade: CascadeConfig,
    object_cache: ObjectCacheConfig,
    page_cache: PageCacheConfig,
    cloudflare: CloudflareConfig,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.queue_backend.as_ref() {
            self.queue.backend = Some(backend.clone());
        }
        if let Some(directory) = overrides.queue_directory.as_ref() {
            self.queue.directory = Some(directory.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.queue.database_url = Some(url.clone());
        }
        if let Some(key) = overrides.queue_key.as_ref() {
            self.cascade.queue_key = key.clone();
        }
    }

    fn apply_run_overrides(&mut self, args: &RunArgs) {
        if let Some(schedule) = args.schedule.as_ref() {
            self.scheduler.schedule = Some(schedule.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            queue,
            scheduler,
            cascade,
            object_cache,
            page_cache,
            cloudflare,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let queue = build_queue_settings(queue)?;
        let scheduler = build_scheduler_settings(scheduler)?;

        Ok(Self {
            logging,
            queue,
            scheduler,
            cascade,
            object_cache,
            page_cache,
            cloudflare,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_queue_settings(queue: RawQueueSettings) -> Result<QueueSettings, LoadError> {
    let backend = queue
        .backend
        .as_deref()
        .map(str::trim)
        .unwrap_or(DEFAULT_QUEUE_BACKEND)
        .to_ascii_lowercase();

    let backend = match backend.as_str() {
        "memory" => QueueBackend::Memory,
        "file" => {
            let directory = queue
                .directory
                .unwrap_or_else(|| PathBuf::from(DEFAULT_QUEUE_DIRECTORY));
            if directory.as_os_str().is_empty() {
                return Err(LoadError::invalid("queue.directory", "must not be empty"));
            }
            QueueBackend::File { directory }
        }
        "postgres" => {
            let url = queue
                .database_url
                .and_then(|value| {
                    let trimmed = value.trim();
                    (!trimmed.is_empty()).then(|| trimmed.to_string())
                })
                .ok_or_else(|| {
                    LoadError::invalid(
                        "queue.database_url",
                        "required when queue.backend is postgres",
                    )
                })?;
            let max_connections = non_zero_u32(
                queue
                    .max_connections
                    .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
                    .into(),
                "queue.max_connections",
            )?;
            QueueBackend::Postgres {
                url,
                max_connections,
            }
        }
        other => {
            return Err(LoadError::invalid(
                "queue.backend",
                format!("unknown backend `{other}` (expected memory, file or postgres)"),
            ));
        }
    };

    Ok(QueueSettings { backend })
}

fn build_scheduler_settings(
    scheduler: RawSchedulerSettings,
) -> Result<SchedulerSettings, LoadError> {
    let expression = scheduler
        .schedule
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_CACHE_QUEUE_SCHEDULE.to_string());

    let schedule = cache_queue_schedule(&expression).map_err(|err| {
        LoadError::invalid(
            "scheduler.schedule",
            format!("invalid cron expression `{expression}`: {err}"),
        )
    })?;

    Ok(SchedulerSettings {
        expression,
        schedule,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    backend: Option<String>,
    directory: Option<PathBuf>,
    database_url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    schedule: Option<String>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
