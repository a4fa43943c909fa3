//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CorruptEntryPolicy, ReloadFailureMode};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "dispatch-cache";
const ENV_PREFIX: &str = "DISPATCH_CACHE";
const DEFAULT_STORE_CAPACITY: u64 = 1024;
const DEFAULT_EVENT_QUEUE_LIMIT: u64 = 256;

/// Command-line arguments for the dispatch-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "dispatch-cache",
    version,
    about = "Read-through caching and invalidation around a request dispatcher"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "DISPATCH_CACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the sample scenarios against in-memory handlers.
    Demo(DemoArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub overrides: DemoOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DemoOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the cache stages.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the in-memory store capacity.
    #[arg(long = "cache-store-capacity", value_name = "COUNT")]
    pub cache_store_capacity: Option<u64>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
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
pub struct CacheSettings {
    pub enabled: bool,
    pub store_capacity: NonZeroUsize,
    pub corrupt_entries: CorruptEntryPolicy,
    pub reload_failures: ReloadFailureMode,
    pub strict_policy_registration: bool,
    pub event_queue_limit: NonZeroUsize,
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

    match cli.command.as_ref() {
        Some(Command::Demo(args)) => raw.apply_demo_overrides(&args.overrides),
        None => raw.apply_demo_overrides(&DemoOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_demo_overrides(&mut self, overrides: &DemoOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(capacity) = overrides.cache_store_capacity {
            self.cache.store_capacity = Some(capacity);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let store_capacity = non_zero_usize(
        cache.store_capacity.unwrap_or(DEFAULT_STORE_CAPACITY),
        "cache.store_capacity",
    )?;
    let event_queue_limit = non_zero_usize(
        cache.event_queue_limit.unwrap_or(DEFAULT_EVENT_QUEUE_LIMIT),
        "cache.event_queue_limit",
    )?;

    let corrupt_entries = match cache.corrupt_entries.as_deref().map(str::trim) {
        None | Some("propagate") => CorruptEntryPolicy::Propagate,
        Some("miss") => CorruptEntryPolicy::Miss,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.corrupt_entries",
                format!("expected `propagate` or `miss`, got `{other}`"),
            ));
        }
    };

    let reload_failures = match cache.reload_failures.as_deref().map(str::trim) {
        None | Some("aggregate") => ReloadFailureMode::Aggregate,
        Some("fail_fast") => ReloadFailureMode::FailFast,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.reload_failures",
                format!("expected `aggregate` or `fail_fast`, got `{other}`"),
            ));
        }
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        store_capacity,
        corrupt_entries,
        reload_failures,
        strict_policy_registration: cache.strict_policy_registration.unwrap_or(false),
        event_queue_limit,
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
struct RawCacheSettings {
    enabled: Option<bool>,
    store_capacity: Option<u64>,
    corrupt_entries: Option<String>,
    reload_failures: Option<String>,
    strict_policy_registration: Option<bool>,
    event_queue_limit: Option<u64>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
