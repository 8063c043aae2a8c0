//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU64, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "healing-cache";
const ENV_PREFIX: &str = "HEALING_CACHE";
const DEFAULT_SHORT_TERM_EXPIRY_MINUTES: u64 = 1;
const DEFAULT_LONG_TERM_EXPIRY_MINUTES: u64 = 60;
const DEFAULT_BACKGROUND_WAIT_MS: u64 = 1000;

/// Command-line arguments for the healing-cache host.
#[derive(Debug, Parser)]
#[command(
    name = "healing-cache",
    version,
    about = "Self-healing in-process cache host"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "HEALING_CACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
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

    /// Override the lifetime of short-term entries.
    #[arg(long = "cache-short-term-expiry-minutes", value_name = "MINUTES")]
    pub cache_short_term_expiry_minutes: Option<u64>,

    /// Override the lifetime of long-term entries.
    #[arg(long = "cache-long-term-expiry-minutes", value_name = "MINUTES")]
    pub cache_long_term_expiry_minutes: Option<u64>,

    /// Override the idle time between reconciliation passes.
    #[arg(long = "cache-background-wait-ms", value_name = "MILLIS")]
    pub cache_background_wait_ms: Option<u64>,

    /// Toggle the background reconciliation loop.
    #[arg(
        long = "cache-use-background-loop",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_use_background_loop: Option<bool>,

    /// Bound the number of stored entries.
    #[arg(long = "cache-max-capacity", value_name = "COUNT")]
    pub cache_max_capacity: Option<u64>,
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
    pub short_term_expiry_minutes: NonZeroU64,
    pub long_term_expiry_minutes: NonZeroU64,
    pub background_wait: Duration,
    pub use_background_loop: bool,
    pub max_capacity: Option<u64>,
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

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(minutes) = overrides.cache_short_term_expiry_minutes {
            self.cache.short_term_expiry_minutes = Some(minutes);
        }
        if let Some(minutes) = overrides.cache_long_term_expiry_minutes {
            self.cache.long_term_expiry_minutes = Some(minutes);
        }
        if let Some(wait) = overrides.cache_background_wait_ms {
            self.cache.background_wait_ms = Some(wait);
        }
        if let Some(enabled) = overrides.cache_use_background_loop {
            self.cache.use_background_loop = Some(enabled);
        }
        if let Some(capacity) = overrides.cache_max_capacity {
            self.cache.max_capacity = Some(capacity);
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
    let short_term_expiry_minutes = non_zero_u64(
        cache
            .short_term_expiry_minutes
            .unwrap_or(DEFAULT_SHORT_TERM_EXPIRY_MINUTES),
        "cache.short_term_expiry_minutes",
    )?;
    let long_term_expiry_minutes = non_zero_u64(
        cache
            .long_term_expiry_minutes
            .unwrap_or(DEFAULT_LONG_TERM_EXPIRY_MINUTES),
        "cache.long_term_expiry_minutes",
    )?;
    let wait_ms = non_zero_u64(
        cache.background_wait_ms.unwrap_or(DEFAULT_BACKGROUND_WAIT_MS),
        "cache.background_wait_ms",
    )?;

    if cache.max_capacity == Some(0) {
        return Err(LoadError::invalid(
            "cache.max_capacity",
            "must be greater than zero when set",
        ));
    }

    Ok(CacheSettings {
        short_term_expiry_minutes,
        long_term_expiry_minutes,
        background_wait: Duration::from_millis(wait_ms.get()),
        use_background_loop: cache.use_background_loop.unwrap_or(false),
        max_capacity: cache.max_capacity,
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
    short_term_expiry_minutes: Option<u64>,
    long_term_expiry_minutes: Option<u64>,
    background_wait_ms: Option<u64>,
    use_background_loop: Option<bool>,
    max_capacity: Option<u64>,
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
