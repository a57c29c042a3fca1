//! Start-up configuration read from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `WEBHOOK_ENTITIES_HOST` | `0.0.0.0` |
//! | `WEBHOOK_ENTITIES_PORT` | `8080` |
//! | `WEBHOOK_ENTITIES_DATA_DIR` | `.webhook_entities` |
//! | `WEBHOOK_ENTITIES_WORKER_INTERVAL_SECS` | `60` |
//! | `WEBHOOK_ENTITIES_WORKER_TIME_BUDGET_SECS` | `30` |
//! | `WEBHOOK_ENTITIES_IGNORED_KEYS` | `an_unused_value,another_unused_value` |
//! | `WEBHOOK_ENTITIES_BODY_FORMAT` | `basic_html` |
//! | `WEBHOOK_ENTITIES_LOG_FORMAT` | `json` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset |
//!
//! Command-line flags override the values read here.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reconcile::{IgnoredKeys, TextFormat};
use thiserror::Error;

pub const ENV_HOST: &str = "WEBHOOK_ENTITIES_HOST";
pub const ENV_PORT: &str = "WEBHOOK_ENTITIES_PORT";
pub const ENV_DATA_DIR: &str = "WEBHOOK_ENTITIES_DATA_DIR";
pub const ENV_WORKER_INTERVAL: &str = "WEBHOOK_ENTITIES_WORKER_INTERVAL_SECS";
pub const ENV_WORKER_TIME_BUDGET: &str = "WEBHOOK_ENTITIES_WORKER_TIME_BUDGET_SECS";
pub const ENV_IGNORED_KEYS: &str = "WEBHOOK_ENTITIES_IGNORED_KEYS";
pub const ENV_BODY_FORMAT: &str = "WEBHOOK_ENTITIES_BODY_FORMAT";
pub const ENV_LOG_FORMAT: &str = "WEBHOOK_ENTITIES_LOG_FORMAT";
pub const ENV_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

pub const DEFAULT_DATA_DIR: &str = ".webhook_entities";

/// A configuration value could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}={value:?} is not valid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("expected 'json' or 'pretty', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub worker_interval: Duration,
    pub worker_time_budget: Duration,
    pub ignored_keys: IgnoredKeys,
    pub body_format: TextFormat,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            worker_interval: worker::DEFAULT_RUN_INTERVAL,
            worker_time_budget: worker::DEFAULT_TIME_BUDGET,
            ignored_keys: IgnoredKeys::default(),
            body_format: TextFormat::default(),
            log_format: LogFormat::default(),
            otlp_endpoint: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from `lookup`, which returns the raw value of
    /// a variable. Unset and blank variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(host) = get(ENV_HOST) {
            config.host = host.trim().to_owned();
        }
        if let Some(port) = get(ENV_PORT) {
            config.port = parse(ENV_PORT, &port)?;
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = get(ENV_WORKER_INTERVAL) {
            let secs: u64 = parse(ENV_WORKER_INTERVAL, &secs)?;
            if secs == 0 {
                return Err(invalid(ENV_WORKER_INTERVAL, "0", "the interval must be at least one second"));
            }
            config.worker_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = get(ENV_WORKER_TIME_BUDGET) {
            config.worker_time_budget = Duration::from_secs(parse(ENV_WORKER_TIME_BUDGET, &secs)?);
        }
        if let Some(keys) = lookup(ENV_IGNORED_KEYS) {
            // Set but empty means "ignore nothing".
            config.ignored_keys = IgnoredKeys::new(
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_owned),
            );
        }
        if let Some(format) = get(ENV_BODY_FORMAT) {
            config.body_format = parse(ENV_BODY_FORMAT, &format)?;
        }
        if let Some(format) = get(ENV_LOG_FORMAT) {
            config.log_format = parse(ENV_LOG_FORMAT, &format)?;
        }
        config.otlp_endpoint = get(ENV_OTLP_ENDPOINT).map(|v| v.trim().to_owned());

        Ok(config)
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join("records.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(name, value, e.to_string()))
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_owned(),
        reason: reason.into(),
    }
}
