//! Client configuration

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::dsn::Dsn;
use crate::error::ConfigError;
use crate::event::Event;

pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Hook run on every event right before it is handed to the transport.
/// Returning `None` drops the event.
pub type BeforeSend = Arc<dyn Fn(Event) -> Option<Event> + Send + Sync>;

/// Which transport a client builds for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    /// In-memory double, never performs I/O
    Capture,
}

impl std::str::FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "capture" => Ok(TransportKind::Capture),
            other => Err(ConfigError::invalid_value(
                "transport",
                format!("expected 'http' or 'capture', got '{}'", other),
            )),
        }
    }
}

/// Reporter configuration.
///
/// A [`Client`](crate::Client) keeps its own copy, so editing an options
/// value after building a client never affects that client.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterOptions {
    pub dsn: Option<String>,
    pub environment: String,
    /// Environments events are sent from. Empty means all of them.
    pub enabled_environments: BTreeSet<String>,
    pub release: Option<String>,
    pub server_name: Option<String>,
    #[serde(deserialize_with = "deserialize_sample_rate")]
    pub sample_rate: f64,
    pub transport: TransportKind,
    /// Zero delivers on the calling thread.
    pub background_worker_threads: usize,
    pub max_queue_size: usize,
    pub send_retries: u32,
    pub retry_backoff_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Report discard counts to the server when the transport shuts down
    pub send_client_reports: bool,
    pub logger: String,
    #[serde(skip)]
    pub before_send: Option<BeforeSend>,
}

impl Default for ReporterOptions {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            enabled_environments: BTreeSet::new(),
            release: None,
            server_name: None,
            sample_rate: 1.0,
            transport: TransportKind::Http,
            background_worker_threads: 2,
            max_queue_size: 30,
            send_retries: 2,
            retry_backoff_ms: 200,
            shutdown_timeout_ms: 2000,
            send_client_reports: true,
            logger: "temps-reporter".to_string(),
            before_send: None,
        }
    }
}

impl fmt::Debug for ReporterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterOptions")
            .field("dsn", &self.dsn)
            .field("environment", &self.environment)
            .field("enabled_environments", &self.enabled_environments)
            .field("release", &self.release)
            .field("server_name", &self.server_name)
            .field("sample_rate", &self.sample_rate)
            .field("transport", &self.transport)
            .field("background_worker_threads", &self.background_worker_threads)
            .field("max_queue_size", &self.max_queue_size)
            .field("send_retries", &self.send_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("shutdown_timeout_ms", &self.shutdown_timeout_ms)
            .field("send_client_reports", &self.send_client_reports)
            .field("logger", &self.logger)
            .field("before_send", &self.before_send.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ReporterOptions {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: Some(dsn.into()),
            ..Default::default()
        }
    }

    /// Options seeded from `SENTRY_DSN`, `SENTRY_CURRENT_ENV` /
    /// `SENTRY_ENVIRONMENT` and `SENTRY_RELEASE`. Read once.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(dsn) = env_var("SENTRY_DSN") {
            options.dsn = Some(dsn);
        }
        if let Some(environment) =
            env_var("SENTRY_CURRENT_ENV").or_else(|| env_var("SENTRY_ENVIRONMENT"))
        {
            options.environment = environment;
        }
        if let Some(release) = env_var("SENTRY_RELEASE") {
            options.release = Some(release);
        }
        options
    }

    /// Independent copy for a scoped edit, e.g. a single test.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// String keyed update, validated the same way as the typed setters.
    pub fn set(&mut self, field: &str, value: &str) -> Result<(), ConfigError> {
        match field {
            "dsn" => {
                Dsn::parse(value)?;
                self.dsn = Some(value.to_string());
            }
            "environment" => self.environment = value.to_string(),
            "enabled_environments" => {
                self.enabled_environments = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            "release" => self.release = Some(value.to_string()),
            "server_name" => self.server_name = Some(value.to_string()),
            "sample_rate" => {
                let rate = value.trim().parse::<f64>().map_err(|_| {
                    ConfigError::invalid_value(field, format!("'{}' is not a number", value))
                })?;
                self.set_sample_rate(rate)?;
            }
            "transport" => self.transport = value.parse()?,
            "background_worker_threads" => {
                self.background_worker_threads = parse_unsigned(field, value)?;
            }
            "max_queue_size" => self.max_queue_size = parse_unsigned(field, value)?,
            "send_retries" => self.send_retries = parse_unsigned(field, value)?,
            "retry_backoff_ms" => self.retry_backoff_ms = parse_unsigned(field, value)?,
            "shutdown_timeout_ms" => self.shutdown_timeout_ms = parse_unsigned(field, value)?,
            "send_client_reports" => {
                self.send_client_reports = value.trim().parse::<bool>().map_err(|_| {
                    ConfigError::invalid_value(field, format!("'{}' is not a boolean", value))
                })?;
            }
            "logger" => self.logger = value.to_string(),
            other => return Err(ConfigError::UnknownField(other.to_string())),
        }
        Ok(())
    }

    pub fn set_sample_rate(&mut self, rate: f64) -> Result<(), ConfigError> {
        self.sample_rate = check_sample_rate(rate)?;
        Ok(())
    }

    /// Checks values that may have been assigned directly to public fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_sample_rate(self.sample_rate)?;
        Ok(())
    }

    pub fn set_dsn(&mut self, dsn: &str) -> Result<(), ConfigError> {
        self.set("dsn", dsn)
    }

    pub fn set_before_send<F>(&mut self, hook: F)
    where
        F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
    {
        self.before_send = Some(Arc::new(hook));
    }

    /// Adds an environment to the enabled set. Adding one twice is a no-op.
    pub fn enable_environment(&mut self, environment: impl Into<String>) {
        self.enabled_environments.insert(environment.into());
    }

    pub fn is_enabled_for(&self, environment: &str) -> bool {
        self.enabled_environments.is_empty() || self.enabled_environments.contains(environment)
    }

    /// Whether events from the configured environment may be sent.
    pub fn enabled_in_current_env(&self) -> bool {
        self.is_enabled_for(&self.environment)
    }

    pub fn parse_dsn(&self) -> Result<Dsn, ConfigError> {
        match &self.dsn {
            Some(raw) => Dsn::parse(raw),
            None => Err(ConfigError::invalid_dsn("no DSN configured")),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl From<&str> for ReporterOptions {
    fn from(dsn: &str) -> Self {
        ReporterOptions::new(dsn)
    }
}

impl From<String> for ReporterOptions {
    fn from(dsn: String) -> Self {
        ReporterOptions::new(dsn)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// NaN fails the range check too.
fn check_sample_rate(rate: f64) -> Result<f64, ConfigError> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(ConfigError::invalid_value(
            "sample_rate",
            format!("{} is outside [0, 1]", rate),
        ));
    }
    Ok(rate)
}

fn deserialize_sample_rate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let rate = f64::deserialize(deserializer)?;
    check_sample_rate(rate).map_err(serde::de::Error::custom)
}

fn parse_unsigned<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| {
        ConfigError::invalid_value(field, format!("'{}' is not a non-negative integer", value))
    })
}
