//! Configuration types for hiveq.
//!
//! This module contains the broker connection settings, the per-role queue
//! options, retry policies and logging configuration.

use crate::error::{HiveError, HiveResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Connection URL used when none is supplied.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Standard Redis port.
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Host used when the URL can't be parsed and no host is supplied.
pub const DEFAULT_REDIS_HOST: &str = "localhost";

/// Retries applied when the caller does not ask for a specific count.
pub const DEFAULT_RETRIES: u32 = 4;

/// Initial backoff delay for retried jobs.
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 5000;

/// Main configuration for hiveq.
///
/// # Examples
///
/// ```rust
/// use hiveq::config::HiveConfig;
///
/// let config = HiveConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Broker connection parameters
    pub connection: ConnectionConfig,

    /// Queue options shared by every handle; role flags are set per handle
    pub queue: QueueSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Broker host name
    pub host: String,

    /// Broker port, always positive
    pub port: u16,

    /// Optional password
    pub password: Option<String>,

    /// Optional database index
    pub db: Option<i64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::resolve(None, None, None)
    }
}

impl ConnectionConfig {
    /// Resolve connection parameters from an optional URL.
    ///
    /// Falls back to `host`/`port` (or their defaults) when the URL is
    /// malformed. Never fails.
    pub fn resolve(url: Option<&str>, host: Option<&str>, port: Option<&str>) -> Self {
        let raw = url.unwrap_or(DEFAULT_REDIS_URL);

        match Url::parse(raw) {
            Ok(parsed) => match parsed.host_str().filter(|h| !h.is_empty()) {
                Some(parsed_host) => Self {
                    host: parsed_host.to_string(),
                    port: parsed.port().filter(|p| *p > 0).unwrap_or(DEFAULT_REDIS_PORT),
                    password: parsed
                        .password()
                        .filter(|p| !p.is_empty())
                        .map(str::to_string),
                    db: Some(
                        parsed
                            .path_segments()
                            .and_then(|mut segments| segments.next())
                            .and_then(|segment| segment.parse::<i64>().ok())
                            .unwrap_or(0),
                    ),
                },
                None => {
                    tracing::warn!(url = raw, "Connection URL has no host, using fallback");
                    Self::fallback(host, port)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Invalid connection URL, using fallback");
                Self::fallback(host, port)
            }
        }
    }

    /// Parameters built only from discrete host/port values.
    pub fn fallback(host: Option<&str>, port: Option<&str>) -> Self {
        Self {
            host: host
                .filter(|h| !h.is_empty())
                .unwrap_or(DEFAULT_REDIS_HOST)
                .to_string(),
            port: port
                .and_then(|p| p.trim().parse::<u16>().ok())
                .filter(|p| *p > 0)
                .unwrap_or(DEFAULT_REDIS_PORT),
            password: None,
            db: None,
        }
    }

    /// Read `REDIS_URL`, `REDIS_HOST` and `REDIS_PORT`.
    pub fn from_env() -> Self {
        let url = std::env::var("REDIS_URL").ok();
        let host = std::env::var("REDIS_HOST").ok();
        let port = std::env::var("REDIS_PORT").ok();
        Self::resolve(url.as_deref(), host.as_deref(), port.as_deref())
    }

    /// Render a `redis://` URL the client can open.
    pub fn to_url(&self) -> HiveResult<String> {
        let mut url = Url::parse(&format!("redis://{}:{}", self.host, self.port))
            .map_err(|e| HiveError::config(format!("Invalid broker address: {e}")))?;

        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| HiveError::config("Cannot set password on broker URL"))?;
        }
        if let Some(db) = self.db {
            url.set_path(&format!("/{db}"));
        }

        Ok(url.to_string())
    }
}

/// Role a queue handle is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Submits jobs
    Producer,
    /// Claims and processes jobs
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Producer => write!(f, "producer"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// Options applied to a queue handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Whether the handle claims jobs
    pub is_worker: bool,

    /// Delete the job record once it succeeds
    pub remove_on_success: bool,

    /// Delete the job record once it fails for good
    pub remove_on_failure: bool,

    /// Prefix for broker keys
    pub key_prefix: String,

    /// Delay between polls when the queue is empty (in milliseconds)
    pub poll_interval_ms: u64,

    /// Upper bound for the idle poll delay (in milliseconds)
    pub max_poll_interval_ms: u64,

    /// How long a claimed job may stay active before it is redelivered
    pub stall_timeout_ms: u64,

    /// Time to wait for in-flight jobs when closing (in seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            is_worker: false,
            remove_on_success: false,
            remove_on_failure: false,
            key_prefix: "bq".to_string(),
            poll_interval_ms: 100,
            max_poll_interval_ms: 2000,
            stall_timeout_ms: 300_000,
            shutdown_timeout_secs: 30,
        }
    }
}

impl QueueSettings {
    /// Worker-role options: claims jobs, drops successes, keeps failures.
    pub fn worker(self) -> Self {
        Self {
            is_worker: true,
            remove_on_success: true,
            remove_on_failure: false,
            ..self
        }
    }

    /// Producer-role options.
    pub fn producer(self) -> Self {
        Self {
            is_worker: false,
            ..self
        }
    }

    /// Apply the options for `role`.
    pub fn for_role(self, role: Role) -> Self {
        match role {
            Role::Producer => self.producer(),
            Role::Worker => self.worker(),
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the idle poll interval.
    pub fn with_poll_interval(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Set the stall timeout.
    pub fn with_stall_timeout(mut self, timeout_ms: u64) -> Self {
        self.stall_timeout_ms = timeout_ms;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout_secs: u64) -> Self {
        self.shutdown_timeout_secs = timeout_secs;
        self
    }
}

/// Retry policy attached to a job at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,

    /// Backoff strategy
    pub backoff: BackoffStrategy,

    /// Initial delay between attempts (in milliseconds)
    pub initial_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_retries(DEFAULT_RETRIES)
    }
}

impl RetryPolicy {
    /// `retries` retries after the first attempt, exponential backoff.
    pub fn from_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            backoff: BackoffStrategy::Exponential,
            initial_delay_ms: DEFAULT_BACKOFF_DELAY_MS,
        }
    }

    /// Create a retry policy with exponential backoff.
    pub fn exponential(max_attempts: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Exponential,
            initial_delay_ms,
        }
    }

    /// Create a retry policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Fixed,
            initial_delay_ms: delay_ms,
        }
    }

    /// Retry straight away.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffStrategy::Immediate,
            initial_delay_ms: 0,
        }
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        let ms = match self.backoff {
            BackoffStrategy::Immediate => 0,
            BackoffStrategy::Fixed => self.initial_delay_ms,
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
                self.initial_delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms)
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// No delay between retries
    Immediate,
    /// Same delay before every retry
    Fixed,
    /// Delay doubles with each retry
    Exponential,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, overridden by `RUST_LOG`
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Enable colored output (ignored if json_format is true)
    pub colored: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            colored: true,
            include_targets: false,
        }
    }
}

impl LoggingConfig {
    /// Read `LOG_LEVEL`, `LOG_FORMAT` and `LOG_PRETTY`.
    pub fn from_env() -> Self {
        let level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(LogLevel::Info);
        let pretty = std::env::var("LOG_PRETTY").is_ok_and(|v| v.eq_ignore_ascii_case("true"));
        let json_format = !pretty
            && std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

        Self {
            level,
            json_format,
            colored: !json_format,
            ..Default::default()
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = HiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "fatal" => Ok(LogLevel::Error),
            other => Err(HiveError::config(format!("Unknown log level '{other}'"))),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl HiveConfig {
    /// Configuration read from the process environment.
    ///
    /// Besides the broker variables, `LOG_LEVEL` sets the level (unknown
    /// values keep `info`), `LOG_FORMAT=json` switches to structured output
    /// and `LOG_PRETTY=true` forces colored plain output.
    pub fn from_env() -> Self {
        Self {
            connection: ConnectionConfig::from_env(),
            logging: LoggingConfig::from_env(),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.connection.host.is_empty() {
            errors.push("Broker host must not be empty".to_string());
        }

        if self.connection.port == 0 {
            errors.push("Broker port must be greater than 0".to_string());
        }

        if self.queue.key_prefix.is_empty() {
            errors.push("Key prefix must not be empty".to_string());
        }

        if self.queue.poll_interval_ms == 0 {
            errors.push("Poll interval must be greater than 0".to_string());
        }

        if self.queue.max_poll_interval_ms < self.queue.poll_interval_ms {
            errors.push(
                "Max poll interval must be greater than or equal to poll interval".to_string(),
            );
        }

        if self.queue.stall_timeout_ms == 0 {
            errors.push("Stall timeout must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
