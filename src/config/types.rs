//! Configuration types.
//!
//! `Settings` is loaded from the environment in the composition roots; the
//! CLI only controls logging. Both processes read the same variables so the
//! queue declaration and store location always agree.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;

use crate::config::constants::*;
use crate::error_handling::ConfigError;

/// Logging level for the application.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for log aggregators
    Json,
}

/// Which publisher implementation the producer API wires in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherBackend {
    /// Confirm-mode AMQP publisher (the production path).
    Broker,
    /// Bounded in-memory buffer; always ready. Test/local mode only.
    InMemory,
}

impl FromStr for PublisherBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broker" | "rabbitmq" => Ok(PublisherBackend::Broker),
            "inmemory" => Ok(PublisherBackend::InMemory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Runtime configuration shared by the producer API and the worker.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database path (store DSN)
    pub db_path: PathBuf,

    /// AMQP connection string (broker DSN)
    pub broker_url: String,

    /// Queue name; declared identically on both sides
    pub queue_name: String,

    /// Broker-side queue bound (`x-max-length`, overflow rejects publishes)
    pub queue_max_length: u32,

    /// Maximum fetch attempts before FAILED_PERMANENT
    pub max_retries: u32,

    /// Consumer prefetch window
    pub prefetch_count: u16,

    /// Body truncation threshold in bytes
    pub max_page_source_length: usize,

    /// Fetcher connect timeout
    pub fetch_connect_timeout: Duration,

    /// Fetcher read timeout
    pub fetch_read_timeout: Duration,

    /// User-Agent header sent on fetches
    pub fetch_user_agent: String,

    /// Initial connect/reconnect backoff delay
    pub initial_backoff: Duration,

    /// Backoff delay cap
    pub max_backoff: Duration,

    /// Connection attempts before giving up
    pub max_connection_attempts: u32,

    /// Bound on waiting for a broker publish confirm
    pub publish_confirm_timeout: Duration,

    /// Shutdown drain deadline
    pub shutdown_grace: Duration,

    /// Bound on the readiness probe's store ping
    pub readiness_ping_timeout: Duration,

    /// Publisher implementation for the producer API
    pub publisher_backend: PublisherBackend,

    /// Producer API bind address
    pub api_bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            broker_url: DEFAULT_BROKER_URL.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            queue_max_length: DEFAULT_QUEUE_MAX_LENGTH,
            max_retries: DEFAULT_MAX_RETRIES,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            max_page_source_length: DEFAULT_MAX_PAGE_SOURCE_LENGTH,
            fetch_connect_timeout: DEFAULT_FETCH_CONNECT_TIMEOUT,
            fetch_read_timeout: DEFAULT_FETCH_READ_TIMEOUT,
            fetch_user_agent: DEFAULT_USER_AGENT.to_string(),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_connection_attempts: DEFAULT_MAX_CONNECTION_ATTEMPTS,
            publish_confirm_timeout: DEFAULT_PUBLISH_CONFIRM_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            readiness_ping_timeout: DEFAULT_READINESS_PING_TIMEOUT,
            publisher_backend: PublisherBackend::Broker,
            api_bind: DEFAULT_API_BIND.to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed; this
    /// is fatal at startup (the process exits non-zero).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Settings::default();

        if let Some(path) = env_parse::<PathBuf>("METADATA_DB_PATH")? {
            settings.db_path = path;
        }
        if let Some(url) = env_parse::<String>("BROKER_URL")? {
            settings.broker_url = url;
        }
        if let Some(name) = env_parse::<String>("QUEUE_NAME")? {
            settings.queue_name = name;
        }
        if let Some(n) = env_parse::<u32>("QUEUE_MAX_LENGTH")? {
            settings.queue_max_length = n;
        }
        if let Some(n) = env_parse::<u32>("MAX_RETRIES")? {
            settings.max_retries = n;
        }
        if let Some(n) = env_parse::<u16>("PREFETCH_COUNT")? {
            settings.prefetch_count = n;
        }
        if let Some(n) = env_parse::<usize>("MAX_PAGE_SOURCE_LENGTH")? {
            settings.max_page_source_length = n;
        }
        if let Some(d) = env_duration_secs("FETCH_CONNECT_TIMEOUT_SECONDS")? {
            settings.fetch_connect_timeout = d;
        }
        if let Some(d) = env_duration_secs("FETCH_READ_TIMEOUT_SECONDS")? {
            settings.fetch_read_timeout = d;
        }
        if let Some(ua) = env_parse::<String>("FETCH_USER_AGENT")? {
            if !ua.is_empty() {
                settings.fetch_user_agent = ua;
            }
        }
        if let Some(d) = env_duration_secs("INITIAL_BACKOFF_SECONDS")? {
            settings.initial_backoff = d;
        }
        if let Some(d) = env_duration_secs("MAX_BACKOFF_SECONDS")? {
            settings.max_backoff = d;
        }
        if let Some(n) = env_parse::<u32>("MAX_CONNECTION_ATTEMPTS")? {
            settings.max_connection_attempts = n;
        }
        if let Some(d) = env_duration_secs("PUBLISH_CONFIRM_TIMEOUT_SECONDS")? {
            settings.publish_confirm_timeout = d;
        }
        if let Some(d) = env_duration_secs("SHUTDOWN_GRACE_SECONDS")? {
            settings.shutdown_grace = d;
        }
        if let Some(d) = env_duration_secs("READINESS_PING_TIMEOUT_SECONDS")? {
            settings.readiness_ping_timeout = d;
        }
        if let Some(backend) = env_parse::<PublisherBackend>("PUBLISHER_BACKEND")? {
            settings.publisher_backend = backend;
        }
        if let Some(bind) = env_parse::<String>("API_BIND")? {
            settings.api_bind = bind;
        }

        Ok(settings)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

fn env_duration_secs(key: &str) -> Result<Option<Duration>, ConfigError> {
    match env_parse::<f64>(key)? {
        Some(secs) if secs >= 0.0 && secs.is_finite() => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: secs.to_string(),
        }),
        None => Ok(None),
    }
}
