//! Error type definitions.
//!
//! Each subsystem carries its own error enum; the composition roots wrap
//! them in `anyhow` with context. The publisher error variants mirror the
//! reasons surfaced to API clients as 503s.

use std::time::Duration;

use log::SetLoggerError;
use thiserror::Error;

use crate::config::MAX_URL_LENGTH;

/// Error types for initialization failures.
#[derive(Error, Debug)]
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClientError(#[from] reqwest::Error),
}

/// Error types for configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable is set but cannot be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value found in the environment.
        value: String,
    },

    /// Unrecognized publisher backend name.
    #[error("unknown publisher backend {0:?} (expected \"broker\" or \"inmemory\")")]
    UnknownBackend(String),
}

/// Error types for store operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    /// Header/cookie map serialization error.
    #[error("Record serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Error types for URL validation and normalization.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL exceeds the accepted length bound.
    #[error("url exceeds {MAX_URL_LENGTH} characters")]
    TooLong,

    /// The URL scheme is not http or https.
    #[error("unsupported scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),

    /// The URL has no host component.
    #[error("url has no host")]
    MissingHost,

    /// The URL does not parse at all.
    #[error("invalid url: {0}")]
    Invalid(#[from] url::ParseError),
}

/// Error types for broker connection management.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// All connection attempts were consumed without reaching the broker.
    #[error("broker unavailable after {attempts} connection attempts")]
    ConnectExhausted {
        /// Attempts consumed.
        attempts: u32,
    },

    /// The consumer has no live subscription.
    #[error("consumer is not attached to a queue")]
    NotConnected,

    /// Underlying AMQP failure.
    #[error(transparent)]
    Amqp(#[from] lapin::Error),
}

/// Publish failures surfaced to the API layer.
///
/// The producer maps every variant to a 503; `QueueRejected` keeps its own
/// response body so callers can distinguish overflow from broker loss.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Publisher state is not READY; fail fast without touching the channel.
    #[error("publisher_not_ready")]
    NotReady,

    /// Broker nacked the publish (queue overflow with reject-publish).
    #[error("queue_rejected")]
    QueueRejected,

    /// Connection was lost before or during the publish.
    #[error("connection_lost")]
    ConnectionLost,

    /// The broker confirm did not arrive within the bound.
    #[error("confirm timed out after {0:?}")]
    ConfirmTimeout(Duration),
}

/// Classified fetch failure, as returned by the metadata fetcher.
///
/// Retryable: connect/read timeout, DNS failure, network error, HTTP 5xx.
/// Permanent: HTTP 4xx, body-decoding failure, anything else.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transient condition; the message is nacked and redelivered.
    #[error("{0}")]
    Retryable(String),

    /// Non-transient condition; the record goes FAILED_PERMANENT.
    #[error("{0}")]
    Permanent(String),
}

impl FetchError {
    /// True when another fetch attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Retryable(_))
    }
}

/// Infrastructure failure while processing a delivery.
///
/// Distinct from fetch failures: the processor persists those as record
/// state. A `ProcessingError` means the store itself misbehaved; the
/// consumer nacks the delivery so the broker redelivers it.
#[derive(Error, Debug)]
pub enum ProcessingError {
    /// Store operation failed mid-processing.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}
