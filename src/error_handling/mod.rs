//! Error types and fetch error categorization.

mod categorization;
mod types;

pub use categorization::{categorize_http_status, categorize_reqwest_error};
pub use types::{
    BrokerError, ConfigError, DatabaseError, FetchError, InitializationError, ProcessingError,
    PublishError, UrlError,
};
