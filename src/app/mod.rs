//! Cross-cutting application utilities.

pub mod backoff;
pub mod shutdown;
pub mod url;

pub use backoff::backoff_schedule;
pub use shutdown::shutdown_token;
pub use url::NormalizedUrl;
