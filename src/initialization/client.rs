//! HTTP client initialization.

use std::sync::Arc;

use reqwest::ClientBuilder;

use crate::config::Settings;

/// Initializes the HTTP client used by the metadata fetcher.
///
/// Configured with:
/// - Connect and total-request timeouts from settings
/// - The configured User-Agent
/// - Redirect following (reqwest default, up to 10 hops); the final URL
///   after redirects is recorded on the metadata record
/// - Rustls TLS backend
pub async fn init_client(settings: &Settings) -> Result<Arc<reqwest::Client>, reqwest::Error> {
    let client = ClientBuilder::new()
        .connect_timeout(settings.fetch_connect_timeout)
        .timeout(settings.fetch_read_timeout)
        .user_agent(settings.fetch_user_agent.clone())
        .build()?;
    Ok(Arc::new(client))
}
