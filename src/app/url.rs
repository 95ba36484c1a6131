//! URL validation and normalization.

use std::fmt;

use url::Url;

use crate::config::MAX_URL_LENGTH;
use crate::error_handling::UrlError;

/// A validated, canonical http(s) URL.
///
/// Records are keyed by the canonical string form, so every path that
/// observes a URL (POST body, GET query, message envelope) goes through this
/// type first. Normalization is whatever `url::Url` produces: lowercased
/// scheme and host, default port elided, empty path rendered as `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl(Url);

impl NormalizedUrl {
    /// Parses and validates a raw URL string.
    ///
    /// Rejects URLs longer than `MAX_URL_LENGTH`, schemes other than http
    /// and https, and URLs without a host.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        if raw.len() > MAX_URL_LENGTH {
            return Err(UrlError::TooLong);
        }
        let parsed = Url::parse(raw.trim())?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(UrlError::UnsupportedScheme(other.to_string())),
        }
        if parsed.host_str().is_none() {
            return Err(UrlError::MissingHost);
        }
        Ok(Self(parsed))
    }

    /// Canonical string form; this is the record key.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
