//! Fetch error categorization.
//!
//! This is the single place that decides retryable vs permanent, used by the
//! fetcher for both transport errors and HTTP status outcomes.

use reqwest::StatusCode;

use super::types::FetchError;

/// Categorizes a `reqwest::Error` (transport-level failure) into a
/// `FetchError`.
///
/// Timeouts, connect failures (including DNS resolution), and generic
/// request errors are retryable. Body/decode problems and anything else are
/// permanent: the bytes arrived but could not be used, so another attempt
/// would fail the same way.
pub fn categorize_reqwest_error(error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Retryable(format!("timeout while fetching: {error}"))
    } else if error.is_connect() {
        FetchError::Retryable(format!("connect error: {error}"))
    } else if error.is_request() {
        FetchError::Retryable(format!("request error: {error}"))
    } else if error.is_body() || error.is_decode() {
        FetchError::Permanent(format!("body decode failed: {error}"))
    } else if error.is_builder() || error.is_redirect() {
        FetchError::Permanent(format!("request could not be completed: {error}"))
    } else {
        FetchError::Permanent(format!("fetch failed: {error}"))
    }
}

/// Categorizes a non-2xx HTTP status into a `FetchError`.
///
/// 5xx is retryable, everything else (4xx and exotic codes) is permanent.
pub fn categorize_http_status(status: StatusCode) -> FetchError {
    let message = format!("http status {}", status.as_u16());
    if status.is_server_error() {
        FetchError::Retryable(message)
    } else {
        FetchError::Permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        for code in [500u16, 502, 503, 504, 521] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = categorize_http_status(status);
            assert!(err.is_retryable(), "{code} should be retryable");
            assert_eq!(err.to_string(), format!("http status {code}"));
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for code in [400u16, 401, 403, 404, 410, 422, 429] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = categorize_http_status(status);
            assert!(!err.is_retryable(), "{code} should be permanent");
        }
    }

    #[test]
    fn test_status_message_is_stable() {
        let err = categorize_http_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "http status 500");
    }

    // Categorizing real reqwest::Error values needs a live server to produce
    // them; the transport branches are exercised in tests/fetcher.rs against
    // httptest.
}
