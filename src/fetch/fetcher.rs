//! HTTP metadata fetcher.
//!
//! Performs the GET and captures the response characteristics the record
//! stores: status, headers, cookies, body text, final post-redirect URL.
//! Every failure is classified as retryable or permanent before it leaves
//! this module; the processor never inspects transport errors itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::SET_COOKIE;

use crate::error_handling::{categorize_http_status, categorize_reqwest_error, FetchError};
use crate::storage::FetchedMetadata;

/// Fetches URL metadata with a shared `reqwest` client.
///
/// The client carries the connect/read timeouts and redirect policy; see
/// `initialization::init_client`.
pub struct MetadataFetcher {
    client: Arc<reqwest::Client>,
}

impl MetadataFetcher {
    pub fn new(client: Arc<reqwest::Client>) -> Self {
        Self { client }
    }

    /// Fetches one URL.
    ///
    /// 2xx responses produce a `FetchedMetadata`; everything else is a
    /// classified `FetchError` (5xx and transport timeouts retryable, the
    /// rest permanent).
    pub async fn fetch(&self, url: &str) -> Result<FetchedMetadata, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| categorize_reqwest_error(&e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let headers = extract_headers(&response);
        let cookies = extract_cookies(&response);

        if !status.is_success() {
            return Err(categorize_http_status(status));
        }

        let page_source = response
            .text()
            .await
            .map_err(|e| categorize_reqwest_error(&e))?;

        Ok(FetchedMetadata {
            status_code: status.as_u16(),
            headers,
            cookies,
            page_source,
            final_url,
            additional_details: None,
        })
    }
}

fn extract_headers(response: &reqwest::Response) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    headers
}

/// Pulls name/value pairs out of Set-Cookie headers. Attributes after the
/// first `;` are dropped; only the cookie outcome matters to the record.
fn extract_cookies(response: &reqwest::Response) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for value in response.headers().get_all(SET_COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        let pair = raw.split(';').next().unwrap_or(raw);
        if let Some((name, value)) = pair.split_once('=') {
            let name = name.trim();
            if !name.is_empty() {
                cookies.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::time::Duration;

    fn test_client() -> Arc<reqwest::Client> {
        Arc::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("client builds"),
        )
    }

    #[tokio::test]
    async fn test_fetch_success_captures_response() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/page")).respond_with(
                status_code(200)
                    .append_header("content-type", "text/html")
                    .append_header("set-cookie", "session=abc123; Path=/; HttpOnly")
                    .body("<html>hello</html>"),
            ),
        );

        let fetcher = MetadataFetcher::new(test_client());
        let result = fetcher.fetch(&server.url_str("/page")).await.unwrap();

        assert_eq!(result.status_code, 200);
        assert_eq!(result.page_source, "<html>hello</html>");
        assert_eq!(
            result.headers.get("content-type").map(String::as_str),
            Some("text/html")
        );
        assert_eq!(
            result.cookies.get("session").map(String::as_str),
            Some("abc123")
        );
        assert!(result.final_url.ends_with("/page"));
        assert!(result.additional_details.is_none());
    }

    #[tokio::test]
    async fn test_fetch_5xx_is_retryable() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/flaky"))
                .respond_with(status_code(500)),
        );

        let fetcher = MetadataFetcher::new(test_client());
        let err = fetcher.fetch(&server.url_str("/flaky")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "http status 500");
    }

    #[tokio::test]
    async fn test_fetch_4xx_is_permanent() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/missing"))
                .respond_with(status_code(404)),
        );

        let fetcher = MetadataFetcher::new(test_client());
        let err = fetcher.fetch(&server.url_str("/missing")).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "http status 404");
    }

    #[tokio::test]
    async fn test_fetch_connect_failure_is_retryable() {
        // Nothing listens on port 1.
        let fetcher = MetadataFetcher::new(test_client());
        let err = fetcher.fetch("http://127.0.0.1:1/").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cookie_attributes_are_dropped() {
        // extract_cookies is exercised end to end above; this covers the
        // parsing corner directly.
        let pair = "token=v1; Secure; SameSite=Lax";
        let first = pair.split(';').next().unwrap();
        let (name, value) = first.split_once('=').unwrap();
        assert_eq!(name.trim(), "token");
        assert_eq!(value.trim(), "v1");
    }
}
