//! Metadata record model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-URL processing status.
///
/// `Completed` and `FailedPermanent` are terminal: once a record reaches
/// either, the worker short-circuits redeliveries instead of re-fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    InProgress,
    Completed,
    FailedRetryable,
    FailedPermanent,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::InProgress => "IN_PROGRESS",
            RecordStatus::Completed => "COMPLETED",
            RecordStatus::FailedRetryable => "FAILED_RETRYABLE",
            RecordStatus::FailedPermanent => "FAILED_PERMANENT",
        }
    }

    /// Parses a stored status string. `None` for anything unrecognized;
    /// the API treats that as unknown and defensively re-enqueues.
    pub fn parse(raw: &str) -> Option<RecordStatus> {
        match raw {
            "PENDING" => Some(RecordStatus::Pending),
            "IN_PROGRESS" => Some(RecordStatus::InProgress),
            "COMPLETED" => Some(RecordStatus::Completed),
            "FAILED_RETRYABLE" => Some(RecordStatus::FailedRetryable),
            "FAILED_PERMANENT" => Some(RecordStatus::FailedPermanent),
            _ => None,
        }
    }

    /// True for COMPLETED and FAILED_PERMANENT.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::Completed | RecordStatus::FailedPermanent
        )
    }
}

/// Set when the body was truncated before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationDetails {
    pub truncated: bool,
    /// Byte length of the body before truncation.
    pub original_length: usize,
}

/// Outcome of a successful fetch, as written into a COMPLETED record.
#[derive(Debug, Clone)]
pub struct FetchedMetadata {
    /// HTTP status of the final (post-redirect) response.
    pub status_code: u16,
    /// Response headers. Names arrive lowercased from the HTTP client.
    pub headers: BTreeMap<String, String>,
    /// Cookie name/value pairs from Set-Cookie headers.
    pub cookies: BTreeMap<String, String>,
    /// Response body as text, possibly truncated.
    pub page_source: String,
    /// URL after redirect resolution.
    pub final_url: String,
    /// Present iff truncation occurred.
    pub additional_details: Option<TruncationDetails>,
}

/// One row of the metadata store.
///
/// Header/cookie maps and truncation details are stored as JSON text; the
/// accessors below decode them on demand.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetadataRecord {
    pub id: i64,
    pub url: String,
    pub status: String,
    pub status_code: Option<i64>,
    pub headers: Option<String>,
    pub cookies: Option<String>,
    pub page_source: Option<String>,
    pub final_url: Option<String>,
    pub additional_details: Option<String>,
    pub attempt_number: i64,
    pub error_msg: Option<String>,
    pub last_request_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MetadataRecord {
    /// Typed status, or `None` when the stored string is unrecognized.
    pub fn record_status(&self) -> Option<RecordStatus> {
        RecordStatus::parse(&self.status)
    }

    pub fn headers_map(&self) -> BTreeMap<String, String> {
        decode_json_map(self.headers.as_deref())
    }

    pub fn cookies_map(&self) -> BTreeMap<String, String> {
        decode_json_map(self.cookies.as_deref())
    }

    pub fn truncation_details(&self) -> Option<TruncationDetails> {
        self.additional_details
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

fn decode_json_map(raw: Option<&str>) -> BTreeMap<String, String> {
    raw.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RecordStatus::Pending,
            RecordStatus::InProgress,
            RecordStatus::Completed,
            RecordStatus::FailedRetryable,
            RecordStatus::FailedPermanent,
        ] {
            assert_eq!(RecordStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_unknown_status_parses_to_none() {
        assert_eq!(RecordStatus::parse("QUEUED"), None);
        assert_eq!(RecordStatus::parse(""), None);
        assert_eq!(RecordStatus::parse("completed"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(RecordStatus::Completed.is_terminal());
        assert!(RecordStatus::FailedPermanent.is_terminal());
        assert!(!RecordStatus::Pending.is_terminal());
        assert!(!RecordStatus::InProgress.is_terminal());
        assert!(!RecordStatus::FailedRetryable.is_terminal());
    }

    #[test]
    fn test_json_map_decoding_tolerates_garbage() {
        let record = MetadataRecord {
            id: 1,
            url: "https://example.com/".to_string(),
            status: "COMPLETED".to_string(),
            status_code: Some(200),
            headers: Some("not json".to_string()),
            cookies: None,
            page_source: None,
            final_url: None,
            additional_details: Some(r#"{"truncated":true,"original_length":5}"#.to_string()),
            attempt_number: 1,
            error_msg: None,
            last_request_id: None,
            created_at: 0,
            updated_at: 0,
        };
        assert!(record.headers_map().is_empty());
        assert!(record.cookies_map().is_empty());
        let details = record.truncation_details().unwrap();
        assert!(details.truncated);
        assert_eq!(details.original_length, 5);
    }
}
