//! Message processing.
//!
//! Converts a single delivery into a deterministic record transition and an
//! ack decision. The processor only writes to the store and logs; broker
//! acks are decided by the runner from the returned outcome.
//!
//! `max_retries` is the maximum number of fetch attempts, not retries after
//! the first. With max_retries=3 a message is fetched at most three times;
//! the third retryable failure is promoted to FAILED_PERMANENT and acked.

use std::sync::Arc;

use log::{info, warn};
use serde::Deserialize;

use crate::error_handling::ProcessingError;
use crate::fetch::MetadataFetcher;
use crate::storage::{FetchedMetadata, MetadataRepository, TruncationDetails};

/// Outcome of processing one delivery; the runner maps this to ACK/NACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Success persisted, or a terminal record was redelivered. ACK.
    Completed,
    /// FAILED_RETRYABLE persisted, attempts remain. NACK with requeue.
    RetryableFailure,
    /// FAILED_PERMANENT persisted. ACK.
    PermanentFailure,
    /// Message missing or empty `url`. ACK; poison messages never requeue.
    Malformed,
}

/// Lenient envelope view: a delivery only needs `url` and `request_id`.
#[derive(Debug, Deserialize)]
struct IncomingEnvelope {
    #[serde(default)]
    url: String,
    #[serde(default)]
    request_id: String,
}

/// Orchestrates record upsert, fetch, state transition, and ack decision.
pub struct Processor {
    repository: Arc<dyn MetadataRepository>,
    fetcher: MetadataFetcher,
    max_retries: u32,
    max_page_source_length: usize,
}

impl Processor {
    pub fn new(
        repository: Arc<dyn MetadataRepository>,
        fetcher: MetadataFetcher,
        max_retries: u32,
        max_page_source_length: usize,
    ) -> Self {
        Self {
            repository,
            fetcher,
            max_retries,
            max_page_source_length,
        }
    }

    /// Processes one delivery body.
    ///
    /// # Errors
    ///
    /// Only store failures escape as `ProcessingError`; the runner nacks the
    /// delivery so the broker redelivers it once the store recovers.
    pub async fn process(&self, body: &[u8]) -> Result<ProcessOutcome, ProcessingError> {
        let envelope = match parse_envelope(body) {
            Some(envelope) => envelope,
            None => {
                warn!("malformed_message: missing or empty url, acking without requeue");
                return Ok(ProcessOutcome::Malformed);
            }
        };
        let url = envelope.url.as_str();
        let request_id = envelope.request_id.as_str();
        info!("message_received: url={url} request_id={request_id}");

        self.repository.ensure_pending(url).await?;

        let attempt = match self.repository.mark_in_progress(url, request_id).await? {
            Some(attempt) => attempt,
            None => {
                // Stale redelivery of a terminal record; never re-fetch.
                info!("terminal_redelivery: url={url} request_id={request_id}");
                return Ok(ProcessOutcome::Completed);
            }
        };

        match self.fetcher.fetch(url).await {
            Ok(result) => {
                let result = truncate_page_source(result, self.max_page_source_length);
                self.repository.mark_completed(url, request_id, &result).await?;
                info!(
                    "metadata_persisted: url={url} request_id={request_id} attempt_number={attempt}"
                );
                Ok(ProcessOutcome::Completed)
            }
            Err(err) if err.is_retryable() => {
                let error_msg = err.to_string();
                if attempt < i64::from(self.max_retries) {
                    self.repository
                        .mark_retryable_failure(url, request_id, &error_msg)
                        .await?;
                    warn!(
                        "metadata_retryable_failure: url={url} request_id={request_id} \
                         attempt_number={attempt} error={error_msg}"
                    );
                    Ok(ProcessOutcome::RetryableFailure)
                } else {
                    self.repository
                        .mark_permanent_failure(url, request_id, &error_msg)
                        .await?;
                    warn!(
                        "metadata_permanent_failure: url={url} request_id={request_id} \
                         attempt_number={attempt} error={error_msg}"
                    );
                    Ok(ProcessOutcome::PermanentFailure)
                }
            }
            Err(err) => {
                let error_msg = err.to_string();
                self.repository
                    .mark_permanent_failure(url, request_id, &error_msg)
                    .await?;
                warn!(
                    "metadata_permanent_failure: url={url} request_id={request_id} \
                     attempt_number={attempt} error={error_msg}"
                );
                Ok(ProcessOutcome::PermanentFailure)
            }
        }
    }
}

fn parse_envelope(body: &[u8]) -> Option<IncomingEnvelope> {
    let envelope: IncomingEnvelope = serde_json::from_slice(body).ok()?;
    if envelope.url.trim().is_empty() {
        return None;
    }
    Some(envelope)
}

/// Truncates the body to the configured byte limit, backing off to the
/// nearest character boundary, and records the original length.
fn truncate_page_source(mut metadata: FetchedMetadata, max_len: usize) -> FetchedMetadata {
    if max_len == 0 || metadata.page_source.len() <= max_len {
        return metadata;
    }
    let original_length = metadata.page_source.len();
    let mut cut = max_len;
    while !metadata.page_source.is_char_boundary(cut) {
        cut -= 1;
    }
    metadata.page_source.truncate(cut);
    metadata.additional_details = Some(TruncationDetails {
        truncated: true,
        original_length,
    });
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn metadata_with_body(body: &str) -> FetchedMetadata {
        FetchedMetadata {
            status_code: 200,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            page_source: body.to_string(),
            final_url: "https://example.com/".to_string(),
            additional_details: None,
        }
    }

    #[test]
    fn test_parse_envelope_accepts_minimal_message() {
        let envelope =
            parse_envelope(br#"{"url":"https://example.com/","request_id":"r1"}"#).unwrap();
        assert_eq!(envelope.url, "https://example.com/");
        assert_eq!(envelope.request_id, "r1");
    }

    #[test]
    fn test_parse_envelope_tolerates_missing_request_id() {
        let envelope = parse_envelope(br#"{"url":"https://example.com/"}"#).unwrap();
        assert_eq!(envelope.request_id, "");
    }

    #[test]
    fn test_parse_envelope_rejects_missing_url() {
        assert!(parse_envelope(br#"{"request_id":"r1"}"#).is_none());
        assert!(parse_envelope(br#"{"url":"   "}"#).is_none());
        assert!(parse_envelope(b"not json").is_none());
    }

    #[test]
    fn test_truncation_below_limit_is_untouched() {
        let result = truncate_page_source(metadata_with_body("short"), 100);
        assert_eq!(result.page_source, "short");
        assert!(result.additional_details.is_none());
    }

    #[test]
    fn test_truncation_at_limit_is_untouched() {
        let result = truncate_page_source(metadata_with_body("12345"), 5);
        assert_eq!(result.page_source, "12345");
        assert!(result.additional_details.is_none());
    }

    #[test]
    fn test_truncation_over_limit_records_original_length() {
        let body = "a".repeat(1_500_000);
        let result = truncate_page_source(metadata_with_body(&body), 1_000_000);
        assert_eq!(result.page_source.len(), 1_000_000);
        let details = result.additional_details.unwrap();
        assert!(details.truncated);
        assert_eq!(details.original_length, 1_500_000);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // Each é is two bytes; a 3-byte limit must cut back to 2 bytes.
        let result = truncate_page_source(metadata_with_body("éé"), 3);
        assert_eq!(result.page_source, "é");
        assert_eq!(result.additional_details.unwrap().original_length, 4);
    }

    #[test]
    fn test_truncation_disabled_when_limit_is_zero() {
        let result = truncate_page_source(metadata_with_body("anything"), 0);
        assert_eq!(result.page_source, "anything");
        assert!(result.additional_details.is_none());
    }
}
