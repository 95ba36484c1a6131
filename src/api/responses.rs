//! Serializing persisted records into lookup responses.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::storage::{MetadataRecord, RecordStatus, TruncationDetails};

/// 202 body for accepted or in-flight URLs.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub status: String,
    pub url: String,
    pub request_id: String,
}

/// Metadata block nested in a completed lookup.
#[derive(Debug, Serialize)]
pub struct MetadataPayload {
    pub status_code: i64,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub page_source: String,
    pub final_url: Option<String>,
    pub additional_details: Option<TruncationDetails>,
}

/// 200 body for a COMPLETED record.
#[derive(Debug, Serialize)]
pub struct LookupCompletedResponse {
    pub status: String,
    pub url: String,
    pub metadata: MetadataPayload,
}

/// 200 body for a FAILED_PERMANENT record.
#[derive(Debug, Serialize)]
pub struct LookupFailedResponse {
    pub status: String,
    pub url: String,
    pub error_msg: Option<String>,
    pub attempt_number: i64,
}

/// Maps a persisted record to an HTTP response.
///
/// - COMPLETED → 200 with the full metadata block
/// - FAILED_PERMANENT → 200 with error_msg and attempt_number
/// - PENDING / IN_PROGRESS / FAILED_RETRYABLE → 202 IN_PROGRESS, no
///   re-enqueue
/// - unrecognized status → `None`; the caller re-enqueues defensively
pub fn response_from_record(record: &MetadataRecord) -> Option<Response> {
    match record.record_status()? {
        RecordStatus::Completed => {
            let body = LookupCompletedResponse {
                status: RecordStatus::Completed.as_str().to_string(),
                url: record.url.clone(),
                metadata: MetadataPayload {
                    status_code: record.status_code.unwrap_or(0),
                    headers: record.headers_map(),
                    cookies: record.cookies_map(),
                    page_source: record.page_source.clone().unwrap_or_default(),
                    final_url: record.final_url.clone(),
                    additional_details: record.truncation_details(),
                },
            };
            Some((StatusCode::OK, Json(body)).into_response())
        }
        RecordStatus::FailedPermanent => {
            let body = LookupFailedResponse {
                status: RecordStatus::FailedPermanent.as_str().to_string(),
                url: record.url.clone(),
                error_msg: record.error_msg.clone(),
                attempt_number: record.attempt_number,
            };
            Some((StatusCode::OK, Json(body)).into_response())
        }
        RecordStatus::Pending | RecordStatus::InProgress | RecordStatus::FailedRetryable => {
            let body = QueuedResponse {
                status: "IN_PROGRESS".to_string(),
                url: record.url.clone(),
                request_id: record.last_request_id.clone().unwrap_or_default(),
            };
            Some((StatusCode::ACCEPTED, Json(body)).into_response())
        }
    }
}
