//! API request handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::warn;
use serde::Deserialize;
use serde_json::json;
use tokio::time::timeout;

use crate::api::responses::{response_from_record, QueuedResponse};
use crate::api::ApiState;
use crate::app::NormalizedUrl;
use crate::error_handling::PublishError;
use crate::messaging::Envelope;

/// POST /metadata request body.
#[derive(Debug, Deserialize)]
pub struct MetadataPostRequest {
    pub url: String,
}

/// GET /metadata query parameters.
#[derive(Debug, Deserialize)]
pub struct LookupParams {
    pub url: Option<String>,
}

/// POST /metadata: validate, publish with confirm, 202 on broker ack.
pub async fn post_metadata(
    State(state): State<ApiState>,
    Json(body): Json<MetadataPostRequest>,
) -> Response {
    let url = match NormalizedUrl::parse(&body.url) {
        Ok(url) => url,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": format!("invalid url: {e}") })),
            )
                .into_response();
        }
    };
    enqueue_or_unavailable(&state, &url).await
}

/// GET /metadata?url=…: read-through lookup.
///
/// Terminal records return 200 with the stored payload; in-flight records
/// return 202 without re-enqueueing; a miss (or an unrecognized status)
/// enqueues and returns 202 QUEUED.
pub async fn get_metadata(
    State(state): State<ApiState>,
    Query(params): Query<LookupParams>,
) -> Response {
    let raw = match params.url.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => raw,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                "Missing required query parameter: url",
            )
                .into_response();
        }
    };
    let url = match NormalizedUrl::parse(raw) {
        Ok(url) => url,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid URL").into_response(),
    };

    let record = match state.repository.get(url.as_str()).await {
        Ok(record) => record,
        Err(e) => {
            warn!("get_metadata_error: url={url} error={e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "Store not available").into_response();
        }
    };

    if let Some(record) = record {
        if let Some(response) = response_from_record(&record) {
            return response;
        }
        // Unrecognized status in the store: fall through and re-enqueue.
        warn!("unknown_record_status: url={url} status={}", record.status);
    }

    enqueue_or_unavailable(&state, &url).await
}

/// GET /health/live: process is up.
pub async fn health_live() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

/// GET /health/ready: 200 iff the publisher is READY and the store answers
/// a ping within the configured bound.
pub async fn health_ready(State(state): State<ApiState>) -> Response {
    if !state.publisher.ready() {
        warn!("readiness_failed: reason=publisher_not_ready");
        return not_ready("publisher_not_ready");
    }
    match timeout(
        state.settings.readiness_ping_timeout,
        state.repository.ping(),
    )
    .await
    {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Ok(Err(e)) => {
            warn!("readiness_failed: reason=store_unavailable error={e}");
            not_ready("store_unavailable")
        }
        Err(_) => {
            warn!("readiness_failed: reason=store_ping_timeout");
            not_ready("store_ping_timeout")
        }
    }
}

fn not_ready(reason: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "status": "not_ready", "reason": reason })),
    )
        .into_response()
}

/// Shared enqueue path for POST and the GET miss/unknown branches.
///
/// A successful publish also seeds the PENDING record so the URL is visible
/// to lookups before the worker picks it up; seeding is best-effort (the
/// worker's own upsert covers a store hiccup here).
async fn enqueue_or_unavailable(state: &ApiState, url: &NormalizedUrl) -> Response {
    if !state.publisher.ready() {
        warn!("publish_rejected: reason=publisher_not_ready url={url}");
        return (StatusCode::SERVICE_UNAVAILABLE, "Publisher not ready").into_response();
    }

    let envelope = Envelope::new(url);
    match state.publisher.publish(&envelope).await {
        Ok(()) => {
            if let Err(e) = state.repository.ensure_pending(url.as_str()).await {
                warn!("pending_seed_failed: url={url} error={e}");
            }
            let body = QueuedResponse {
                status: "QUEUED".to_string(),
                url: envelope.url,
                request_id: envelope.request_id,
            };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(PublishError::QueueRejected) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Queue rejected").into_response()
        }
        Err(e) => {
            warn!(
                "publish_failed: reason={e} request_id={} url={url}",
                envelope.request_id
            );
            (StatusCode::SERVICE_UNAVAILABLE, "Publish failed").into_response()
        }
    }
}
