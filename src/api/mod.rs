//! Producer HTTP API.
//!
//! Three surfaces:
//! - `POST /metadata` — validate, publish with confirm, 202 on ack
//! - `GET /metadata?url=…` — read-through lookup; enqueues on miss
//! - `GET /health/{live,ready}` — probes
//!
//! The server never crashes on downstream failure; publisher and store
//! errors map to the documented 503s.

mod handlers;
mod responses;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::messaging::MessagePublisher;
use crate::storage::MetadataRepository;

pub use responses::{
    LookupCompletedResponse, LookupFailedResponse, MetadataPayload, QueuedResponse,
};

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub publisher: Arc<dyn MessagePublisher>,
    pub repository: Arc<dyn MetadataRepository>,
    pub settings: Arc<Settings>,
}

/// Builds the API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .route(
            "/metadata",
            post(handlers::post_metadata).get(handlers::get_metadata),
        )
        .with_state(state)
}

/// Binds and serves the API until the shutdown token fires.
pub async fn start_api_server(
    bind: &str,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind API server to {}: {}", bind, e))?;

    log::info!("API server listening on http://{}/", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

    Ok(())
}
