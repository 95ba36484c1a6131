// Shared test helpers: database setup and API server spawning.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use metadata_pipeline::api::{build_router, ApiState};
use metadata_pipeline::config::Settings;
use metadata_pipeline::run_migrations;
use metadata_pipeline::storage::SqliteMetadataRepository;

/// Creates an in-memory database pool with migrations applied.
///
/// A single connection keeps every query on the same in-memory database.
#[allow(dead_code)] // Used by other test files
pub async fn create_test_pool() -> Arc<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    Arc::new(pool)
}

/// Creates a repository over a fresh in-memory database.
#[allow(dead_code)] // Used by other test files
pub async fn create_test_repository() -> (Arc<SqliteMetadataRepository>, Arc<Pool<Sqlite>>) {
    let pool = create_test_pool().await;
    (
        Arc::new(SqliteMetadataRepository::new(Arc::clone(&pool))),
        pool,
    )
}

/// Settings suitable for tests: fast backoff, tiny attempt budget.
#[allow(dead_code)] // Used by other test files
pub fn test_settings() -> Arc<Settings> {
    Arc::new(Settings {
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(5),
        max_connection_attempts: 2,
        readiness_ping_timeout: std::time::Duration::from_secs(1),
        ..Settings::default()
    })
}

/// Spawns the API on an ephemeral port and returns its base URL.
#[allow(dead_code)] // Used by other test files
pub async fn spawn_api(state: ApiState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("listener has an address");
    let app = build_router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("test API server error: {e}");
        }
    });
    format!("http://{addr}")
}
