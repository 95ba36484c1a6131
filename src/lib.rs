//! metadata_pipeline library: asynchronous HTTP metadata ingestion.
//!
//! Clients submit URLs to the producer API; envelopes travel through a durable
//! broker queue; a worker fetches each URL and persists the outcome (status,
//! headers, cookies, body, final post-redirect URL) to the shared store.
//! Lookups read through the same store and enqueue on miss.
//!
//! Two binaries share this library:
//! - `metadata-api`: the producer (HTTP API + confirm-mode publisher)
//! - `metadata-worker`: the consumer (prefetch-bounded processing loop)
//!
//! Delivery is at-least-once end to end: the publisher awaits broker confirms
//! before the API returns 202, the worker acknowledges only after a record
//! transition has been persisted, and every store write is idempotent.

pub mod api;
pub mod app;
pub mod config;
pub mod error_handling;
pub mod fetch;
pub mod initialization;
pub mod messaging;
pub mod storage;
pub mod worker;

pub use config::Settings;
pub use storage::{init_db_pool_with_path, run_migrations};
