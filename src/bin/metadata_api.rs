//! Producer API binary.
//!
//! Composition root: settings, logger, store pool + migrations, publisher
//! backend selection, HTTP server. Lifecycle is init -> serve -> close;
//! exhausted broker connect attempts at startup are fatal (non-zero exit).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use metadata_pipeline::api::{start_api_server, ApiState};
use metadata_pipeline::app::shutdown_token;
use metadata_pipeline::config::{LogFormat, LogLevel, PublisherBackend, Settings};
use metadata_pipeline::initialization::init_logger_with;
use metadata_pipeline::messaging::{InMemoryPublisher, MessagePublisher, RabbitMqPublisher};
use metadata_pipeline::storage::{init_db_pool_with_path, run_migrations, SqliteMetadataRepository};

#[derive(Parser, Debug)]
#[command(
    name = "metadata-api",
    about = "Producer API for the metadata ingestion pipeline"
)]
struct Opt {
    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value = "plain")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    init_logger_with(opt.log_level.into(), opt.log_format)
        .context("Failed to initialize logger")?;

    let settings = Arc::new(Settings::from_env().context("Failed to load configuration")?);

    let pool = init_db_pool_with_path(&settings.db_path)
        .await
        .context("Failed to initialize database pool")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    let repository = Arc::new(SqliteMetadataRepository::new(Arc::clone(&pool)));

    let publisher: Arc<dyn MessagePublisher> = match settings.publisher_backend {
        PublisherBackend::Broker => Arc::new(RabbitMqPublisher::new(Arc::clone(&settings))),
        PublisherBackend::InMemory => {
            Arc::new(InMemoryPublisher::new(settings.queue_max_length as usize))
        }
    };
    publisher
        .connect()
        .await
        .context("Broker connect failed after exhausting retries")?;

    let shutdown = shutdown_token();
    let state = ApiState {
        publisher: Arc::clone(&publisher),
        repository,
        settings: Arc::clone(&settings),
    };
    let served = start_api_server(&settings.api_bind, state, shutdown).await;

    publisher.close().await;
    pool.close().await;

    if let Err(e) = &served {
        error!("API server exited with error: {e}");
    }
    served
}
