//! Worker binary.
//!
//! Composition root: settings, logger, store pool + migrations, fetcher,
//! processor, consumer. Runs the consume loop until SIGTERM/SIGINT, drains
//! the in-flight delivery within the grace period, then closes broker
//! resources and the store. Broker connect exhaustion (at startup or after
//! a mid-run reconnect) is fatal: the process exits non-zero and the
//! supervisor restarts it.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use metadata_pipeline::app::shutdown_token;
use metadata_pipeline::config::{LogFormat, LogLevel, Settings};
use metadata_pipeline::fetch::MetadataFetcher;
use metadata_pipeline::initialization::{init_client, init_logger_with};
use metadata_pipeline::messaging::RabbitMqConsumer;
use metadata_pipeline::storage::{init_db_pool_with_path, run_migrations, SqliteMetadataRepository};
use metadata_pipeline::worker::{Processor, WorkerRunner};

#[derive(Parser, Debug)]
#[command(
    name = "metadata-worker",
    about = "Fetch worker for the metadata ingestion pipeline"
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

    let client = init_client(&settings)
        .await
        .context("Failed to initialize HTTP client")?;
    let fetcher = MetadataFetcher::new(client);
    let processor = Arc::new(Processor::new(
        repository,
        fetcher,
        settings.max_retries,
        settings.max_page_source_length,
    ));

    let mut consumer = RabbitMqConsumer::new(Arc::clone(&settings));
    consumer
        .connect()
        .await
        .context("Broker connect failed after exhausting retries")?;

    let shutdown = shutdown_token();
    let runner = WorkerRunner::new(consumer, processor, settings.shutdown_grace);
    let outcome = runner.run(shutdown).await;

    pool.close().await;

    if let Err(e) = &outcome {
        error!("worker exited with error: {e}");
    }
    outcome.context("Worker terminated on broker failure")
}
