//! Archive Worker
//!
//! Polls Postgres for pending archive jobs and captures each page into the
//! object store until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use archiver_core::kernel::{
    ArchiveScheduler, ArchiveWorker, FirecrawlClient, PostgresArchiveStore, S3ObjectStore,
};
use archiver_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,archiver_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!(
        bucket = %config.storage.bucket,
        root_prefix = %config.storage.root_prefix,
        renderer = %config.firecrawl_base_url,
        "Starting archive worker"
    );

    // Database setup
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    // Infrastructure
    let store = Arc::new(PostgresArchiveStore::new(pool.clone()));
    let renderer = Arc::new(
        FirecrawlClient::with_base_url(
            config.firecrawl_api_key.clone(),
            config.firecrawl_base_url.clone(),
            config.worker.render_timeout,
        )
        .context("Failed to create rendering client")?,
    );
    let objects = Arc::new(
        S3ObjectStore::from_config(&config.storage, config.worker.asset_fetch_timeout)
            .await
            .context("Failed to create object store client")?,
    );

    let worker = ArchiveWorker::new(store, renderer, objects, config.worker.asset_concurrency);
    let scheduler = ArchiveScheduler::new(Arc::new(worker), config.worker.poll_interval);
    let handle = scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown requested, finishing in-flight job");
    scheduler.shutdown();
    handle.await.context("Archive worker task panicked")?;

    pool.close().await;
    tracing::info!("Archive worker stopped");

    Ok(())
}
