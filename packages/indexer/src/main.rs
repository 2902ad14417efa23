use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use registry_indexer::chain::EthersChainReader;
use registry_indexer::config::Config;
use registry_indexer::db::Database;
use registry_indexer::sync::IndexerService;
use registry_indexer::utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    utils::logger::init_logger(utils::logger::DAEMON_FILTER);
    info!("Starting registry indexer");

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");
    utils::config_logger::log_config(&config);
    let settings = config.to_sync_settings()?;

    // Initialize database connection
    let db = Database::new(&config.database_url)
        .await?
        .with_settings(config.store_settings())
        .migrate()
        .await?;
    info!("Database connection established and migrations applied");
    let db = Arc::new(db);

    let reader = EthersChainReader::new(&config.http_provider_url, settings.registry)
        .context("Failed to create chain reader")?;
    let service = IndexerService::new(settings, Arc::new(reader), db.clone());

    match service.init().await {
        Ok(report) => info!(
            "Indexer ready: {} records, watermark {:?}",
            db.count_records().await.unwrap_or_default(),
            report.watermark
        ),
        Err(e) => error!("Initial sync failed: {}", e),
    }
    service.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    service.stop().await;
    db.close().await;
    info!("Indexer shutdown gracefully");
    Ok(())
}
