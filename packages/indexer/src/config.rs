use ::config::builder::{ConfigBuilder, DefaultState};
use ::config::{ConfigError, Environment, File};
use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::db::StoreSettings;
use crate::sync::{SyncSettings, WatermarkPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_provider_url: String,
    pub registry_address: String,
    pub start_block: u64,
    pub chunk_size: u64,
    pub fallback_chunk_size: u64,
    pub hydrate_batch_size: usize,
    pub hydrate_delay_ms: u64,
    pub fallback_delay_ms: u64,
    pub poll_interval_secs: u64,
    /// 0 disables the timed score refresh
    pub score_refresh_interval_secs: u64,
    pub bootstrap_batch_size: usize,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub hidden_ids: Vec<u64>,
    pub query_limit_cap: u32,
    pub rpc_timeout_secs: u64,
    pub retry_delay: u64,
    pub max_retries: u32,
    pub watermark_policy: String,
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    ::config::Config::builder()
        .set_default("database_url", "sqlite://data/registry.db")?
        .set_default("start_block", 42_254_000i64)?
        .set_default("chunk_size", 10_000i64)?
        .set_default("fallback_chunk_size", 2_000i64)?
        .set_default("hydrate_batch_size", 5i64)?
        .set_default("hydrate_delay_ms", 500i64)?
        .set_default("fallback_delay_ms", 200i64)?
        .set_default("poll_interval_secs", 30i64)?
        .set_default("score_refresh_interval_secs", 0i64)?
        .set_default("bootstrap_batch_size", 50i64)?
        .set_default("query_limit_cap", 1000i64)?
        .set_default("rpc_timeout_secs", 20i64)?
        .set_default("retry_delay", 1000i64)? // Default 1 second in ms
        .set_default("max_retries", 3i64)?
        .set_default("watermark_policy", "liveness")
}

impl Config {
    /// Defaults, then the file named by `INDEXER_CONFIG`, then environment variables
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        let _ = dotenv::dotenv();

        let mut builder = defaults().context("Invalid configuration defaults")?;
        if let Ok(path) = env::var("INDEXER_CONFIG") {
            builder = builder.add_source(File::with_name(&path));
        }
        builder = builder.add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("hidden_ids"),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("HTTP_PROVIDER_URL and REGISTRY_ADDRESS must be set, numeric settings must be numbers")?;
        config.to_sync_settings()?;
        Ok(config)
    }

    pub fn to_sync_settings(&self) -> Result<SyncSettings> {
        let registry: Address = self
            .registry_address
            .parse()
            .with_context(|| format!("REGISTRY_ADDRESS '{}' is not an address", self.registry_address))?;
        let watermark_policy: WatermarkPolicy = self
            .watermark_policy
            .parse()
            .map_err(anyhow::Error::msg)
            .context("WATERMARK_POLICY must be 'liveness' or 'completeness'")?;

        Ok(SyncSettings {
            registry,
            start_block: self.start_block,
            chunk_size: self.chunk_size,
            fallback_chunk_size: self.fallback_chunk_size,
            hydrate_batch_size: self.hydrate_batch_size,
            hydrate_delay: Duration::from_millis(self.hydrate_delay_ms),
            fallback_delay: Duration::from_millis(self.fallback_delay_ms),
            bootstrap_batch_size: self.bootstrap_batch_size,
            snapshot_path: self.snapshot_path.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            score_refresh_interval: (self.score_refresh_interval_secs > 0)
                .then(|| Duration::from_secs(self.score_refresh_interval_secs)),
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs.max(1)),
            retry_delay: self.retry_delay,
            max_retries: self.max_retries,
            watermark_policy,
            ..SyncSettings::default()
        })
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            hidden_ids: self.hidden_ids.iter().copied().collect(),
            limit_cap: self.query_limit_cap.max(1),
        }
    }
}
