use tracing::info;

pub fn log_config(config: &crate::config::Config) {
    info!(
        "Config settings: registry={}, start_block={}, chunk_size={}, fallback_chunk_size={}, watermark_policy={}",
        config.registry_address,
        config.start_block,
        config.chunk_size,
        config.fallback_chunk_size,
        config.watermark_policy
    );
    info!(
        "Hydration: batch_size={}, delay={}ms, fallback_delay={}ms, rpc_timeout={}s, retries={}x{}ms",
        config.hydrate_batch_size,
        config.hydrate_delay_ms,
        config.fallback_delay_ms,
        config.rpc_timeout_secs,
        config.max_retries,
        config.retry_delay
    );
    info!("Polling every {}s", config.poll_interval_secs);

    if config.score_refresh_interval_secs > 0 {
        info!("Refreshing scores every {}s", config.score_refresh_interval_secs);
    }

    if let Some(path) = &config.snapshot_path {
        info!("Bootstrap snapshot: {}", path.display());
    }

    if !config.hidden_ids.is_empty() {
        info!("Hiding {} record ids from public queries", config.hidden_ids.len());
    }
}
