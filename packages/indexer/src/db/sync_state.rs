use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, instrument, warn};

/// Highest block whose events have been scanned (attempted-through)
pub const WATERMARK_KEY: &str = "lastBlock";
/// Highest block through which every range and every hydration succeeded
pub const CONFIRMED_KEY: &str = "confirmedBlock";

#[instrument(skip(pool))]
pub async fn get_block(pool: &SqlitePool, key: &str) -> Result<Option<u64>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("reading sync state {}", key))?;

    match value {
        Some(raw) => match raw.parse::<u64>() {
            Ok(block) => Ok(Some(block)),
            Err(e) => {
                warn!("Ignoring unparseable sync state {}={:?}: {}", key, raw, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

#[instrument(skip(pool))]
pub async fn set_block(pool: &SqlitePool, key: &str, block: u64) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(block.to_string())
        .execute(pool)
        .await
        .with_context(|| format!("writing sync state {}={}", key, block))?;
    debug!("Sync state {} set to {}", key, block);
    Ok(())
}
