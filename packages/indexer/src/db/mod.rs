use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::models::{Record, RecordPage, RecordQuery, DEFAULT_LIMIT_CAP};

mod migrations;
mod records;
mod sync_state;

pub use sync_state::{CONFIRMED_KEY, WATERMARK_KEY};

/// Store-level settings injected at construction
#[derive(Clone, Debug)]
pub struct StoreSettings {
    /// Ids kept in storage but excluded from public listings
    pub hidden_ids: BTreeSet<u64>,
    pub limit_cap: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            hidden_ids: BTreeSet::new(),
            limit_cap: DEFAULT_LIMIT_CAP,
        }
    }
}

/// File path behind a `sqlite:` url, `None` for in-memory databases
fn database_path(database_url: &str) -> Option<PathBuf> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// SQLite-backed record store and sync-state table.
///
/// The file database runs in WAL mode so API reads proceed while a sync
/// transaction is open.
pub struct Database {
    pool: SqlitePool,
    settings: StoreSettings,
    last_stamp: AtomicI64,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = database_path(database_url).as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool))
    }

    /// Open an in-memory store on a single long-lived connection, useful for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            settings: StoreSettings::default(),
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        info!(
            "Store settings: {} hidden ids, limit cap {}",
            settings.hidden_ids.len(),
            settings.limit_cap
        );
        self.settings = settings;
        self
    }

    pub async fn migrate(self) -> Result<Self> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        let latest = records::max_last_updated(&self.pool).await?;
        self.last_stamp.store(latest, Ordering::SeqCst);
        Ok(self)
    }

    pub fn hidden_ids(&self) -> &BTreeSet<u64> {
        &self.settings.hidden_ids
    }

    /// Next write stamp in milliseconds, strictly greater than every stamp handed out before
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(current + 1);
            match self
                .last_stamp
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub async fn upsert_record(&self, record: &Record) -> Result<()> {
        records::save_record(&self.pool, record, self.next_stamp()).await
    }

    /// All-or-nothing write of a batch
    pub async fn upsert_records(&self, batch: &[Record]) -> Result<()> {
        records::save_records(&self.pool, batch, || self.next_stamp()).await
    }

    pub async fn record_exists(&self, id: u64) -> Result<bool> {
        records::record_exists(&self.pool, id).await
    }

    /// Direct lookup, ignores the hidden set
    pub async fn get_record(&self, id: u64) -> Result<Option<Record>> {
        records::get_record(&self.pool, id).await
    }

    pub async fn query_records(&self, query: &RecordQuery) -> Result<RecordPage> {
        records::query_records(&self.pool, query, &self.settings.hidden_ids, self.settings.limit_cap).await
    }

    pub async fn get_all_records(&self, exclude_hidden: bool) -> Result<Vec<Record>> {
        let none = BTreeSet::new();
        let hidden = if exclude_hidden { &self.settings.hidden_ids } else { &none };
        records::get_all_records(&self.pool, hidden).await
    }

    /// Raw row count, ignoring every filter
    pub async fn count_records(&self) -> Result<u64> {
        records::count_records(&self.pool).await
    }

    pub async fn list_record_ids(&self) -> Result<Vec<u64>> {
        records::list_record_ids(&self.pool).await
    }

    pub async fn update_scores(&self, id: u64, score: Option<f64>, weight: Option<f64>) -> Result<bool> {
        records::update_scores(&self.pool, id, score, weight, self.next_stamp()).await
    }

    /// Watermark, or `default_block` when it was never written
    pub async fn get_watermark(&self, default_block: u64) -> Result<u64> {
        Ok(sync_state::get_block(&self.pool, WATERMARK_KEY)
            .await?
            .unwrap_or(default_block))
    }

    pub async fn set_watermark(&self, block: u64) -> Result<()> {
        sync_state::set_block(&self.pool, WATERMARK_KEY, block).await
    }

    pub async fn get_confirmed_block(&self, default_block: u64) -> Result<u64> {
        Ok(sync_state::get_block(&self.pool, CONFIRMED_KEY)
            .await?
            .unwrap_or(default_block))
    }

    pub async fn set_confirmed_block(&self, block: u64) -> Result<()> {
        sync_state::set_block(&self.pool, CONFIRMED_KEY, block).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run raw SQL against the pool, for shaping schemas in tests
    #[cfg(test)]
    pub(crate) async fn execute_for_tests(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}
