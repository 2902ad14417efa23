use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::hydrate::hydrate_record;
use super::{SyncError, SyncSettings};
use crate::chain::{ChainError, GuardedChain};
use crate::db::Database;
use crate::models::Record;
use crate::utils::retry::with_retry;

/// Accepted snapshot layouts: a bare array or `{ "records": [...] }`
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    List(Vec<Record>),
    Wrapped { records: Vec<Record> },
}

impl SnapshotFile {
    fn into_records(self) -> Vec<Record> {
        match self {
            SnapshotFile::List(records) | SnapshotFile::Wrapped { records } => records,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BootstrapOutcome {
    /// Store already populated
    Skipped { existing: u64 },
    Snapshot { loaded: usize },
    ChainScan { loaded: usize, skipped: usize },
}

/// One-time population of an empty store
pub struct Bootstrapper {
    chain: GuardedChain,
    db: Arc<Database>,
    snapshot_path: Option<PathBuf>,
    batch_size: usize,
    retry_delay: u64,
    max_retries: u32,
}

impl Bootstrapper {
    pub fn new(chain: GuardedChain, db: Arc<Database>, settings: &SyncSettings) -> Self {
        Self {
            chain,
            db,
            snapshot_path: settings.snapshot_path.clone(),
            batch_size: settings.bootstrap_batch_size.max(1),
            retry_delay: settings.retry_delay,
            max_retries: settings.max_retries,
        }
    }

    pub async fn run(&self) -> Result<BootstrapOutcome, SyncError> {
        let existing = self.db.count_records().await?;
        if existing > 0 {
            info!("Store already has {} records, skipping bootstrap", existing);
            return Ok(BootstrapOutcome::Skipped { existing });
        }

        if let Some(path) = &self.snapshot_path {
            if let Some(records) = load_snapshot(path).await {
                info!("Bootstrapping from snapshot {}: {} records", path.display(), records.len());
                self.db.upsert_records(&records).await?;
                info!("Bootstrapped {} records from snapshot", records.len());
                return Ok(BootstrapOutcome::Snapshot {
                    loaded: records.len(),
                });
            }
        }

        self.scan_chain().await
    }

    /// Hydrate ids `0..total` one by one, flushing every `batch_size` ids
    async fn scan_chain(&self) -> Result<BootstrapOutcome, SyncError> {
        info!("No snapshot available, bootstrapping from registry contract");
        let total = with_retry(
            || self.chain.get_total_count(),
            self.retry_delay,
            self.max_retries,
            "get_total_count",
            |e: &ChainError| !matches!(e, ChainError::Cancelled),
        )
        .await?;
        info!("Total records on-chain: {}", total);

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut loaded = 0;
        let mut skipped = 0;

        for id in 0..total {
            if id > 0 && id % self.batch_size as u64 == 0 {
                info!("Bootstrap loading... {}/{}", id, total);
                loaded += self.flush(&mut batch).await;
            }

            match hydrate_record(&self.chain, id).await {
                Ok(record) => batch.push(record),
                Err(ChainError::Cancelled) => {
                    warn!("Bootstrap cancelled at id {}", id);
                    loaded += self.flush(&mut batch).await;
                    return Err(ChainError::Cancelled.into());
                }
                Err(e) => {
                    warn!("Bootstrap skipping record {}: {}", id, e);
                    skipped += 1;
                }
            }
        }
        loaded += self.flush(&mut batch).await;

        info!("Bootstrap complete: {} records loaded, {} skipped", loaded, skipped);
        Ok(BootstrapOutcome::ChainScan { loaded, skipped })
    }

    /// Write and clear the pending batch. A failed write drops the batch.
    async fn flush(&self, batch: &mut Vec<Record>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let written = match self.db.upsert_records(batch).await {
            Ok(()) => batch.len(),
            Err(e) => {
                error!(
                    "Bootstrap batch write failed for ids {}-{}: {:#}",
                    batch.first().map(|r| r.id).unwrap_or_default(),
                    batch.last().map(|r| r.id).unwrap_or_default(),
                    e
                );
                0
            }
        };
        batch.clear();
        written
    }
}

/// Read the snapshot file. Missing, unreadable, or empty snapshots yield `None`.
async fn load_snapshot(path: &Path) -> Option<Vec<Record>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No snapshot at {}", path.display());
            return None;
        }
        Err(e) => {
            warn!("Failed to read snapshot {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str::<SnapshotFile>(&raw) {
        Ok(snapshot) => {
            let records = snapshot.into_records();
            if records.is_empty() {
                debug!("Snapshot {} is empty", path.display());
                None
            } else {
                Some(records)
            }
        }
        Err(e) => {
            warn!("Ignoring malformed snapshot {}: {}", path.display(), e);
            None
        }
    }
}
