use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{SyncError, SyncSettings};
use crate::chain::{ChainError, GuardedChain};
use crate::db::Database;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RefreshReport {
    pub scanned: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Re-reads score and weight for every stored id.
///
/// These values change on-chain without a new creation event, so the event
/// scan never picks them up.
pub struct ScoreRefresher {
    chain: GuardedChain,
    db: Arc<Database>,
    group: usize,
    pause: Duration,
}

/// A fetched value worth writing: positive and actually returned
fn meaningful(id: u64, field: &str, result: Result<f64, ChainError>) -> Result<Option<f64>, ChainError> {
    match result {
        Ok(value) if value > 0.0 => Ok(Some(value)),
        Ok(_) => Ok(None),
        Err(ChainError::Cancelled) => Err(ChainError::Cancelled),
        Err(e) => {
            debug!("Record {}: {} refresh failed: {}", id, field, e);
            Ok(None)
        }
    }
}

impl ScoreRefresher {
    pub fn new(chain: GuardedChain, db: Arc<Database>, settings: &SyncSettings) -> Self {
        Self {
            chain,
            db,
            group: settings.hydrate_batch_size.max(1),
            pause: settings.hydrate_delay,
        }
    }

    pub async fn refresh(&self) -> Result<RefreshReport, SyncError> {
        let ids = self.db.list_record_ids().await?;
        info!("Refreshing scores for {} records", ids.len());

        let mut report = RefreshReport::default();
        for (i, id) in ids.into_iter().enumerate() {
            if i > 0 && i % self.group == 0 && !self.pause.is_zero() {
                sleep(self.pause).await;
            }
            report.scanned += 1;

            let (score, weight) = tokio::join!(self.chain.get_score(id), self.chain.get_weight(id));
            let score = meaningful(id, "score", score)?;
            let weight = meaningful(id, "weight", weight)?;
            if score.is_none() && weight.is_none() {
                continue;
            }

            match self.db.update_scores(id, score, weight).await {
                Ok(true) => report.updated += 1,
                Ok(false) => debug!("Record {} disappeared during refresh", id),
                Err(e) => {
                    warn!("Failed to store refreshed scores for record {}: {:#}", id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Score refresh done: {} of {} records updated",
            report.updated, report.scanned
        );
        Ok(report)
    }
}
