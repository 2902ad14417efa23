use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bootstrap::Bootstrapper;
use super::events::{EventSyncer, SyncReport};
use super::hydrate::hydrate_record;
use super::poller::Poller;
use super::refresh::{RefreshReport, ScoreRefresher};
use super::{QueryError, SyncError, SyncSettings, SyncStatus};
use crate::chain::{ChainReader, GuardedChain};
use crate::db::Database;
use crate::models::{Record, RecordPage, RecordQuery};

/// Owns the sync engine and the read surface handed to the serving layer.
///
/// All writers share one lock: timer ticks skip while it is held, on-demand
/// operations either wait for it or report [`SyncError::Busy`].
pub struct IndexerService {
    db: Arc<Database>,
    chain: GuardedChain,
    settings: SyncSettings,
    syncer: Arc<EventSyncer>,
    refresher: Arc<ScoreRefresher>,
    bootstrapper: Bootstrapper,
    sync_lock: Arc<Mutex<()>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexerService {
    pub fn new(settings: SyncSettings, reader: Arc<dyn ChainReader>, db: Arc<Database>) -> Self {
        let cancel = CancellationToken::new();
        let chain = GuardedChain::new(reader, cancel.clone(), settings.rpc_timeout);

        Self {
            syncer: Arc::new(EventSyncer::new(chain.clone(), db.clone(), &settings)),
            refresher: Arc::new(ScoreRefresher::new(chain.clone(), db.clone(), &settings)),
            bootstrapper: Bootstrapper::new(chain.clone(), db.clone(), &settings),
            db,
            chain,
            settings,
            sync_lock: Arc::new(Mutex::new(())),
            cancel,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bootstrap an empty store, then catch up to the chain head.
    ///
    /// Only cancellation is returned as an error; bootstrap failures are logged
    /// and the event scan still runs.
    pub async fn init(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.sync_lock.lock().await;
        info!("Initializing indexer");

        match self.bootstrapper.run().await {
            Ok(outcome) => info!("Bootstrap finished: {:?}", outcome),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => error!("Bootstrap failed, continuing with event sync: {}", e),
        }

        let report = self.syncer.sync_to_head().await;
        if self.chain.is_cancelled() {
            return Err(SyncError::Chain(crate::chain::ChainError::Cancelled));
        }
        info!(
            "Initial sync done: {} new records, watermark {:?}",
            report.added, report.watermark
        );
        Ok(report)
    }

    /// Spawn the poller and, when configured, the score refresh loop
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("Indexer already started");
            return;
        }

        let poller = Poller::new(
            self.syncer.clone(),
            self.sync_lock.clone(),
            self.settings.poll_interval,
            self.cancel.clone(),
        );
        tasks.push(tokio::spawn(poller.run()));

        if let Some(every) = self.settings.score_refresh_interval {
            tasks.push(tokio::spawn(refresh_loop(
                self.refresher.clone(),
                self.sync_lock.clone(),
                every,
                self.cancel.clone(),
            )));
        }
        info!("Indexer started with {} background tasks", tasks.len());
    }

    /// Cancel in-flight chain calls and wait for background tasks. Not restartable.
    pub async fn stop(&self) {
        info!("Stopping indexer");
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
        info!("Indexer stopped");
    }

    /// Run one sync to head now, waiting for any running operation
    pub async fn sync_now(&self) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        self.syncer.sync_to_head().await
    }

    /// Rescan `[confirmed + 1, watermark]`, the blocks passed over under the liveness policy
    pub async fn backfill(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.sync_lock.lock().await;
        let start = self.settings.start_block;
        let confirmed = self.db.get_confirmed_block(start).await?;
        let watermark = self.db.get_watermark(start).await?;

        if confirmed >= watermark {
            debug!("Nothing to backfill, confirmed through {}", confirmed);
            return Ok(SyncReport {
                watermark: Some(watermark),
                confirmed: Some(confirmed),
                ..SyncReport::default()
            });
        }

        info!("Backfilling blocks {}-{}", confirmed + 1, watermark);
        Ok(self.syncer.sync_events(confirmed + 1, watermark).await)
    }

    /// On-demand score pass. Refuses to queue behind another operation.
    pub async fn refresh_scores(&self) -> Result<RefreshReport, SyncError> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            return Err(SyncError::Busy);
        };
        self.refresher.refresh().await
    }

    /// Re-hydrate a single id from the chain and store it, bypassing event detection
    pub async fn reindex_one(&self, id: u64) -> Result<Record, SyncError> {
        let _guard = self.sync_lock.lock().await;
        info!("Reindexing record {}", id);

        let record = hydrate_record(&self.chain, id).await?;
        self.db.upsert_record(&record).await?;
        self.db
            .get_record(id)
            .await?
            .ok_or(SyncError::RecordNotFound(id))
    }

    pub async fn query_records(&self, query: &RecordQuery) -> Result<RecordPage, QueryError> {
        Ok(self.db.query_records(query).await?)
    }

    /// Every public record, hidden ids excluded
    pub async fn get_all_records(&self) -> Result<Vec<Record>, QueryError> {
        Ok(self.db.get_all_records(true).await?)
    }

    pub async fn get_count(&self) -> Result<u64, QueryError> {
        Ok(self.db.count_records().await?)
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, QueryError> {
        let start = self.settings.start_block;
        Ok(SyncStatus {
            watermark: self.db.get_watermark(start).await?,
            confirmed: self.db.get_confirmed_block(start).await?,
            records: self.db.count_records().await?,
        })
    }
}

async fn refresh_loop(
    refresher: Arc<ScoreRefresher>,
    lock: Arc<Mutex<()>>,
    every: Duration,
    cancel: CancellationToken,
) {
    info!("Refreshing scores every {}s", every.as_secs_f64());
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Score refresh loop stopped");
                break;
            }
            _ = ticker.tick() => {
                let Ok(_guard) = lock.try_lock() else {
                    debug!("Sync in progress, skipping score refresh");
                    continue;
                };
                match refresher.refresh().await {
                    Ok(report) => debug!("Score refresh: {:?}", report),
                    Err(e) if e.is_cancelled() => break,
                    Err(e) => error!("Score refresh failed: {}", e),
                }
            }
        }
    }
}
