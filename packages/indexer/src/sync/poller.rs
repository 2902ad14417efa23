use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::events::{EventSyncer, SyncReport};

/// Fixed-interval trigger for [`EventSyncer::sync_to_head`]
pub struct Poller {
    syncer: Arc<EventSyncer>,
    lock: Arc<Mutex<()>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(
        syncer: Arc<EventSyncer>,
        lock: Arc<Mutex<()>>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            syncer,
            lock,
            interval,
            cancel,
        }
    }

    /// Run one sync unless another operation holds the lock
    pub async fn tick(&self) -> Option<SyncReport> {
        let Ok(_guard) = self.lock.try_lock() else {
            debug!("Sync already in progress, skipping poll tick");
            return None;
        };

        let report = self.syncer.sync_to_head().await;
        if report.added > 0 {
            info!(
                "Poll added {} new records (watermark {:?})",
                report.added, report.watermark
            );
        }
        Some(report)
    }

    /// Tick until cancelled. The first tick waits a full interval.
    pub async fn run(self) {
        info!("Polling every {}s", self.interval.as_secs_f64());
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
