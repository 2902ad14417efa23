use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use futures::future::join_all;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::hydrate::hydrate_record;
use super::scan::{partition, RangeOutcome, ScanLevel};
use super::{SyncError, SyncSettings, WatermarkPolicy};
use crate::chain::{ChainError, EventLog, GuardedChain};
use crate::db::Database;
use crate::models::Record;
use crate::utils::retry::with_retry;
use crate::utils::time::{format_duration, format_rate};

/// Summary of one sync run, for caller-side logging
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncReport {
    /// Records inserted for ids not previously stored
    pub added: usize,
    pub chunks: usize,
    /// Ranges whose logs could not be fetched even at the smallest chunk size
    pub failed_ranges: Vec<(u64, u64)>,
    pub watermark: Option<u64>,
    pub confirmed: Option<u64>,
}

#[derive(Debug, Default)]
struct ChunkReport {
    added: usize,
    missed: usize,
}

/// Pull the record id out of the first indexed topic
pub fn decode_record_id(log: &EventLog) -> Result<u64, SyncError> {
    let topic = log.topics.get(1).ok_or_else(|| {
        SyncError::Decode(format!("log has {} topics, expected an id topic", log.topics.len()))
    })?;
    let value = U256::from_big_endian(topic.as_bytes());
    if value > U256::from(u64::MAX) {
        return Err(SyncError::Decode(format!("id topic 0x{} exceeds u64", hex::encode(topic))));
    }
    Ok(value.as_u64())
}

/// Scans registry creation events and writes newly seen records
pub struct EventSyncer {
    chain: GuardedChain,
    db: Arc<Database>,
    registry: Address,
    event_topic: H256,
    levels: Vec<ScanLevel>,
    start_block: u64,
    policy: WatermarkPolicy,
    retry_delay: u64,
    max_retries: u32,
}

impl EventSyncer {
    pub fn new(chain: GuardedChain, db: Arc<Database>, settings: &SyncSettings) -> Self {
        Self {
            chain,
            db,
            registry: settings.registry,
            event_topic: settings.event_topic,
            levels: settings.scan_levels(),
            start_block: settings.start_block,
            policy: settings.watermark_policy,
            retry_delay: settings.retry_delay,
            max_retries: settings.max_retries,
        }
    }

    /// Sync `[watermark + 1, chain head]`. A no-op when already at the head.
    pub async fn sync_to_head(&self) -> SyncReport {
        let watermark = match self.db.get_watermark(self.start_block).await {
            Ok(block) => block,
            Err(e) => {
                error!("Failed to read watermark: {:#}", e);
                return SyncReport::default();
            }
        };

        let head = match with_retry(
            || self.chain.get_block_number(),
            self.retry_delay,
            self.max_retries,
            "get_block_number",
            |e: &ChainError| !matches!(e, ChainError::Cancelled),
        )
        .await
        {
            Ok(head) => head,
            Err(e) => {
                error!("Failed to get chain head: {}", e);
                return SyncReport {
                    watermark: Some(watermark),
                    ..SyncReport::default()
                };
            }
        };

        // Completeness resumes from the first unconfirmed block, even if the
        // watermark was pushed past a gap under a previous liveness run
        let resume = match self.policy {
            WatermarkPolicy::Liveness => watermark,
            WatermarkPolicy::Completeness => match self.db.get_confirmed_block(self.start_block).await {
                Ok(confirmed) => confirmed.min(watermark),
                Err(e) => {
                    error!("Failed to read confirmed block: {:#}", e);
                    return SyncReport {
                        watermark: Some(watermark),
                        ..SyncReport::default()
                    };
                }
            },
        };

        if head <= resume {
            debug!("Already synced to chain head {} (watermark {})", head, watermark);
            return SyncReport {
                watermark: Some(watermark),
                ..SyncReport::default()
            };
        }

        info!(
            "Syncing blocks {} -> {} ({} blocks)",
            resume + 1,
            head,
            head - resume
        );
        self.sync_events(resume + 1, head).await
    }

    /// Index every creation event in `[from, to]`.
    ///
    /// Errors never escape: each top-level chunk is retried in smaller pieces,
    /// leftovers are logged, and the watermark moves on per the configured policy.
    pub async fn sync_events(&self, from: u64, to: u64) -> SyncReport {
        let mut report = SyncReport::default();
        if from > to {
            return report;
        }
        let Some(top) = self.levels.first() else {
            error!("No scan levels configured");
            return report;
        };

        let mut watermark = match self.db.get_watermark(self.start_block).await {
            Ok(block) => block,
            Err(e) => {
                error!("Failed to read watermark before syncing {}-{}: {:#}", from, to, e);
                return report;
            }
        };
        let mut confirmed = match self.db.get_confirmed_block(self.start_block).await {
            Ok(block) => block,
            Err(e) => {
                error!("Failed to read confirmed block before syncing {}-{}: {:#}", from, to, e);
                return report;
            }
        };

        let started = Instant::now();
        for (start, end) in partition(from, to, top.chunk_size) {
            if self.chain.is_cancelled() {
                info!("Sync cancelled before blocks {}-{}", start, end);
                break;
            }

            let outcome = self.scan_with_fallback(start, end).await;
            report.chunks += 1;
            report.added += outcome.added;
            report.failed_ranges.extend(outcome.failed.iter().copied());

            if outcome.cancelled {
                warn!(
                    "Sync cancelled inside blocks {}-{}, watermark stays at {}",
                    start, end, watermark
                );
                break;
            }

            if outcome.is_complete() && confirmed.saturating_add(1) >= start && end > confirmed {
                match self.db.set_confirmed_block(end).await {
                    Ok(()) => confirmed = end,
                    Err(e) => error!("Failed to record confirmed block {}: {:#}", end, e),
                }
            } else if !outcome.is_complete() {
                warn!(
                    "Blocks {}-{} incomplete: {} failed ranges, {} unhydrated ids",
                    start,
                    end,
                    outcome.failed.len(),
                    outcome.missed
                );
            }

            let target = match self.policy {
                WatermarkPolicy::Liveness => end,
                WatermarkPolicy::Completeness => confirmed,
            };
            if target > watermark {
                match self.db.set_watermark(target).await {
                    Ok(()) => watermark = target,
                    Err(e) => error!("Failed to advance watermark to {}: {:#}", target, e),
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let blocks = (to - from + 1) as f64;
        info!(
            "Synced blocks {}-{} in {}: {} new records, {} failed ranges, {}",
            from,
            to,
            format_duration(elapsed),
            report.added,
            report.failed_ranges.len(),
            if elapsed > 0.0 {
                format_rate(blocks / elapsed)
            } else {
                "instant".to_string()
            }
        );

        report.watermark = Some(watermark);
        report.confirmed = Some(confirmed);
        report
    }

    /// Scan one top-level range, stepping down the level ladder for pieces that fail
    async fn scan_with_fallback(&self, start: u64, end: u64) -> RangeOutcome {
        let mut outcome = RangeOutcome::default();
        let mut pending = VecDeque::from([(start, end, 0usize)]);

        while let Some((from, to, depth)) = pending.pop_front() {
            let level = &self.levels[depth];
            if depth > 0 && !level.pause.is_zero() {
                sleep(level.pause).await;
            }

            match self.scan_once(from, to, level).await {
                Ok(chunk) => {
                    outcome.added += chunk.added;
                    outcome.missed += chunk.missed;
                }
                Err(e) if e.is_cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                Err(e) => match self.levels.get(depth + 1) {
                    Some(next) => {
                        warn!(
                            "Error scanning blocks {}-{}: {}. Retrying in chunks of {}",
                            from, to, e, next.chunk_size
                        );
                        for (i, (sub_from, sub_to)) in
                            partition(from, to, next.chunk_size).into_iter().enumerate()
                        {
                            pending.insert(i, (sub_from, sub_to, depth + 1));
                        }
                    }
                    None => {
                        error!("Retry failed for blocks {}-{}: {}", from, to, e);
                        outcome.failed.push((from, to));
                    }
                },
            }
        }

        outcome
    }

    async fn scan_once(&self, from: u64, to: u64, level: &ScanLevel) -> Result<ChunkReport, SyncError> {
        let logs = self
            .chain
            .get_logs(self.registry, self.event_topic, from, to)
            .await?;
        if logs.is_empty() {
            debug!("No events in blocks {}-{}", from, to);
            return Ok(ChunkReport::default());
        }
        info!("Found {} events in blocks {}-{}", logs.len(), from, to);

        let ids = self.unseen_ids(&logs).await?;
        let (records, missed) = self.hydrate_ids(&ids, level).await?;
        self.db.upsert_records(&records).await?;

        Ok(ChunkReport {
            added: records.len(),
            missed,
        })
    }

    /// Ids in `logs` that are not stored yet, in log order
    async fn unseen_ids(&self, logs: &[EventLog]) -> Result<Vec<u64>, SyncError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();

        for log in logs {
            let id = match decode_record_id(log) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping log in block {:?}: {}", log.block_number, e);
                    continue;
                }
            };
            if !seen.insert(id) {
                continue;
            }
            if self.db.record_exists(id).await? {
                debug!("Record {} already indexed", id);
                continue;
            }
            ids.push(id);
        }

        Ok(ids)
    }

    /// Hydrate in groups of `level.hydrate_group`, pausing between groups
    async fn hydrate_ids(&self, ids: &[u64], level: &ScanLevel) -> Result<(Vec<Record>, usize), SyncError> {
        let mut records = Vec::with_capacity(ids.len());
        let mut missed = 0;

        for (i, group) in ids.chunks(level.hydrate_group.max(1)).enumerate() {
            if i > 0 && !level.pause.is_zero() {
                sleep(level.pause).await;
            }

            let results = join_all(group.iter().map(|id| hydrate_record(&self.chain, *id))).await;
            for (id, result) in group.iter().zip(results) {
                match result {
                    Ok(record) => records.push(record),
                    Err(ChainError::Cancelled) => return Err(ChainError::Cancelled.into()),
                    Err(e) => {
                        error!("Failed to hydrate record {}: {}", id, e);
                        missed += 1;
                    }
                }
            }
        }

        Ok((records, missed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn store() -> Arc<Database> {
        Arc::new(Database::in_memory().await.unwrap().migrate().await.unwrap())
    }

    fn syncer(mock: Arc<MockChain>, db: Arc<Database>, settings: SyncSettings) -> EventSyncer {
        let chain = GuardedChain::new(mock, CancellationToken::new(), Duration::from_secs(5));
        EventSyncer::new(chain, db, &settings)
    }

    fn three_events() -> MockChain {
        MockChain::new(300)
            .with_event(100, 7, "Nova")
            .with_event(150, 8, "Orion")
            .with_event(220, 9, "Vega")
    }

    #[tokio::test]
    async fn indexes_events_across_chunks() {
        let db = store().await;
        let sync = syncer(Arc::new(three_events()), db.clone(), SyncSettings::for_tests());

        let report = sync.sync_events(1, 300).await;

        assert_eq!(report.added, 3);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.watermark, Some(300));
        let ids: Vec<u64> = db.get_all_records(true).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
        for record in db.get_all_records(true).await.unwrap() {
            assert!(record.last_updated > 0);
        }
        assert_eq!(db.get_watermark(0).await.unwrap(), 300);
        assert_eq!(db.get_confirmed_block(0).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn rerunning_a_synced_range_changes_nothing() {
        let db = store().await;
        let mock = Arc::new(three_events());
        let sync = syncer(mock.clone(), db.clone(), SyncSettings::for_tests());

        sync.sync_events(1, 300).await;
        let before = db.get_all_records(false).await.unwrap();
        let hydrations = mock.record_calls.load(Ordering::SeqCst);

        let report = sync.sync_events(1, 300).await;

        assert_eq!(report.added, 0);
        assert_eq!(db.get_all_records(false).await.unwrap(), before);
        assert_eq!(mock.record_calls.load(Ordering::SeqCst), hydrations);
    }

    #[tokio::test]
    async fn failing_sub_range_is_skipped_and_watermark_advances() {
        let db = store().await;
        let mock = MockChain::new(1000)
            .with_event(100, 1, "Alpha")
            .with_event(425, 2, "Bravo")
            .with_event(700, 3, "Charlie")
            .failing_logs(420, 430);
        let settings = SyncSettings {
            chunk_size: 1000,
            fallback_chunk_size: 200,
            ..SyncSettings::for_tests()
        };
        let sync = syncer(Arc::new(mock), db.clone(), settings);

        let report = sync.sync_events(1, 1000).await;

        assert_eq!(report.added, 2);
        assert_eq!(report.failed_ranges, vec![(401, 600)]);
        assert!(db.get_record(1).await.unwrap().is_some());
        assert!(db.get_record(2).await.unwrap().is_none());
        assert!(db.get_record(3).await.unwrap().is_some());
        assert_eq!(db.get_watermark(0).await.unwrap(), 1000);
        // The gap keeps the confirmed pointer behind
        assert_eq!(db.get_confirmed_block(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn completeness_policy_holds_watermark_at_first_gap() {
        let db = store().await;
        let mock = Arc::new(
            MockChain::new(1500)
                .with_event(100, 1, "Alpha")
                .with_event(625, 2, "Bravo")
                .with_event(1200, 3, "Charlie")
                .failing_logs(620, 630),
        );
        let settings = SyncSettings {
            chunk_size: 500,
            fallback_chunk_size: 100,
            watermark_policy: WatermarkPolicy::Completeness,
            ..SyncSettings::for_tests()
        };
        let sync = syncer(mock.clone(), db.clone(), settings);

        let report = sync.sync_to_head().await;
        assert_eq!(report.added, 2);
        assert_eq!(report.watermark, Some(500));
        assert_eq!(db.get_watermark(0).await.unwrap(), 500);

        // Provider recovers: the next run rescans from the gap
        mock.heal();
        let report = sync.sync_to_head().await;
        assert_eq!(report.added, 1);
        assert!(db.get_record(2).await.unwrap().is_some());
        assert_eq!(db.get_watermark(0).await.unwrap(), 1500);
        assert_eq!(db.get_confirmed_block(0).await.unwrap(), 1500);
    }

    #[tokio::test]
    async fn completeness_rescans_gap_left_by_liveness_run() {
        let db = store().await;
        db.set_watermark(500).await.unwrap();
        db.set_confirmed_block(100).await.unwrap();
        let mock = Arc::new(
            MockChain::new(1000)
                .with_event(300, 1, "Alpha")
                .with_event(700, 2, "Bravo"),
        );
        let settings = SyncSettings {
            chunk_size: 500,
            fallback_chunk_size: 100,
            watermark_policy: WatermarkPolicy::Completeness,
            ..SyncSettings::for_tests()
        };
        let sync = syncer(mock.clone(), db.clone(), settings);

        let report = sync.sync_to_head().await;

        assert_eq!(report.added, 2);
        assert!(db.get_record(1).await.unwrap().is_some());
        assert_eq!(db.get_watermark(0).await.unwrap(), 1000);
        assert_eq!(db.get_confirmed_block(0).await.unwrap(), 1000);

        let log_calls = mock.log_calls.load(Ordering::SeqCst);
        assert_eq!(sync.sync_to_head().await.added, 0);
        assert_eq!(mock.log_calls.load(Ordering::SeqCst), log_calls);
    }

    #[tokio::test]
    async fn failed_batch_write_marks_range_failed_without_partial_rows() {
        let db = store().await;
        db.execute_for_tests(
            "CREATE TRIGGER reject_orion BEFORE INSERT ON records WHEN NEW.display_name = 'Orion' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .await
        .unwrap();
        let mock = three_events().with_event(145, 11, "Lyra");
        let sync = syncer(Arc::new(mock), db.clone(), SyncSettings::for_tests());

        let report = sync.sync_events(1, 300).await;

        // Lyra shares the rejected batch, so it is rolled back with Orion
        assert_eq!(report.failed_ranges, vec![(141, 160)]);
        assert_eq!(report.added, 2);
        assert!(db.get_record(11).await.unwrap().is_none());
        assert!(db.get_record(8).await.unwrap().is_none());
        assert!(db.get_record(7).await.unwrap().is_some());
        assert!(db.get_record(9).await.unwrap().is_some());
        assert_eq!(report.confirmed, Some(100));
        assert_eq!(db.get_watermark(0).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let db = store().await;
        let sync = syncer(Arc::new(three_events()), db.clone(), SyncSettings::for_tests());
        db.set_watermark(500).await.unwrap();

        let mut seen = vec![db.get_watermark(0).await.unwrap()];
        for (from, to) in [(1, 300), (501, 600), (200, 250)] {
            sync.sync_events(from, to).await;
            seen.push(db.get_watermark(0).await.unwrap());
        }

        assert_eq!(seen, vec![500, 500, 600, 600]);
        assert_eq!(db.count_records().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_logs_are_skipped() {
        let db = store().await;
        let mock = three_events().malformed_log_at(150);
        let sync = syncer(Arc::new(mock), db.clone(), SyncSettings::for_tests());

        let report = sync.sync_events(1, 300).await;

        assert_eq!(report.added, 2);
        assert!(report.failed_ranges.is_empty());
        assert!(db.get_record(8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unhydratable_records_do_not_block_the_chunk() {
        let db = store().await;
        let mock = three_events().failing_record(8);
        let sync = syncer(Arc::new(mock), db.clone(), SyncSettings::for_tests());

        let report = sync.sync_events(1, 300).await;

        assert_eq!(report.added, 2);
        assert_eq!(report.watermark, Some(300));
        // 101-200 lost id 8, so confirmation stops after the first chunk
        assert_eq!(report.confirmed, Some(100));
    }

    #[tokio::test]
    async fn sync_to_head_is_a_noop_at_the_head() {
        let db = store().await;
        let mock = Arc::new(three_events());
        let sync = syncer(mock.clone(), db.clone(), SyncSettings::for_tests());

        assert_eq!(sync.sync_to_head().await.added, 3);
        let log_calls = mock.log_calls.load(Ordering::SeqCst);

        let report = sync.sync_to_head().await;
        assert_eq!(report.added, 0);
        assert_eq!(report.watermark, Some(300));
        assert_eq!(mock.log_calls.load(Ordering::SeqCst), log_calls);

        mock.add_event(320, 10, "Lyra");
        mock.set_head(350);
        let report = sync.sync_to_head().await;
        assert_eq!(report.added, 1);
        assert_eq!(db.get_watermark(0).await.unwrap(), 350);
    }

    #[tokio::test]
    async fn cancelled_sync_leaves_watermark_alone() {
        let db = store().await;
        let cancel = CancellationToken::new();
        let chain = GuardedChain::new(Arc::new(three_events()), cancel.clone(), Duration::from_secs(5));
        let sync = EventSyncer::new(chain, db.clone(), &SyncSettings::for_tests());
        cancel.cancel();

        let report = sync.sync_events(1, 300).await;

        assert_eq!(report.added, 0);
        assert_eq!(db.get_watermark(0).await.unwrap(), 0);
        assert_eq!(db.count_records().await.unwrap(), 0);
    }

    #[test]
    fn decodes_id_from_indexed_topic() {
        let mut id_topic = [0u8; 32];
        id_topic[31] = 42;
        let log = EventLog {
            block_number: Some(1),
            topics: vec![H256::zero(), H256::from(id_topic)],
        };
        assert_eq!(decode_record_id(&log).unwrap(), 42);

        let bare = EventLog {
            block_number: Some(1),
            topics: vec![H256::zero()],
        };
        assert!(matches!(decode_record_id(&bare), Err(SyncError::Decode(_))));

        let huge = EventLog {
            block_number: Some(1),
            topics: vec![H256::zero(), H256::repeat_byte(0xff)],
        };
        assert!(matches!(decode_record_id(&huge), Err(SyncError::Decode(_))));
    }
}
