//! Scripted [`ChainReader`] for tests.

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ChainError, ChainReader, EventLog};
use crate::models::ChainRecord;

#[derive(Default)]
pub struct MockChain {
    head: AtomicU64,
    latency: Duration,
    events: Mutex<Vec<(u64, u64)>>,
    records: Mutex<HashMap<u64, ChainRecord>>,
    scores: Mutex<HashMap<u64, (f64, f64)>>,
    total: Mutex<Option<u64>>,
    failing_log_ranges: Mutex<Vec<(u64, u64)>>,
    failing_records: Mutex<HashSet<u64>>,
    failing_aux: Mutex<HashSet<u64>>,
    malformed_blocks: Mutex<HashSet<u64>>,
    pub log_calls: AtomicUsize,
    pub record_calls: AtomicUsize,
    pub aux_calls: AtomicUsize,
    pub other_calls: AtomicUsize,
}

pub fn chain_record(name: &str) -> ChainRecord {
    ChainRecord {
        display_name: name.to_string(),
        subject_address: format!("0xsubject-{}", name.to_lowercase()),
        category: "eliza".to_string(),
        verified: false,
        locked: false,
        origin_code: 0,
        created_at: 1_700_000_000,
    }
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Creation event for `id` at `block`, plus a hydratable record
    pub fn with_event(self, block: u64, id: u64, name: &str) -> Self {
        self.events.lock().unwrap().push((block, id));
        self.with_record(id, name)
    }

    pub fn with_record(self, id: u64, name: &str) -> Self {
        self.records.lock().unwrap().insert(id, chain_record(name));
        self
    }

    pub fn with_scores(self, id: u64, score: f64, weight: f64) -> Self {
        self.scores.lock().unwrap().insert(id, (score, weight));
        self
    }

    pub fn with_total(self, total: u64) -> Self {
        *self.total.lock().unwrap() = Some(total);
        self
    }

    /// `getLogs` fails for any request overlapping `[from, to]`
    pub fn failing_logs(self, from: u64, to: u64) -> Self {
        self.failing_log_ranges.lock().unwrap().push((from, to));
        self
    }

    pub fn failing_record(self, id: u64) -> Self {
        self.failing_records.lock().unwrap().insert(id);
        self
    }

    pub fn failing_aux(self, id: u64) -> Self {
        self.failing_aux.lock().unwrap().insert(id);
        self
    }

    /// Logs at `block` come back without the id topic
    pub fn malformed_log_at(self, block: u64) -> Self {
        self.malformed_blocks.lock().unwrap().insert(block);
        self
    }

    /// Drop every scripted `getLogs` failure
    pub fn heal(&self) {
        self.failing_log_ranges.lock().unwrap().clear();
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn add_event(&self, block: u64, id: u64, name: &str) {
        self.events.lock().unwrap().push((block, id));
        self.records.lock().unwrap().insert(id, chain_record(name));
    }

    pub fn set_scores(&self, id: u64, score: f64, weight: f64) {
        self.scores.lock().unwrap().insert(id, (score, weight));
    }

    pub fn total_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
            + self.record_calls.load(Ordering::SeqCst)
            + self.aux_calls.load(Ordering::SeqCst)
            + self.other_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn aux(&self, id: u64) -> Result<(f64, f64), ChainError> {
        self.aux_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_aux.lock().unwrap().contains(&id) {
            return Err(ChainError::Provider(format!("aux call for {} reverted", id)));
        }
        Ok(self.scores.lock().unwrap().get(&id).copied().unwrap_or((0.0, 0.0)))
    }
}

fn id_topic(id: u64) -> H256 {
    let mut bytes = [0u8; 32];
    U256::from(id).to_big_endian(&mut bytes);
    H256::from(bytes)
}

#[async_trait]
impl ChainReader for MockChain {
    async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.delay().await;
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(
        &self,
        _address: Address,
        topic: H256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventLog>, ChainError> {
        self.delay().await;
        self.log_calls.fetch_add(1, Ordering::SeqCst);

        let overlaps = self
            .failing_log_ranges
            .lock()
            .unwrap()
            .iter()
            .any(|(bad_from, bad_to)| from_block <= *bad_to && *bad_from <= to_block);
        if overlaps {
            return Err(ChainError::Provider(format!(
                "query returned more than 10000 results ({}-{})",
                from_block, to_block
            )));
        }

        let malformed = self.malformed_blocks.lock().unwrap().clone();
        let mut events: Vec<(u64, u64)> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|(block, _)| (from_block..=to_block).contains(block))
            .collect();
        events.sort();

        Ok(events
            .into_iter()
            .map(|(block, id)| EventLog {
                block_number: Some(block),
                topics: if malformed.contains(&block) {
                    vec![topic]
                } else {
                    vec![topic, id_topic(id)]
                },
            })
            .collect())
    }

    async fn get_record(&self, id: u64) -> Result<ChainRecord, ChainError> {
        self.delay().await;
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_records.lock().unwrap().contains(&id) {
            return Err(ChainError::Provider(format!("getAgent({}) reverted", id)));
        }
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ChainError::Provider(format!("no record {}", id)))
    }

    async fn get_score(&self, id: u64) -> Result<f64, ChainError> {
        self.delay().await;
        self.aux(id).map(|(score, _)| score)
    }

    async fn get_weight(&self, id: u64) -> Result<f64, ChainError> {
        self.delay().await;
        self.aux(id).map(|(_, weight)| weight)
    }

    async fn get_owner(&self, id: u64) -> Result<String, ChainError> {
        self.delay().await;
        self.aux_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_aux.lock().unwrap().contains(&id) {
            return Err(ChainError::Provider(format!("ownerOf({}) reverted", id)));
        }
        Ok(format!("0xowner-{}", id))
    }

    async fn get_total_count(&self) -> Result<u64, ChainError> {
        self.delay().await;
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        let explicit = *self.total.lock().unwrap();
        Ok(explicit.unwrap_or_else(|| self.records.lock().unwrap().len() as u64))
    }
}
