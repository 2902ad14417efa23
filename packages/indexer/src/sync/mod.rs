mod bootstrap;
mod error;
mod events;
mod hydrate;
mod poller;
mod refresh;
mod scan;
mod service;

pub use bootstrap::{BootstrapOutcome, Bootstrapper};
pub use error::{QueryError, SyncError};
pub use events::{decode_record_id, EventSyncer, SyncReport};
pub use hydrate::hydrate_record;
pub use poller::Poller;
pub use refresh::{RefreshReport, ScoreRefresher};
pub use scan::{partition, RangeOutcome, ScanLevel};
pub use service::IndexerService;

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::chain::registered_event_topic;

/// What the watermark means when part of a chunk could not be processed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkPolicy {
    /// Advance past failed ranges so polling always moves forward
    #[default]
    Liveness,
    /// Hold at the confirmed pointer so the next poll rescans the gap
    Completeness,
}

impl FromStr for WatermarkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "liveness" => Ok(Self::Liveness),
            "completeness" => Ok(Self::Completeness),
            other => Err(format!("unknown watermark policy '{}'", other)),
        }
    }
}

impl fmt::Display for WatermarkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Liveness => write!(f, "liveness"),
            Self::Completeness => write!(f, "completeness"),
        }
    }
}

/// Knobs for the sync engine, independent of where they were loaded from
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub registry: Address,
    pub event_topic: H256,
    /// Deployment block, used when no watermark is stored yet
    pub start_block: u64,
    pub chunk_size: u64,
    pub fallback_chunk_size: u64,
    /// Hydrations issued together before pausing
    pub hydrate_batch_size: usize,
    pub hydrate_delay: Duration,
    pub fallback_delay: Duration,
    pub bootstrap_batch_size: usize,
    pub snapshot_path: Option<PathBuf>,
    pub poll_interval: Duration,
    /// `None` disables the timed refresh loop
    pub score_refresh_interval: Option<Duration>,
    pub rpc_timeout: Duration,
    /// Base backoff in milliseconds
    pub retry_delay: u64,
    pub max_retries: u32,
    pub watermark_policy: WatermarkPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            registry: Address::zero(),
            event_topic: registered_event_topic(),
            start_block: 42_254_000,
            chunk_size: 10_000,
            fallback_chunk_size: 2_000,
            hydrate_batch_size: 5,
            hydrate_delay: Duration::from_millis(500),
            fallback_delay: Duration::from_millis(200),
            bootstrap_batch_size: 50,
            snapshot_path: None,
            poll_interval: Duration::from_secs(30),
            score_refresh_interval: None,
            rpc_timeout: Duration::from_secs(20),
            retry_delay: 1000,
            max_retries: 3,
            watermark_policy: WatermarkPolicy::Liveness,
        }
    }
}

impl SyncSettings {
    /// Chunk ladder tried in order. The fallback level hydrates one id at a time.
    pub fn scan_levels(&self) -> Vec<ScanLevel> {
        vec![
            ScanLevel {
                chunk_size: self.chunk_size.max(1),
                hydrate_group: self.hydrate_batch_size.max(1),
                pause: self.hydrate_delay,
            },
            ScanLevel {
                chunk_size: self.fallback_chunk_size.clamp(1, self.chunk_size.max(1)),
                hydrate_group: 1,
                pause: self.fallback_delay,
            },
        ]
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            start_block: 0,
            chunk_size: 100,
            fallback_chunk_size: 20,
            hydrate_delay: Duration::ZERO,
            fallback_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            retry_delay: 0,
            max_retries: 1,
            ..Self::default()
        }
    }
}

/// Progress pointers and size of the local replica
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Attempted-through block
    pub watermark: u64,
    /// Every event through this block is stored
    pub confirmed: u64,
    pub records: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Completeness".parse::<WatermarkPolicy>(), Ok(WatermarkPolicy::Completeness));
        assert_eq!(" liveness ".parse::<WatermarkPolicy>(), Ok(WatermarkPolicy::Liveness));
        assert!("strict".parse::<WatermarkPolicy>().is_err());
    }

    #[test]
    fn fallback_level_never_exceeds_top_level() {
        let settings = SyncSettings {
            chunk_size: 500,
            fallback_chunk_size: 2_000,
            ..SyncSettings::default()
        };
        let levels = settings.scan_levels();
        assert_eq!(levels[0].chunk_size, 500);
        assert_eq!(levels[1].chunk_size, 500);
        assert_eq!(levels[1].hydrate_group, 1);
    }
}
