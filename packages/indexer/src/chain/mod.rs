//! Read access to the on-chain registry.
//!
//! [`ChainReader`] is the seam between the sync engine and the RPC provider.
//! [`GuardedChain`] wraps any reader so every call carries a timeout and the
//! service-wide cancellation token.

use async_trait::async_trait;
use ethers::types::{Address, H256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::ChainRecord;

mod ethers_reader;
#[cfg(test)]
pub mod mock;

pub use ethers_reader::{registered_event_topic, EthersChainReader, REGISTERED_EVENT};

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    #[error("RPC call cancelled")]
    Cancelled,

    #[error("ABI decode error: {0}")]
    Decode(String),
}

/// A registry log as returned by `eth_getLogs`, reduced to what the syncer reads
#[derive(Clone, Debug, PartialEq)]
pub struct EventLog {
    pub block_number: Option<u64>,
    pub topics: Vec<H256>,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_block_number(&self) -> Result<u64, ChainError>;

    async fn get_logs(
        &self,
        address: Address,
        topic: H256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventLog>, ChainError>;

    /// Core struct for one id. A failure here means the record cannot be hydrated.
    async fn get_record(&self, id: u64) -> Result<ChainRecord, ChainError>;

    async fn get_score(&self, id: u64) -> Result<f64, ChainError>;

    async fn get_weight(&self, id: u64) -> Result<f64, ChainError>;

    async fn get_owner(&self, id: u64) -> Result<String, ChainError>;

    async fn get_total_count(&self) -> Result<u64, ChainError>;
}

/// Chain access with a per-call deadline and shared cancellation
#[derive(Clone)]
pub struct GuardedChain {
    reader: Arc<dyn ChainReader>,
    cancel: CancellationToken,
    timeout: Duration,
}

impl GuardedChain {
    pub fn new(reader: Arc<dyn ChainReader>, cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            reader,
            cancel,
            timeout,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChainError::Cancelled),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(ChainError::Timeout(self.timeout)),
            },
        }
    }

    pub async fn get_block_number(&self) -> Result<u64, ChainError> {
        self.bounded(self.reader.get_block_number()).await
    }

    pub async fn get_logs(
        &self,
        address: Address,
        topic: H256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EventLog>, ChainError> {
        self.bounded(self.reader.get_logs(address, topic, from_block, to_block))
            .await
    }

    pub async fn get_record(&self, id: u64) -> Result<ChainRecord, ChainError> {
        self.bounded(self.reader.get_record(id)).await
    }

    pub async fn get_score(&self, id: u64) -> Result<f64, ChainError> {
        self.bounded(self.reader.get_score(id)).await
    }

    pub async fn get_weight(&self, id: u64) -> Result<f64, ChainError> {
        self.bounded(self.reader.get_weight(id)).await
    }

    pub async fn get_owner(&self, id: u64) -> Result<String, ChainError> {
        self.bounded(self.reader.get_owner(id)).await
    }

    pub async fn get_total_count(&self) -> Result<u64, ChainError> {
        self.bounded(self.reader.get_total_count()).await
    }
}
