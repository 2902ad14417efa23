use thiserror::Error;

use crate::chain::ChainError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Another sync operation is already running")]
    Busy,

    #[error("Record {0} not found")]
    RecordNotFound(u64),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Chain(ChainError::Cancelled))
    }
}

/// Failure surfaced to the serving layer, distinct from an empty result
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),
}

impl From<anyhow::Error> for QueryError {
    fn from(e: anyhow::Error) -> Self {
        Self::IndexUnavailable(format!("{:#}", e))
    }
}
