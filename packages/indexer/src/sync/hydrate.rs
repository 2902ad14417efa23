use tracing::{debug, warn};

use crate::chain::{ChainError, GuardedChain};
use crate::models::Record;

/// Keep an auxiliary value, or log and drop it. Cancellation still aborts.
fn auxiliary<T>(id: u64, field: &str, result: Result<T, ChainError>) -> Result<Option<T>, ChainError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ChainError::Cancelled) => Err(ChainError::Cancelled),
        Err(e) => {
            warn!("Record {}: {} unavailable, using default: {}", id, field, e);
            Ok(None)
        }
    }
}

/// Fetch the full field set for one id.
///
/// The core struct is mandatory. Score, weight and owner are fetched
/// concurrently and each falls back independently.
pub async fn hydrate_record(chain: &GuardedChain, id: u64) -> Result<Record, ChainError> {
    debug!("Hydrating record {}", id);
    let core = chain.get_record(id).await?;

    let (score, weight, owner) = tokio::join!(
        chain.get_score(id),
        chain.get_weight(id),
        chain.get_owner(id),
    );

    let score = auxiliary(id, "score", score)?.unwrap_or(0.0);
    let weight = auxiliary(id, "weight", weight)?.unwrap_or(0.0);
    let owner = auxiliary(id, "owner", owner)?;

    Ok(core.into_record(id, owner, score, weight))
}
