//! Startup reconciliation: rebuild the live index from the durable store.
//!
//! The index is hot state and may be empty or stale after a crash; the store
//! wins. Scanning only `created` rows re-establishes the invariant that each
//! active alert has exactly one index entry, and `add`'s idempotency makes
//! the pass safe to repeat.

use crate::errors::Result;
use crate::index::PriceIndex;
use crate::store::AlertRepo;

const SCAN_BATCH: i64 = 500;

/// Re-add every `created` alert to the index. Returns how many were restored.
pub async fn rebuild_live_index(
    repo: &dyn AlertRepo,
    index: &dyn PriceIndex,
) -> Result<usize> {
    let mut offset = 0i64;
    let mut restored = 0usize;

    loop {
        let batch = repo.list_created_alerts(SCAN_BATCH, offset).await?;
        if batch.is_empty() {
            break;
        }

        let fetched = batch.len() as i64;
        for alert in batch {
            index
                .add(alert.id, alert.symbol, alert.target_price, alert.direction)
                .await?;
            restored += 1;
        }

        if fetched < SCAN_BATCH {
            break;
        }
        offset += fetched;
    }

    Ok(restored)
}
