//! In-process index with the same contract as the Redis one. Backs the
//! matcher and reconciler tests; a single mutex makes the range-pop atomic.

use super::{bucket_key, PriceIndex};
use crate::errors::{Result, ServiceError};
use crate::models::{Direction, Symbol};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

type Bucket = BTreeMap<Decimal, Vec<i64>>;

#[derive(Default)]
pub struct MemoryIndex {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry count across all buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .lock()
            .values()
            .flat_map(|b| b.values())
            .map(|ids| ids.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_price(price: &str) -> Result<Decimal> {
    Decimal::from_str(price)
        .map_err(|_| ServiceError::validation(format!("unparseable market price: {price}")))
}

#[async_trait]
impl PriceIndex for MemoryIndex {
    async fn add(
        &self,
        alert_id: i64,
        symbol: Symbol,
        target_price: Decimal,
        direction: Direction,
    ) -> Result<()> {
        let key = bucket_key(symbol, direction);
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();

        // Idempotent per id: drop any previous entry before re-inserting.
        for ids in bucket.values_mut() {
            ids.retain(|&id| id != alert_id);
        }
        bucket.retain(|_, ids| !ids.is_empty());
        bucket.entry(target_price).or_default().push(alert_id);
        Ok(())
    }

    async fn pop_crossed(
        &self,
        symbol: Symbol,
        direction: Direction,
        market_price: &str,
    ) -> Result<Vec<i64>> {
        let market = parse_price(market_price)?;
        let key = bucket_key(symbol, direction);
        let mut buckets = self.buckets.lock();

        let Some(bucket) = buckets.get_mut(&key) else {
            return Ok(Vec::new());
        };

        let crossed: Vec<Decimal> = match direction {
            Direction::Above => bucket.range(..=market).map(|(p, _)| *p).collect(),
            Direction::Below => bucket.range(market..).map(|(p, _)| *p).collect(),
        };

        let mut popped = Vec::new();
        for price in crossed {
            if let Some(ids) = bucket.remove(&price) {
                popped.extend(ids);
            }
        }

        Ok(popped)
    }

    async fn remove(&self, alert_id: i64, symbol: Symbol, direction: Direction) -> Result<()> {
        let key = bucket_key(symbol, direction);
        let mut buckets = self.buckets.lock();

        if let Some(bucket) = buckets.get_mut(&key) {
            for ids in bucket.values_mut() {
                ids.retain(|&id| id != alert_id);
            }
            bucket.retain(|_, ids| !ids.is_empty());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_above_pops_targets_at_or_below_market() {
        let index = MemoryIndex::new();
        index.add(1, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();
        index.add(2, Symbol::Btc, dec("99.5"), Direction::Above).await.unwrap();
        index.add(3, Symbol::Btc, dec("100.01"), Direction::Above).await.unwrap();

        let mut popped = index
            .pop_crossed(Symbol::Btc, Direction::Above, "100")
            .await
            .unwrap();
        popped.sort_unstable();

        // Equality counts as a cross; 100.01 stays behind.
        assert_eq!(popped, vec![1, 2]);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_below_pops_targets_at_or_above_market() {
        let index = MemoryIndex::new();
        index.add(1, Symbol::Eth, dec("50"), Direction::Below).await.unwrap();
        index.add(2, Symbol::Eth, dec("49.99"), Direction::Below).await.unwrap();

        let popped = index
            .pop_crossed(Symbol::Eth, Direction::Below, "50")
            .await
            .unwrap();

        assert_eq!(popped, vec![1]);
    }

    #[tokio::test]
    async fn test_pop_is_destructive_so_alerts_fire_once() {
        let index = MemoryIndex::new();
        index.add(7, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();

        let first = index
            .pop_crossed(Symbol::Btc, Direction::Above, "100")
            .await
            .unwrap();
        assert_eq!(first, vec![7]);

        // Market keeps rising past the target; the alert must not reappear.
        for price in ["101", "102"] {
            let again = index
                .pop_crossed(Symbol::Btc, Direction::Above, price)
                .await
                .unwrap();
            assert!(again.is_empty());
        }
    }

    #[tokio::test]
    async fn test_add_is_idempotent_per_alert_id() {
        let index = MemoryIndex::new();
        index.add(5, Symbol::Sol, dec("10"), Direction::Above).await.unwrap();
        index.add(5, Symbol::Sol, dec("20"), Direction::Above).await.unwrap();

        assert_eq!(index.len(), 1);

        // The entry moved to the newer score.
        let at_old = index
            .pop_crossed(Symbol::Sol, Direction::Above, "15")
            .await
            .unwrap();
        assert!(at_old.is_empty());

        let at_new = index
            .pop_crossed(Symbol::Sol, Direction::Above, "20")
            .await
            .unwrap();
        assert_eq!(at_new, vec![5]);
    }

    #[tokio::test]
    async fn test_buckets_are_isolated_by_symbol_and_direction() {
        let index = MemoryIndex::new();
        index.add(1, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();
        index.add(2, Symbol::Btc, dec("100"), Direction::Below).await.unwrap();
        index.add(3, Symbol::Eth, dec("100"), Direction::Above).await.unwrap();

        let popped = index
            .pop_crossed(Symbol::Btc, Direction::Above, "100")
            .await
            .unwrap();
        assert_eq!(popped, vec![1]);

        // The below-bucket and the other symbol are untouched.
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_drops_single_entry() {
        let index = MemoryIndex::new();
        index.add(1, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();
        index.add(2, Symbol::Btc, dec("100"), Direction::Above).await.unwrap();

        index.remove(1, Symbol::Btc, Direction::Above).await.unwrap();

        let popped = index
            .pop_crossed(Symbol::Btc, Direction::Above, "100")
            .await
            .unwrap();
        assert_eq!(popped, vec![2]);
    }

    #[tokio::test]
    async fn test_unparseable_market_price_is_rejected() {
        let index = MemoryIndex::new();
        let err = index
            .pop_crossed(Symbol::Btc, Direction::Above, "not-a-price")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
