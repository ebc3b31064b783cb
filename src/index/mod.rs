//! Live price index: per (symbol, direction) sorted buckets of
//! (target price -> alert id) supporting an atomic range-pop of crossed
//! alerts. This is the hot half of the system; the durable store stays the
//! source of truth.

mod memory;
mod redis_index;

pub use memory::MemoryIndex;
pub use redis_index::RedisIndex;

use crate::errors::Result;
use crate::models::{Direction, Symbol};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Sorted-set bucket name for a (symbol, direction) pair, e.g.
/// `btcusdt@trade:gt` for above-alerts on BTC.
pub fn bucket_key(symbol: Symbol, direction: Direction) -> String {
    format!("{}:{}", symbol.stream_tag(), direction.bucket_suffix())
}

/// Capability seam over the index backend. All operations may fail
/// transiently; the matcher skips the tick and moves on.
#[async_trait]
pub trait PriceIndex: Send + Sync {
    /// Index an alert. Idempotent per alert id: re-adding moves the entry to
    /// the new score instead of duplicating it.
    async fn add(
        &self,
        alert_id: i64,
        symbol: Symbol,
        target_price: Decimal,
        direction: Direction,
    ) -> Result<()>;

    /// Return and atomically remove every alert in the (symbol, direction)
    /// bucket crossed by `market_price`: targets in `[0, market]` for above,
    /// `[market, +inf]` for below, both bounds inclusive. The price arrives
    /// as the upstream's string and is converted to a decimal exactly once,
    /// at query time. No alert observed by the range read may survive the
    /// call - this is what makes firing at-most-once across ticks.
    async fn pop_crossed(
        &self,
        symbol: Symbol,
        direction: Direction,
        market_price: &str,
    ) -> Result<Vec<i64>>;

    /// Drop one alert from its bucket (admin update/delete sync).
    async fn remove(&self, alert_id: i64, symbol: Symbol, direction: Direction) -> Result<()>;
}
