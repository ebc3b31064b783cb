//! Redis-backed live index: one sorted set per bucket, score = target price,
//! member = alert id as text.

use super::{bucket_key, PriceIndex};
use crate::errors::{Result, ServiceError};
use crate::models::{Direction, Symbol};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use rust_decimal::Decimal;
use tracing::debug;

/// Range read + remove in one round-trip. Redis runs scripts atomically, so a
/// concurrent pop on the same bucket can never observe the same member;
/// issuing the two commands separately would leave a double-fire window
/// between the read and the removal.
const POP_RANGE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], ARGV[1], ARGV[2])
if #ids > 0 then
    redis.call('ZREMRANGEBYSCORE', KEYS[1], ARGV[1], ARGV[2])
end
return ids
"#;

pub struct RedisIndex {
    conn: ConnectionManager,
    pop_script: Script,
}

impl RedisIndex {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(address)?;
        let conn = client.get_connection_manager().await?;

        Ok(Self {
            conn,
            pop_script: Script::new(POP_RANGE_SCRIPT),
        })
    }
}

#[async_trait]
impl PriceIndex for RedisIndex {
    async fn add(
        &self,
        alert_id: i64,
        symbol: Symbol,
        target_price: Decimal,
        direction: Direction,
    ) -> Result<()> {
        let key = bucket_key(symbol, direction);
        let mut conn = self.conn.clone();

        // ZADD on an existing member just moves its score: idempotent per id.
        let _: () = conn
            .zadd(&key, alert_id, target_price.to_string())
            .await?;

        debug!(bucket = %key, alert_id, target = %target_price, "indexed alert");
        Ok(())
    }

    async fn pop_crossed(
        &self,
        symbol: Symbol,
        direction: Direction,
        market_price: &str,
    ) -> Result<Vec<i64>> {
        let key = bucket_key(symbol, direction);

        // The market price string goes to Redis verbatim; the server parses
        // it into the score domain at query time. Both bounds inclusive.
        let (min, max) = match direction {
            Direction::Above => ("0".to_string(), market_price.to_string()),
            Direction::Below => (market_price.to_string(), "+inf".to_string()),
        };

        let mut conn = self.conn.clone();
        let members: Vec<String> = self
            .pop_script
            .key(&key)
            .arg(min)
            .arg(max)
            .invoke_async(&mut conn)
            .await?;

        members
            .into_iter()
            .map(|m| {
                m.parse::<i64>().map_err(|_| {
                    ServiceError::transient(format!("non-numeric member in {key}: {m}"))
                })
            })
            .collect()
    }

    async fn remove(&self, alert_id: i64, symbol: Symbol, direction: Direction) -> Result<()> {
        let key = bucket_key(symbol, direction);
        let mut conn = self.conn.clone();

        let _: () = conn.zrem(&key, alert_id).await?;
        Ok(())
    }
}
