//! Application configuration loaded from the environment.

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

/// Exact key length required for the token symmetric key.
pub const TOKEN_KEY_LEN: usize = 32;

/// Everything both services need, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub postgres_address: String,
    pub redis_address: String,
    pub kafka_address: String,
    pub kafka_topic: String,
    pub kafka_group: String,
    pub token_symmetric_key: String,
    pub token_ttl: Duration,
    pub tick_interval: Duration,
    pub listen_address: String,
    pub market_feed_url: String,
    pub smtp_host: String,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_from_name: String,
    pub smtp_from_address: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let postgres_address =
            env::var("POSTGRES_ADDRESS").context("POSTGRES_ADDRESS must be set")?;
        let redis_address = env::var("REDIS_ADDRESS").context("REDIS_ADDRESS must be set")?;
        let kafka_address = env::var("KAFKA_ADDRESS").context("KAFKA_ADDRESS must be set")?;
        let kafka_topic = env::var("KAFKA_TOPIC").context("KAFKA_TOPIC must be set")?;
        let kafka_group =
            env::var("KAFKA_GROUP").unwrap_or_else(|_| "email-service".to_string());

        let token_symmetric_key =
            env::var("TOKEN_SYMMETRIC_KEY").context("TOKEN_SYMMETRIC_KEY must be set")?;
        if token_symmetric_key.len() != TOKEN_KEY_LEN {
            bail!(
                "TOKEN_SYMMETRIC_KEY must be exactly {} bytes, got {}",
                TOKEN_KEY_LEN,
                token_symmetric_key.len()
            );
        }

        let token_ttl_secs = env::var("TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);

        let tick_interval_ms = env::var("TICK_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(100);

        let listen_address =
            env::var("LISTEN_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let market_feed_url = env::var("MARKET_FEED_URL")
            .unwrap_or_else(|_| "wss://stream.binance.com/stream".to_string());

        let smtp_host = env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string());
        let smtp_username = env::var("SMTP_USERNAME").unwrap_or_default();
        let smtp_password = env::var("SMTP_PASSWORD").unwrap_or_default();
        let smtp_from_name =
            env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "Price Alerts".to_string());
        let smtp_from_address =
            env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| smtp_username.clone());

        Ok(Self {
            postgres_address,
            redis_address,
            kafka_address,
            kafka_topic,
            kafka_group,
            token_symmetric_key,
            token_ttl: Duration::from_secs(token_ttl_secs),
            tick_interval: Duration::from_millis(tick_interval_ms),
            listen_address,
            market_feed_url,
            smtp_host,
            smtp_username,
            smtp_password,
            smtp_from_name,
            smtp_from_address,
        })
    }
}
