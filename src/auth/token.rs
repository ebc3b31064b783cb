//! Access token handler.
//!
//! HS256 over the 32-byte symmetric key from configuration, default one-hour
//! lifetime. The token subject is the user id; ownership checks compare it
//! against the user id named by the request.

use crate::config::TOKEN_KEY_LEN;
use crate::errors::{Result, ServiceError};
use anyhow::bail;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

pub struct TokenHandler {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenHandler {
    pub fn new(symmetric_key: &str, ttl: Duration) -> anyhow::Result<Self> {
        if symmetric_key.len() != TOKEN_KEY_LEN {
            bail!(
                "token symmetric key must be exactly {} bytes, got {}",
                TOKEN_KEY_LEN,
                symmetric_key.len()
            );
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(symmetric_key.as_bytes()),
            decoding: DecodingKey::from_secret(symmetric_key.as_bytes()),
            ttl,
        })
    }

    /// Issue an access token for a user; returns the token and its expiry.
    pub fn create_token(&self, user_id: i64) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now
            + ChronoDuration::from_std(self.ttl)
                .map_err(|e| ServiceError::transient(format!("invalid token ttl: {e}")))?;

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp() as usize,
            exp: expires_at.timestamp() as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(ServiceError::transient)?;

        Ok((token, expires_at))
    }

    /// Verify a token and return its subject user id.
    pub fn verify_token(&self, token: &str) -> Result<i64> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| ServiceError::NotAuthorized)?;

        data.claims
            .sub
            .parse::<i64>()
            .map_err(|_| ServiceError::NotAuthorized)
    }
}
