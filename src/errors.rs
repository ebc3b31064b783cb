//! Error taxonomy shared across both services.
//!
//! The HTTP edge maps these onto status codes in `api`; background tasks
//! report them to the central error channel and keep going.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input at the boundary (undecodable body, bad header).
    #[error("bad request")]
    BadRequest,

    /// Field-level rule violation.
    #[error("{0}")]
    Validation(String),

    /// Token invalid, expired, or subject mismatch.
    #[error("not authorized")]
    NotAuthorized,

    /// Unique-constraint conflict.
    #[error("{0} already exists")]
    Duplicate(&'static str),

    /// Entity missing.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The upstream feed refused our subscription. Fatal at startup.
    #[error("market feed subscription failed")]
    SubscriptionFailed,

    /// A backend (store, index, queue, SMTP) was reachable but failed.
    /// Callers retry, skip the tick, or let the broker redeliver.
    #[error("transient backend error: {0}")]
    Transient(String),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }

    pub fn transient(err: impl std::fmt::Display) -> Self {
        ServiceError::Transient(err.to_string())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::transient(err)
    }
}

impl From<redis::RedisError> for ServiceError {
    fn from(err: redis::RedisError) -> Self {
        ServiceError::transient(err)
    }
}

impl From<rdkafka::error::KafkaError> for ServiceError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        ServiceError::transient(err)
    }
}
