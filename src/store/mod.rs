//! Durable alert store.
//!
//! Postgres is the source of truth for users and alert lifecycle; the live
//! index only mirrors `created` rows and is rebuilt from here on startup.

mod pg;

pub use pg::PgStore;

use crate::errors::Result;
use crate::models::{Alert, AlertStatus, Direction, Symbol, User};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Capability seam over the durable store, injected at the composition roots.
/// The Postgres implementation lives in [`PgStore`]; tests plug in fakes.
#[async_trait]
pub trait AlertRepo: Send + Sync {
    async fn create_user(&self, email: &str, hashed_password: &str) -> Result<User>;

    async fn get_user(&self, id: i64) -> Result<User>;

    /// Fails with `Duplicate` when the user already holds an identical
    /// `created` alert (same symbol, target price, and direction).
    async fn create_alert(
        &self,
        user_id: i64,
        symbol: Symbol,
        target_price: Decimal,
        direction: Direction,
    ) -> Result<Alert>;

    async fn get_alert(&self, id: i64) -> Result<Alert>;

    /// Newest first.
    async fn list_alerts(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Alert>>;

    async fn list_alerts_by_status(
        &self,
        user_id: i64,
        status: AlertStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Alert>>;

    /// All `created` alerts across users, paged by id. Reconciliation scan.
    async fn list_created_alerts(&self, limit: i64, offset: i64) -> Result<Vec<Alert>>;

    /// Mutates symbol/price/direction while the alert is still `created`.
    async fn update_alert(
        &self,
        id: i64,
        symbol: Symbol,
        target_price: Decimal,
        direction: Direction,
    ) -> Result<Alert>;

    /// Moves the row forward along the status DAG. A same-state update is an
    /// idempotent no-op; a reverse or skip edge is a `Validation` error.
    async fn update_status(&self, id: i64, new_status: AlertStatus) -> Result<()>;

    /// Recipient lookup for the notification consumer.
    async fn get_user_email_by_alert(&self, alert_id: i64) -> Result<String>;
}
