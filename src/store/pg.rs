//! Postgres implementation of the durable store.

use crate::errors::{Result, ServiceError};
use crate::models::{Alert, AlertStatus, Direction, Symbol, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

const ALERT_COLUMNS: &str = "id, user_id, symbol, target_price, direction, status, created_at";

pub struct PgStore {
    pool: PgPool,
}

/// Raw row shape; enum columns come back as text and are narrowed in
/// `try_into_alert`.
#[derive(sqlx::FromRow)]
struct AlertRow {
    id: i64,
    user_id: i64,
    symbol: String,
    target_price: Decimal,
    direction: String,
    status: String,
    created_at: DateTime<Utc>,
}

fn try_into_alert(row: AlertRow) -> Result<Alert> {
    let symbol = Symbol::from_stream_tag(&row.symbol)
        .ok_or_else(|| ServiceError::validation(format!("unknown symbol in store: {}", row.symbol)))?;
    let direction = Direction::from_str(&row.direction)
        .ok_or_else(|| ServiceError::validation(format!("unknown direction in store: {}", row.direction)))?;
    let status = AlertStatus::from_str(&row.status)
        .ok_or_else(|| ServiceError::validation(format!("unknown status in store: {}", row.status)))?;

    Ok(Alert {
        id: row.id,
        user_id: row.user_id,
        symbol,
        target_price: row.target_price,
        direction,
        status,
        created_at: row.created_at,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl PgStore {
    /// Connect a pool and run pending migrations.
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(address)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl super::AlertRepo for PgStore {
    async fn create_user(&self, email: &str, hashed_password: &str) -> Result<User> {
        let row = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
            "INSERT INTO users (email, hashed_password) VALUES ($1, $2)
             RETURNING id, email, hashed_password, created_at",
        )
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Duplicate("user")
            } else {
                e.into()
            }
        })?;

        Ok(User {
            id: row.0,
            email: row.1,
            hashed_password: row.2,
            created_at: row.3,
        })
    }

    async fn get_user(&self, id: i64) -> Result<User> {
        let row = sqlx::query_as::<_, (i64, String, String, DateTime<Utc>)>(
            "SELECT id, email, hashed_password, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("user"))?;

        Ok(User {
            id: row.0,
            email: row.1,
            hashed_password: row.2,
            created_at: row.3,
        })
    }

    async fn create_alert(
        &self,
        user_id: i64,
        symbol: Symbol,
        target_price: Decimal,
        direction: Direction,
    ) -> Result<Alert> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "INSERT INTO alerts (user_id, symbol, target_price, direction)
             VALUES ($1, $2, $3, $4)
             RETURNING {ALERT_COLUMNS}"
        ))
        .bind(user_id)
        .bind(symbol.stream_tag())
        .bind(target_price)
        .bind(direction.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Duplicate("alert")
            } else {
                e.into()
            }
        })?;

        try_into_alert(row)
    }

    async fn get_alert(&self, id: i64) -> Result<Alert> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("alert"))?;

        try_into_alert(row)
    }

    async fn list_alerts(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(try_into_alert).collect()
    }

    async fn list_alerts_by_status(
        &self,
        user_id: i64,
        status: AlertStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE user_id = $1 AND status = $2
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(try_into_alert).collect()
    }

    async fn list_created_alerts(&self, limit: i64, offset: i64) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE status = 'created'
             ORDER BY id
             LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(try_into_alert).collect()
    }

    async fn update_alert(
        &self,
        id: i64,
        symbol: Symbol,
        target_price: Decimal,
        direction: Direction,
    ) -> Result<Alert> {
        let row = sqlx::query_as::<_, AlertRow>(&format!(
            "UPDATE alerts
             SET symbol = $1, target_price = $2, direction = $3
             WHERE id = $4 AND status = 'created'
             RETURNING {ALERT_COLUMNS}"
        ))
        .bind(symbol.stream_tag())
        .bind(target_price)
        .bind(direction.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Duplicate("alert")
            } else {
                ServiceError::from(e)
            }
        })?;

        match row {
            Some(row) => try_into_alert(row),
            // Either the row is gone or it already left `created`.
            None => match self.get_alert(id).await {
                Ok(alert) => Err(ServiceError::validation(format!(
                    "alert {} is {} and can no longer be updated",
                    id, alert.status
                ))),
                Err(e) => Err(e),
            },
        }
    }

    async fn update_status(&self, id: i64, new_status: AlertStatus) -> Result<()> {
        // Optimistic forward move: only rows sitting in an allowed prior
        // status are touched, so concurrent transitions cannot race backwards.
        let allowed: Vec<String> = new_status
            .allowed_prior()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let updated = sqlx::query(
            "UPDATE alerts SET status = $1 WHERE id = $2 AND status = ANY($3)",
        )
        .bind(new_status.as_str())
        .bind(id)
        .bind(&allowed)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let current = sqlx::query_as::<_, (String,)>("SELECT status FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            None => Err(ServiceError::NotFound("alert")),
            // Redelivery lands here: the move already happened.
            Some((s,)) if s == new_status.as_str() => Ok(()),
            Some((s,)) => Err(ServiceError::validation(format!(
                "alert {} cannot move from {} to {}",
                id, s, new_status
            ))),
        }
    }

    async fn get_user_email_by_alert(&self, alert_id: i64) -> Result<String> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT u.email FROM users u
             JOIN alerts a ON a.user_id = u.id
             WHERE a.id = $1",
        )
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("alert"))?;

        Ok(row.0)
    }
}
