//! Core domain types shared by both services.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market symbols we watch. The serialized form is the upstream stream tag,
/// used verbatim as the subscription param, the last-price map key, and the
/// live-index key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    #[serde(rename = "btcusdt@trade")]
    Btc,
    #[serde(rename = "ethusdt@trade")]
    Eth,
    #[serde(rename = "solusdt@trade")]
    Sol,
}

impl Symbol {
    pub const COUNT: usize = 3;
    pub const ALL: [Symbol; Symbol::COUNT] = [Symbol::Btc, Symbol::Eth, Symbol::Sol];

    pub fn stream_tag(&self) -> &'static str {
        match self {
            Symbol::Btc => "btcusdt@trade",
            Symbol::Eth => "ethusdt@trade",
            Symbol::Sol => "solusdt@trade",
        }
    }

    pub fn from_stream_tag(tag: &str) -> Option<Self> {
        match tag {
            "btcusdt@trade" => Some(Symbol::Btc),
            "ethusdt@trade" => Some(Symbol::Eth),
            "solusdt@trade" => Some(Symbol::Sol),
            _ => None,
        }
    }

    /// Stable slot for array-backed per-symbol state.
    #[inline]
    pub fn slot(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stream_tag())
    }
}

/// Which way the market has to cross the target for the alert to fire.
/// `Above` fires when market >= target, `Below` when market <= target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "above" => Some(Direction::Above),
            "below" => Some(Direction::Below),
            _ => None,
        }
    }

    /// Sorted-set bucket suffix: above-alerts live in `gt`, below-alerts in `lt`.
    pub fn bucket_suffix(&self) -> &'static str {
        match self {
            Direction::Above => "gt",
            Direction::Below => "lt",
        }
    }
}

/// Alert lifecycle. Transitions form a strict DAG:
/// created -> {triggered, deleted}; triggered -> completed; the rest terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Created,
    Triggered,
    Deleted,
    Completed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Created => "created",
            AlertStatus::Triggered => "triggered",
            AlertStatus::Deleted => "deleted",
            AlertStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(AlertStatus::Created),
            "triggered" => Some(AlertStatus::Triggered),
            "deleted" => Some(AlertStatus::Deleted),
            "completed" => Some(AlertStatus::Completed),
            _ => None,
        }
    }

    /// Statuses a row may hold immediately before moving to `self`.
    /// Empty means nothing may transition into `self` (it is an entry state).
    pub fn allowed_prior(&self) -> &'static [AlertStatus] {
        match self {
            AlertStatus::Created => &[],
            AlertStatus::Triggered => &[AlertStatus::Created],
            AlertStatus::Deleted => &[AlertStatus::Created],
            AlertStatus::Completed => &[AlertStatus::Triggered],
        }
    }

    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        next.allowed_prior().contains(self)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered price alert. The durable store is the source of truth for
/// these rows; the live index only mirrors the `created` ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub user_id: i64,
    pub symbol: Symbol,
    pub target_price: Decimal,
    pub direction: Direction,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

/// User account.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String, // bcrypt hash - never serialize
    pub created_at: DateTime<Utc>,
}
