//! Price-threshold alerts on streaming crypto markets.
//!
//! Two binaries share this library: `alert-service` (market ingest, matching
//! engine, admin API) and `email-service` (notification queue consumer).
//! The durable store is the source of truth; the live index holds the hot,
//! price-sorted view of active alerts.

pub mod api;
pub mod auth;
pub mod config;
pub mod email;
pub mod errors;
pub mod index;
pub mod ingest;
pub mod matcher;
pub mod models;
pub mod queue;
pub mod reconcile;
pub mod store;

pub use config::Config;
