//! Notification bus: trigger messages keyed by alert id, price as payload.

mod consumer;
mod producer;

pub use consumer::{handle_trigger, TriggerConsumer, TriggerOutcome};
pub use producer::KafkaTriggerProducer;

use crate::errors::Result;
use async_trait::async_trait;

/// Producer seam. Implementations must not return before the broker has
/// acknowledged the write, so a crash after `publish` can only duplicate a
/// trigger, never lose one.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn publish(&self, alert_id: i64, price: &str) -> Result<()>;
}
