//! Kafka producer for trigger messages.

use super::TriggerSink;
use crate::errors::{Result, ServiceError};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::info;

pub struct KafkaTriggerProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaTriggerProducer {
    /// Waits for acks from all in-sync replicas and retries transient send
    /// failures five times before surfacing an error to the matcher.
    pub fn new(address: &str, topic: &str) -> anyhow::Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", address)
            .set("acks", "all")
            .set("message.send.max.retries", "5")
            .set("message.timeout.ms", "30000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl TriggerSink for KafkaTriggerProducer {
    async fn publish(&self, alert_id: i64, price: &str) -> Result<()> {
        let key = alert_id.to_string();
        let record = FutureRecord::to(&self.topic).key(&key).payload(price);

        let (partition, offset) = self
            .producer
            .send(record, Duration::from_secs(30))
            .await
            .map_err(|(e, _msg)| ServiceError::from(e))?;

        info!(partition, offset, id = %key, price, "trigger published");
        Ok(())
    }
}
