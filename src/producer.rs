use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::client::LogClient;
use crate::error::ClientError;

/// Publishes events onto the configured topic.
///
/// Delivery to handlers is asynchronous and at-least-once; a successful
/// publish only means every in-sync replica has the record.
#[derive(Clone)]
pub struct EventPublisher {
    client: Arc<dyn LogClient>,
}

impl EventPublisher {
    /// Create a new EventPublisher on top of an existing client
    pub fn new(client: Arc<dyn LogClient>) -> Self {
        Self { client }
    }

    pub fn topic(&self) -> String {
        self.client.topic()
    }

    /// Send raw key and value bytes
    pub async fn publish(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        let key = key.into();
        let value = value.into();
        debug!(
            "📤 Publishing {} bytes to topic '{}' (key '{}')",
            value.len(),
            self.client.topic(),
            String::from_utf8_lossy(&key)
        );

        self.client.publish(key, value).await?;

        debug!("✅ Event published to topic '{}'", self.client.topic());
        Ok(())
    }

    /// Serialize `event` as JSON and publish it under `key`
    pub async fn publish_json<T: Serialize + ?Sized>(&self, key: &str, event: &T) -> Result<()> {
        let payload = serde_json::to_vec(event).context("Failed to serialize event")?;
        self.publish(key, payload)
            .await
            .with_context(|| format!("Failed to publish event '{}'", key))
    }
}
