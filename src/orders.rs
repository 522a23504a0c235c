use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};

use crate::config::Config;
use crate::handler::{HandlerContext, HandlerRegistration};
use crate::message::Message;
use crate::producer::EventPublisher;

/// Emitted when a new order is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub id: i64,
    pub number: String,
    pub status: String,
    /// RFC 3339 creation time
    pub created_at: String,
}

impl OrderCreatedEvent {
    /// Partition key; keeps every event for one order on the same partition
    pub fn key(&self) -> String {
        format!("order-{}", self.id)
    }
}

/// Handlers contributed by the orders module
pub fn registrations(config: &Config) -> Vec<HandlerRegistration> {
    vec![HandlerRegistration::new(
        config.messaging.topic.clone(),
        handle_order_created,
    )]
}

/// Decode and record an order-created event.
///
/// An undecodable payload is a handler error, so the offset is not committed.
pub async fn handle_order_created(_ctx: HandlerContext, message: Message) -> Result<()> {
    let span = info_span!("worker.orders.process", messaging.topic = %message.topic);

    async move {
        let event: OrderCreatedEvent = match serde_json::from_slice(&message.value) {
            Ok(event) => event,
            Err(e) => {
                error!("❌ Failed to decode order created event at offset {}: {}", message.offset, e);
                return Err(anyhow::Error::new(e).context("Failed to decode order created event"));
            }
        };

        info!(
            id = event.id,
            number = %event.number,
            status = %event.status,
            "🛒 Order created event processed"
        );
        Ok(())
    }
    .instrument(span)
    .await
}

/// Publish an [`OrderCreatedEvent`] keyed by order id
pub async fn publish_order_created(publisher: &EventPublisher, event: &OrderCreatedEvent) -> Result<()> {
    publisher.publish_json(&event.key(), event).await
}
