//! Publishing of order domain events.

use async_trait::async_trait;

use crate::domain::events::OrderEvent;

pub const SUBJECT_PREFIX: &str = "orders";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Best effort: failures are logged, never surfaced to the caller.
    async fn publish(&self, events: Vec<OrderEvent>);
}

/// Drops every event. Used when no broker is configured.
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, events: Vec<OrderEvent>) {
        for event in events { tracing::trace!(order_id = %event.order_id(), event = event.name(), "event not published"); }
    }
}

pub struct NatsPublisher { client: async_nats::Client }

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

pub fn subject_for(event: &OrderEvent) -> String { format!("{SUBJECT_PREFIX}.{}", event.name()) }

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, events: Vec<OrderEvent>) {
        for event in events {
            let payload = match serde_json::to_vec(&event) {
                Ok(p) => p,
                Err(e) => { tracing::error!(error = %e, "failed to encode order event"); continue; }
            };
            if let Err(e) = self.client.publish(subject_for(&event), payload.into()).await {
                tracing::warn!(order_id = %event.order_id(), event = event.name(), error = %e, "failed to publish order event");
            }
        }
    }
}
