//! JetStream pull subscription

use crate::error::{LogError, Result};
use crate::provider::{PendingDelivery, Subscription};
use crate::types::Delivery;
use async_nats::jetstream::consumer::pull;
use async_trait::async_trait;
use futures::StreamExt;

/// Subscription backed by a JetStream pull consumer's message stream
pub struct NatsSubscription {
    messages: pull::Stream,
    topic: String,
}

impl NatsSubscription {
    pub(crate) fn new(messages: pull::Stream, topic: String) -> Self {
        Self { messages, topic }
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<PendingDelivery>> {
        let Some(message) = self.messages.next().await else {
            return Ok(None);
        };
        let message = message.map_err(|e| LogError::Consumer(format!("Failed to pull message: {}", e)))?;

        let (sequence, num_delivered) = match message.info() {
            Ok(info) => (info.stream_sequence, u64::try_from(info.delivered).unwrap_or(1)),
            Err(e) => {
                return Err(LogError::Consumer(format!(
                    "Message on '{}' has no JetStream metadata: {}",
                    self.topic, e
                )))
            }
        };

        let delivery = Delivery {
            payload: message.payload.clone(),
            sequence,
            num_delivered,
            topic: self.topic.clone(),
        };

        Ok(Some(PendingDelivery::new(delivery, move || {
            Box::pin(async move {
                message
                    .ack()
                    .await
                    .map_err(|e| LogError::Ack(e.to_string()))
            })
        })))
    }
}
