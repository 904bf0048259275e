//! Publisher: encode log events and hand them to the broker
//!
//! `Publisher` wraps a shared `LogProvider` with the topic name and the
//! envelope encoding. It never retries: a broker failure is returned to the
//! caller as-is.

use crate::error::Result;
use crate::provider::{LogProvider, ProviderInfo};
use crate::types::LogEvent;
use bytes::Bytes;
use std::sync::Arc;

/// Publishes log events to a single topic
#[derive(Clone)]
pub struct Publisher {
    provider: Arc<dyn LogProvider>,
    topic: String,
}

impl Publisher {
    /// Create a publisher for `topic` on a shared provider
    pub fn new(provider: Arc<dyn LogProvider>, topic: impl Into<String>) -> Self {
        Self {
            provider,
            topic: topic.into(),
        }
    }

    /// Topic this publisher writes to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the provider name
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Serialize and publish one event, returning the broker sequence
    ///
    /// Resolves once the broker has acknowledged the message.
    pub async fn publish(&self, event: &LogEvent) -> Result<u64> {
        let payload = Bytes::from(encode(event)?);
        let sequence = self.provider.publish(&self.topic, payload).await?;

        tracing::debug!(
            topic = %self.topic,
            sequence,
            level = %event.level,
            "Log event published"
        );

        Ok(sequence)
    }

    /// Get provider info
    pub async fn info(&self) -> Result<ProviderInfo> {
        self.provider.info().await
    }
}

/// Encode an event into its wire envelope
pub fn encode(event: &LogEvent) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(event)?)
}

/// Decode a wire envelope
pub fn decode(payload: &[u8]) -> Result<LogEvent> {
    Ok(serde_json::from_slice(payload)?)
}
