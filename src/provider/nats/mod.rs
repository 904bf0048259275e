//! NATS JetStream provider
//!
//! Implements `LogProvider` using NATS JetStream for persistent,
//! at-least-once topic delivery. Topics map one-to-one onto subjects
//! captured by a single stream.

mod client;
mod config;
mod subscriber;

pub use client::{NatsClient, StreamInfo};
pub use config::{NatsConfig, StorageType};
pub use subscriber::NatsSubscription;

use crate::error::Result;
use crate::provider::{LogProvider, ProviderInfo, Subscription};
use crate::types::SubscribeOptions;
use async_trait::async_trait;
use bytes::Bytes;

/// NATS JetStream provider
///
/// Wraps `NatsClient` and implements the `LogProvider` trait.
pub struct NatsProvider {
    client: NatsClient,
}

impl NatsProvider {
    /// Connect to NATS and initialize the JetStream stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LogProvider for NatsProvider {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64> {
        self.client.publish(topic, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer: &str,
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        let sub = self.client.subscribe(topic, consumer, opts).await?;
        Ok(Box::new(sub))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let info = self.client.stream_info().await?;
        Ok(ProviderInfo {
            provider: "nats".to_string(),
            messages: info.messages,
            bytes: info.bytes,
            consumers: info.consumer_count,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}
