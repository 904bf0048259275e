//! Broker provider trait: the core abstraction for topic backends
//!
//! All brokers (NATS JetStream, in-memory) implement `LogProvider` to give
//! the publisher and the materializer a uniform publish/subscribe API.
//! Providers move opaque envelope bytes; encoding and decoding belong to the
//! publisher and the materializer.

use crate::error::Result;
use crate::types::{Delivery, SubscribeOptions};
use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
pub mod nats;

/// Core trait for broker backends
///
/// Implementations must be safe for concurrent use: many ingestion calls
/// publish through one shared provider.
#[async_trait]
pub trait LogProvider: Send + Sync {
    /// Publish a payload to a topic, returning the broker-assigned sequence
    ///
    /// Resolves only after the broker acknowledged the message.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64>;

    /// Create a subscription on a topic
    ///
    /// `consumer` names the reader; providers with durable consumers use it
    /// to keep server-side state across reconnects.
    async fn subscribe(
        &self,
        topic: &str,
        consumer: &str,
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>>;

    /// Get provider info (message count, etc.)
    async fn info(&self) -> Result<ProviderInfo>;

    /// Provider name (e.g., "nats", "memory")
    fn name(&self) -> &str;

    /// Health check; returns true if the provider is connected and operational
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Async subscription handle for receiving messages
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next message, waiting until one is available
    ///
    /// Returns `None` when the underlying stream has ended. Must be
    /// cancel-safe: the materializer wraps it in a poll timeout.
    async fn next(&mut self) -> Result<Option<PendingDelivery>>;
}

type AckFn = Box<dyn FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send>;

/// A message pending acknowledgement
pub struct PendingDelivery {
    /// The received message
    pub delivery: Delivery,

    /// Ack callback; call to confirm processing
    ack_fn: AckFn,
}

impl PendingDelivery {
    /// Create a new pending delivery with an ack callback
    pub fn new(
        delivery: Delivery,
        ack_fn: impl FnOnce() -> futures::future::BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            delivery,
            ack_fn: Box::new(ack_fn),
        }
    }

    /// Acknowledge processing; the broker will not redeliver
    pub async fn ack(self) -> Result<()> {
        (self.ack_fn)().await
    }
}

impl std::fmt::Debug for PendingDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDelivery")
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

/// Provider status information
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderInfo {
    /// Provider name
    pub provider: String,
    /// Total messages stored
    pub messages: u64,
    /// Total bytes used
    pub bytes: u64,
    /// Number of active consumers/subscribers
    pub consumers: usize,
}
