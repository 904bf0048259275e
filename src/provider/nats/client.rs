//! NATS JetStream client: connect, publish, subscribe

use super::config::{NatsConfig, StorageType};
use super::subscriber::NatsSubscription;
use crate::error::{LogError, Result};
use crate::types::{DeliverPolicy, SubscribeOptions};
use async_nats::jetstream;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::Mutex;

/// NATS JetStream client
///
/// Low-level client for publishing and pulling log envelopes. Manages the
/// connection and the JetStream stream lifecycle.
pub struct NatsClient {
    /// JetStream context; owns a handle to the connection
    jetstream: jetstream::Context,

    /// JetStream stream handle (Mutex for methods requiring &mut self)
    stream: Mutex<jetstream::stream::Stream>,
}

impl NatsClient {
    /// Connect to NATS and initialize the JetStream stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| LogError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client);
        let stream = ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            jetstream,
            stream: Mutex::new(stream),
        })
    }

    /// Publish a payload and wait for the JetStream ack
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64> {
        let ack = self
            .jetstream
            .publish(topic.to_string(), payload)
            .await
            .map_err(|e| LogError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| LogError::Publish {
                topic: topic.to_string(),
                reason: format!("ack failed: {}", e),
            })?;

        tracing::debug!(topic, sequence = ack.sequence, "Log published");

        Ok(ack.sequence)
    }

    /// Create a pull consumer on `topic` and return its message stream
    ///
    /// The consumer is durable under `consumer_name`. A durable consumer that
    /// already exists keeps its server-side position; otherwise the deliver
    /// policy decides where reading starts.
    pub async fn subscribe(
        &self,
        topic: &str,
        consumer_name: &str,
        opts: &SubscribeOptions,
    ) -> Result<NatsSubscription> {
        let config = build_consumer_config(topic, consumer_name, opts);

        let consumer = self
            .stream
            .lock()
            .await
            .get_or_create_consumer(consumer_name, config)
            .await
            .map_err(|e| {
                LogError::Consumer(format!(
                    "Failed to create durable consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        let messages = consumer.messages().await.map_err(|e| LogError::Subscribe {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            consumer = consumer_name,
            topic,
            deliver_policy = ?opts.deliver_policy,
            "Durable subscription created"
        );

        Ok(NatsSubscription::new(messages, topic.to_string()))
    }

    /// Get stream info
    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self.stream.lock().await;
        let info = stream
            .info()
            .await
            .map_err(|e| LogError::Stream(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }
}

/// Summary of stream state
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}

/// Build a JetStream pull consumer config from SubscribeOptions
fn build_consumer_config(
    topic: &str,
    consumer_name: &str,
    opts: &SubscribeOptions,
) -> jetstream::consumer::pull::Config {
    let deliver_policy = match &opts.deliver_policy {
        DeliverPolicy::All => jetstream::consumer::DeliverPolicy::All,
        DeliverPolicy::New => jetstream::consumer::DeliverPolicy::New,
        DeliverPolicy::ByStartSequence { sequence } => {
            jetstream::consumer::DeliverPolicy::ByStartSequence {
                start_sequence: *sequence,
            }
        }
    };

    jetstream::consumer::pull::Config {
        durable_name: Some(consumer_name.to_string()),
        filter_subject: topic.to_string(),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        deliver_policy,
        max_ack_pending: opts.max_ack_pending.unwrap_or(0),
        ack_wait: opts
            .ack_wait_secs
            .map(Duration::from_secs)
            .unwrap_or_default(),
        ..Default::default()
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Ensure the JetStream stream exists with the correct configuration
async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsConfig,
) -> Result<jetstream::stream::Stream> {
    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.subjects.clone(),
        storage,
        max_messages: config.max_events,
        max_age: Duration::from_secs(config.max_age_secs),
        max_bytes: config.max_bytes,
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    let stream = js
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| {
            LogError::Stream(format!(
                "Failed to create/get stream '{}': {}",
                config.stream_name, e
            ))
        })?;

    tracing::info!(
        stream = %config.stream_name,
        subjects = ?config.subjects,
        "JetStream stream ready"
    );

    Ok(stream)
}
