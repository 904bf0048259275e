//! In-memory provider for testing and single-process deployments
//!
//! Each topic is an append-only log with 1-based sequences. Subscribers keep
//! their own cursor and park on a `watch` channel carrying the last published
//! sequence, so a slow reader never blocks publishers.

use crate::error::{LogError, Result};
use crate::provider::{LogProvider, PendingDelivery, ProviderInfo, Subscription};
use crate::types::{DeliverPolicy, Delivery, SubscribeOptions};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum messages retained per topic (0 = unlimited)
    pub max_messages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 100_000,
        }
    }
}

struct TopicLog {
    messages: VecDeque<Bytes>,
    /// Sequence of `messages[0]`
    first_sequence: u64,
    bytes: u64,
}

impl TopicLog {
    fn last_sequence(&self) -> u64 {
        self.first_sequence + self.messages.len() as u64 - 1
    }
}

struct Topic {
    name: String,
    log: Mutex<TopicLog>,
    last_sequence: watch::Sender<u64>,
}

impl Topic {
    fn new(name: &str) -> Self {
        let (last_sequence, _) = watch::channel(0);
        Self {
            name: name.to_string(),
            log: Mutex::new(TopicLog {
                messages: VecDeque::new(),
                first_sequence: 1,
                bytes: 0,
            }),
            last_sequence,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TopicLog>> {
        self.log
            .lock()
            .map_err(|e| LogError::Internal(format!("Topic '{}' lock poisoned: {}", self.name, e)))
    }
}

/// In-memory topic broker
#[derive(Clone, Default)]
pub struct MemoryProvider {
    config: MemoryConfig,
    topics: Arc<RwLock<HashMap<String, Arc<Topic>>>>,
    consumers: Arc<AtomicUsize>,
}

impl MemoryProvider {
    /// Create a provider with custom retention
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            topics: Arc::new(RwLock::new(HashMap::new())),
            consumers: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        if let Some(topic) = self
            .topics
            .read()
            .map_err(|e| LogError::Internal(format!("Topic map lock poisoned: {}", e)))?
            .get(name)
        {
            return Ok(topic.clone());
        }

        let mut topics = self
            .topics
            .write()
            .map_err(|e| LogError::Internal(format!("Topic map lock poisoned: {}", e)))?;
        Ok(topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name)))
            .clone())
    }

    /// Number of messages currently retained on a topic
    pub fn len(&self, topic: &str) -> Result<usize> {
        Ok(self.topic(topic)?.lock()?.messages.len())
    }

    /// True if nothing was ever retained on the topic
    pub fn is_empty(&self, topic: &str) -> Result<bool> {
        Ok(self.len(topic)? == 0)
    }
}

#[async_trait]
impl LogProvider for MemoryProvider {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<u64> {
        let topic = self.topic(topic)?;
        let mut log = topic.lock()?;

        log.bytes += payload.len() as u64;
        log.messages.push_back(payload);
        let sequence = log.last_sequence();

        if self.config.max_messages > 0 {
            while log.messages.len() > self.config.max_messages {
                if let Some(evicted) = log.messages.pop_front() {
                    log.bytes -= evicted.len() as u64;
                    log.first_sequence += 1;
                }
            }
        }

        // Sent under the log lock so the watched value never moves backwards
        topic.last_sequence.send_replace(sequence);
        drop(log);

        tracing::debug!(topic = %topic.name, sequence, "Message published");
        Ok(sequence)
    }

    async fn subscribe(
        &self,
        topic: &str,
        consumer: &str,
        opts: &SubscribeOptions,
    ) -> Result<Box<dyn Subscription>> {
        let topic = self.topic(topic)?;
        let cursor = {
            let log = topic.lock()?;
            match opts.deliver_policy {
                DeliverPolicy::All => log.first_sequence,
                DeliverPolicy::New => log.last_sequence() + 1,
                DeliverPolicy::ByStartSequence { sequence } => sequence.max(1),
            }
        };

        self.consumers.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            topic = %topic.name,
            consumer,
            start_sequence = cursor,
            "Memory subscription created"
        );

        Ok(Box::new(MemorySubscription {
            rx: topic.last_sequence.subscribe(),
            topic,
            cursor,
            consumers: self.consumers.clone(),
        }))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let topics: Vec<Arc<Topic>> = self
            .topics
            .read()
            .map_err(|e| LogError::Internal(format!("Topic map lock poisoned: {}", e)))?
            .values()
            .cloned()
            .collect();

        let mut messages = 0;
        let mut bytes = 0;
        for topic in topics {
            let log = topic.lock()?;
            messages += log.messages.len() as u64;
            bytes += log.bytes;
        }

        Ok(ProviderInfo {
            provider: "memory".to_string(),
            messages,
            bytes,
            consumers: self.consumers.load(Ordering::SeqCst),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Cursor over one in-memory topic
pub struct MemorySubscription {
    topic: Arc<Topic>,
    rx: watch::Receiver<u64>,
    /// Next sequence to deliver
    cursor: u64,
    consumers: Arc<AtomicUsize>,
}

impl MemorySubscription {
    fn take_next(&mut self) -> Result<Option<Delivery>> {
        let log = self.topic.lock()?;

        // Skip anything evicted by retention
        if self.cursor < log.first_sequence {
            self.cursor = log.first_sequence;
        }

        let index = (self.cursor - log.first_sequence) as usize;
        let Some(payload) = log.messages.get(index).cloned() else {
            return Ok(None);
        };

        let delivery = Delivery {
            payload,
            sequence: self.cursor,
            num_delivered: 1,
            topic: self.topic.name.clone(),
        };
        self.cursor += 1;
        Ok(Some(delivery))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<PendingDelivery>> {
        loop {
            if let Some(delivery) = self.take_next()? {
                return Ok(Some(PendingDelivery::new(delivery, || {
                    Box::pin(async { Ok(()) })
                })));
            }

            let cursor = self.cursor;
            if self.rx.wait_for(|last| *last >= cursor).await.is_err() {
                return Ok(None);
            }
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.consumers.fetch_sub(1, Ordering::SeqCst);
    }
}
