//! Materializer: drains the log topic into the store
//!
//! One background task subscribes to the topic and, for every message,
//! decodes the envelope, converts it to a row, inserts it, records the
//! offset, and acknowledges. A message that fails any step is dead-lettered
//! and acknowledged; only a shutdown signal ends the loop.
//!
//! `Supervisor` owns the task and gives it an explicit
//! `Stopped -> Running -> Stopped` lifecycle.

use crate::dlq::{DeadLetter, DlqHandler, FailureStage};
use crate::error::{LogError, Result};
use crate::provider::{LogProvider, PendingDelivery, Subscription};
use crate::publisher::decode;
use crate::state::OffsetStore;
use crate::store::{LogRow, LogStore};
use crate::types::{DeliverPolicy, Delivery, SubscribeOptions};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Minimum backoff between subscribe attempts and resubscriptions
const MIN_BACKOFF: Duration = Duration::from_secs(2);
/// Maximum backoff cap
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Materializer settings
#[derive(Debug, Clone)]
pub struct MaterializerConfig {
    /// Topic to drain
    pub topic: String,
    /// Consumer name; keys the persisted offset and the durable consumer
    pub consumer: String,
    /// Upper bound on a single wait for the next message
    pub poll_interval: Duration,
    /// Start position when no offset has been saved
    pub deliver_policy: DeliverPolicy,
    /// Drop and recreate the `logs` table on every start
    pub recreate_on_start: bool,
    /// Broker redelivery timeout for unacknowledged messages
    pub ack_wait_secs: Option<u64>,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            topic: "logs".to_string(),
            consumer: "materializer".to_string(),
            poll_interval: Duration::from_secs(1),
            deliver_policy: DeliverPolicy::New,
            recreate_on_start: false,
            ack_wait_secs: None,
        }
    }
}

/// Running counters, shared between the task and status readers
#[derive(Debug, Default)]
pub struct MaterializerStats {
    consumed: AtomicU64,
    materialized: AtomicU64,
    dead_lettered: AtomicU64,
    decode_failures: AtomicU64,
    convert_failures: AtomicU64,
    insert_failures: AtomicU64,
}

/// Point-in-time copy of `MaterializerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub consumed: u64,
    pub materialized: u64,
    pub dead_lettered: u64,
    pub decode_failures: u64,
    pub convert_failures: u64,
    pub insert_failures: u64,
}

impl MaterializerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            consumed: self.consumed.load(Ordering::Relaxed),
            materialized: self.materialized.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            convert_failures: self.convert_failures.load(Ordering::Relaxed),
            insert_failures: self.insert_failures.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, stage: FailureStage) {
        let counter = match stage {
            FailureStage::Decode => &self.decode_failures,
            FailureStage::Convert => &self.convert_failures,
            FailureStage::Insert => &self.insert_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Consumes the topic and writes rows to the store
#[derive(Clone)]
pub struct Materializer {
    provider: Arc<dyn LogProvider>,
    store: LogStore,
    dlq: Arc<dyn DlqHandler>,
    offsets: Arc<dyn OffsetStore>,
    config: MaterializerConfig,
    stats: Arc<MaterializerStats>,
}

impl Materializer {
    pub fn new(
        provider: Arc<dyn LogProvider>,
        store: LogStore,
        dlq: Arc<dyn DlqHandler>,
        offsets: Arc<dyn OffsetStore>,
        config: MaterializerConfig,
    ) -> Self {
        Self {
            provider,
            store,
            dlq,
            offsets,
            config,
            stats: Arc::new(MaterializerStats::default()),
        }
    }

    pub fn config(&self) -> &MaterializerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<MaterializerStats> {
        self.stats.clone()
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    ///
    /// Only a schema failure at startup returns an error.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.store.ensure_schema(self.config.recreate_on_start).await?;

        tracing::info!(
            topic = %self.config.topic,
            consumer = %self.config.consumer,
            "Materializer running"
        );

        // Delay before resubscribing after a lost subscription; reset by traffic
        let mut retry = MIN_BACKOFF;
        'subscribe: while let Some(mut sub) = self.subscribe(&mut shutdown).await {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break 'subscribe,
                    polled = tokio::time::timeout(self.config.poll_interval, sub.next()) => {
                        match polled {
                            // Idle poll
                            Err(_) => continue,
                            Ok(Ok(Some(pending))) => {
                                retry = MIN_BACKOFF;
                                self.process(pending).await;
                            }
                            Ok(Ok(None)) => {
                                tracing::warn!(
                                    topic = %self.config.topic,
                                    backoff_secs = retry.as_secs(),
                                    "Subscription ended, resubscribing after backoff"
                                );
                                break;
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(
                                    topic = %self.config.topic,
                                    error = %e,
                                    backoff_secs = retry.as_secs(),
                                    "Receive failed, resubscribing after backoff"
                                );
                                break;
                            }
                        }
                    }
                }
            }

            drop(sub);
            if !pause(retry, &mut shutdown).await {
                break;
            }
            retry = (retry * 2).min(MAX_BACKOFF);
        }

        tracing::info!(topic = %self.config.topic, "Materializer stopped");
        Ok(())
    }

    /// Subscribe, retrying with exponential backoff; `None` on shutdown
    async fn subscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Box<dyn Subscription>> {
        let mut backoff = MIN_BACKOFF;
        loop {
            if *shutdown.borrow() {
                return None;
            }

            match self.try_subscribe().await {
                Ok(sub) => return Some(sub),
                Err(e) => {
                    tracing::error!(
                        topic = %self.config.topic,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Subscribe failed, retrying after backoff"
                    );

                    if !pause(backoff, shutdown).await {
                        return None;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn try_subscribe(&self) -> Result<Box<dyn Subscription>> {
        let deliver_policy = match self.offsets.load(&self.config.consumer)? {
            Some(sequence) => DeliverPolicy::ByStartSequence {
                sequence: sequence.saturating_add(1),
            },
            None => self.config.deliver_policy.clone(),
        };

        tracing::info!(
            topic = %self.config.topic,
            consumer = %self.config.consumer,
            deliver_policy = ?deliver_policy,
            "Subscribing"
        );

        let opts = SubscribeOptions {
            deliver_policy,
            ack_wait_secs: self.config.ack_wait_secs,
            max_ack_pending: None,
        };
        self.provider
            .subscribe(&self.config.topic, &self.config.consumer, &opts)
            .await
    }

    async fn process(&self, pending: PendingDelivery) {
        let delivery = &pending.delivery;
        let sequence = delivery.sequence;
        self.stats.consumed.fetch_add(1, Ordering::Relaxed);

        match self.materialize(delivery).await {
            Ok(id) => {
                self.stats.materialized.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(sequence, id, "Log materialized");
            }
            Err((stage, e)) => {
                self.stats.record_failure(stage);
                let letter = DeadLetter::new(delivery, stage, e.to_string());
                match self.dlq.handle(letter).await {
                    Ok(()) => {
                        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(dlq_err) => tracing::error!(
                        sequence,
                        stage = %stage,
                        error = %dlq_err,
                        "Failed to dead-letter message"
                    ),
                }
            }
        }

        if let Err(e) = self.offsets.save(&self.config.consumer, sequence) {
            tracing::warn!(sequence, error = %e, "Failed to save offset");
        }
        if let Err(e) = pending.ack().await {
            tracing::warn!(sequence, error = %e, "Failed to acknowledge message");
        }
    }

    async fn materialize(
        &self,
        delivery: &Delivery,
    ) -> std::result::Result<i64, (FailureStage, LogError)> {
        let event = decode(&delivery.payload).map_err(|e| (FailureStage::Decode, e))?;
        let row =
            LogRow::from_event(event, chrono::Utc::now()).map_err(|e| (FailureStage::Convert, e))?;
        self.store
            .insert(row)
            .await
            .map_err(|e| (FailureStage::Insert, e))
    }
}

/// Sleep for `delay`; false if shutdown was signalled first
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Running,
}

/// Lifecycle state plus counters
#[derive(Debug, Clone, Serialize)]
pub struct MaterializerStatus {
    pub state: ServiceState,
    pub topic: String,
    pub consumer: String,
    pub stats: StatsSnapshot,
}

enum Lifecycle {
    Stopped,
    Running {
        shutdown: watch::Sender<bool>,
        handle: JoinHandle<()>,
    },
}

impl Lifecycle {
    fn is_running(&self) -> bool {
        matches!(self, Lifecycle::Running { handle, .. } if !handle.is_finished())
    }
}

/// Starts and stops the materializer task
///
/// Transitions are serialized by one mutex. A task that exited on its own
/// counts as stopped.
pub struct Supervisor {
    materializer: Materializer,
    lifecycle: Mutex<Lifecycle>,
}

impl Supervisor {
    pub fn new(materializer: Materializer) -> Self {
        Self {
            materializer,
            lifecycle: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Spawn the materializer; fails if it is already running
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_running() {
            return Err(LogError::Lifecycle(
                "materializer is already running".to_string(),
            ));
        }

        let (shutdown, rx) = watch::channel(false);
        let materializer = self.materializer.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = materializer.run(rx).await {
                tracing::error!(error = %e, "Materializer exited with error");
            }
        });

        *lifecycle = Lifecycle::Running { shutdown, handle };
        tracing::info!(topic = %self.materializer.config.topic, "Materializer started");
        Ok(())
    }

    /// Signal shutdown and wait for the task; fails if it is not running
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.is_running() {
            *lifecycle = Lifecycle::Stopped;
            return Err(LogError::Lifecycle("materializer is not running".to_string()));
        }

        if let Lifecycle::Running { shutdown, handle } =
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        {
            let _ = shutdown.send(true);
            handle
                .await
                .map_err(|e| LogError::Internal(format!("Materializer task failed: {}", e)))?;
        }
        Ok(())
    }

    pub async fn state(&self) -> ServiceState {
        if self.lifecycle.lock().await.is_running() {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        }
    }

    pub async fn status(&self) -> MaterializerStatus {
        let config = self.materializer.config();
        MaterializerStatus {
            state: self.state().await,
            topic: config.topic.clone(),
            consumer: config.consumer.clone(),
            stats: self.materializer.stats.snapshot(),
        }
    }

    pub fn stats(&self) -> Arc<MaterializerStats> {
        self.materializer.stats()
    }
}
