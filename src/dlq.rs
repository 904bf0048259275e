//! Dead letters: messages the materializer could not turn into a row
//!
//! A message that fails to decode, convert, or insert is handed to a
//! `DlqHandler` together with its raw payload and broker position, then
//! acknowledged so it never blocks the messages behind it.

use crate::error::Result;
use crate::store::LogStore;
use crate::types::{now_millis, Delivery};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Materializer step at which a message failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Payload was not a valid envelope
    Decode,
    /// Envelope could not be mapped to a row
    Convert,
    /// Store rejected the row
    Insert,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Decode => "decode",
            FailureStage::Convert => "convert",
            FailureStage::Insert => "insert",
        }
    }

    /// Unknown names read back as `Decode`
    pub fn parse(s: &str) -> Self {
        match s {
            "convert" => FailureStage::Convert,
            "insert" => FailureStage::Insert,
            _ => FailureStage::Decode,
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message that was skipped, with the context needed to replay it
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: String,
    pub topic: String,
    /// Broker sequence of the message
    pub sequence: u64,
    pub num_delivered: u64,
    pub stage: FailureStage,
    pub reason: String,
    /// Raw message body, as received
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Bytes,
    /// Unix timestamp in milliseconds
    pub dead_lettered_at: u64,
}

impl DeadLetter {
    pub fn new(delivery: &Delivery, stage: FailureStage, reason: impl Into<String>) -> Self {
        Self {
            id: format!("dlq-{}", uuid::Uuid::new_v4()),
            topic: delivery.topic.clone(),
            sequence: delivery.sequence,
            num_delivered: delivery.num_delivered,
            stage,
            reason: reason.into(),
            payload: delivery.payload.clone(),
            dead_lettered_at: now_millis(),
        }
    }
}

fn serialize_payload<S: Serializer>(payload: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

/// Destination for dead letters
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Record one dead letter
    async fn handle(&self, letter: DeadLetter) -> Result<()>;

    /// Number of dead letters held
    async fn count(&self) -> Result<usize>;

    /// Most recent dead letters first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// In-memory DLQ handler for development and testing
///
/// Holds at most `max_events` letters; the oldest are dropped first.
pub struct MemoryDlqHandler {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
    max_events: usize,
}

impl MemoryDlqHandler {
    /// `max_events == 0` means unbounded
    pub fn new(max_events: usize) -> Self {
        Self {
            letters: Arc::new(RwLock::new(Vec::new())),
            max_events,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, letter: DeadLetter) -> Result<()> {
        log_dead_letter(&letter);

        let mut letters = self.letters.write().await;
        letters.push(letter);

        if self.max_events > 0 && letters.len() > self.max_events {
            let excess = letters.len() - self.max_events;
            letters.drain(..excess);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.letters.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let letters = self.letters.read().await;
        Ok(letters.iter().rev().take(limit).cloned().collect())
    }
}

/// Quarantines dead letters in the store's `dead_letters` table
pub struct StoreDlqHandler {
    store: LogStore,
}

impl StoreDlqHandler {
    pub fn new(store: LogStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DlqHandler for StoreDlqHandler {
    async fn handle(&self, letter: DeadLetter) -> Result<()> {
        log_dead_letter(&letter);
        self.store.quarantine(letter).await
    }

    async fn count(&self) -> Result<usize> {
        self.store.dead_letter_count().await
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        self.store.dead_letters(limit).await
    }
}

fn log_dead_letter(letter: &DeadLetter) {
    tracing::warn!(
        topic = %letter.topic,
        sequence = letter.sequence,
        num_delivered = letter.num_delivered,
        stage = %letter.stage,
        reason = %letter.reason,
        "Log message dead-lettered"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(sequence: u64) -> Delivery {
        Delivery {
            payload: Bytes::from_static(b"{not json"),
            sequence,
            num_delivered: 1,
            topic: "logs".to_string(),
        }
    }

    #[test]
    fn test_dead_letter_creation() {
        let letter = DeadLetter::new(&delivery(7), FailureStage::Decode, "expected value");
        assert!(letter.id.starts_with("dlq-"));
        assert_eq!(letter.sequence, 7);
        assert_eq!(letter.topic, "logs");
        assert_eq!(letter.payload, Bytes::from_static(b"{not json"));
        assert!(letter.dead_lettered_at > 0);
    }

    #[test]
    fn test_stage_names() {
        for stage in [FailureStage::Decode, FailureStage::Convert, FailureStage::Insert] {
            assert_eq!(FailureStage::parse(stage.as_str()), stage);
        }
        let json = serde_json::to_value(DeadLetter::new(&delivery(1), FailureStage::Insert, "x"))
            .unwrap();
        assert_eq!(json["stage"], "insert");
        assert_eq!(json["payload"], "{not json");
    }

    #[tokio::test]
    async fn test_memory_dlq_list_newest_first() {
        let dlq = MemoryDlqHandler::default();
        assert_eq!(dlq.count().await.unwrap(), 0);

        for i in 0..5 {
            dlq.handle(DeadLetter::new(&delivery(i), FailureStage::Decode, format!("reason {}", i)))
                .await
                .unwrap();
        }

        let list = dlq.list(3).await.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].reason, "reason 4");
        assert_eq!(list[2].reason, "reason 2");
    }

    #[tokio::test]
    async fn test_memory_dlq_max_capacity() {
        let dlq = MemoryDlqHandler::new(3);
        for i in 0..5 {
            dlq.handle(DeadLetter::new(&delivery(i), FailureStage::Convert, format!("reason {}", i)))
                .await
                .unwrap();
        }

        assert_eq!(dlq.count().await.unwrap(), 3);
        let list = dlq.list(10).await.unwrap();
        assert_eq!(list[0].sequence, 4);
        assert_eq!(list[2].sequence, 2);
    }

    #[tokio::test]
    async fn test_store_dlq_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("logs.db")).unwrap();
        store.ensure_schema(false).await.unwrap();

        let dlq = StoreDlqHandler::new(store.clone());
        dlq.handle(DeadLetter::new(&delivery(3), FailureStage::Insert, "UNIQUE constraint failed"))
            .await
            .unwrap();

        assert_eq!(dlq.count().await.unwrap(), 1);
        let list = dlq.list(10).await.unwrap();
        assert_eq!(list[0].sequence, 3);
        assert_eq!(list[0].stage, FailureStage::Insert);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
