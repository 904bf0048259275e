//! Ingestion endpoint: validate one event and publish it

use crate::error::{LogError, Result};
use crate::publisher::Publisher;
use crate::types::{Ack, LogEvent};

/// Accepts log events from producers
///
/// Applies no defaults: the event is forwarded unchanged. Exactly one
/// publish attempt is made per call.
#[derive(Clone)]
pub struct IngestService {
    publisher: Publisher,
}

impl IngestService {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    /// Validate and publish one event
    ///
    /// Fails with `LogError::Validation` when `message` is empty; broker
    /// failures are returned unchanged.
    pub async fn submit(&self, event: LogEvent) -> Result<Ack> {
        validate(&event)?;

        tracing::debug!(
            level = %event.level,
            source = event.source.as_deref().unwrap_or(""),
            "Received log"
        );

        if let Err(e) = self.publisher.publish(&event).await {
            tracing::warn!(error = %e, "Failed to publish log");
            return Err(e);
        }

        Ok(Ack { success: true })
    }
}

fn validate(event: &LogEvent) -> Result<()> {
    if event.message.is_empty() {
        return Err(LogError::Validation("message must not be empty".to_string()));
    }
    Ok(())
}
