//! Error types for vigilant

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur anywhere in the log pipeline
#[derive(Debug, Error)]
pub enum LogError {
    /// A submitted event failed validation (e.g., empty message)
    #[error("Invalid log event: {0}")]
    Validation(String),

    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failure
    #[error("Failed to publish log to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to topic '{topic}': {reason}")]
    Subscribe {
        topic: String,
        reason: String,
    },

    /// Envelope serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stream/topic creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Store insert or query failure
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Invalid lifecycle transition (start while running, stop while stopped)
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal failure (task join, conversion out of range, ...)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Status classification surfaced to RPC callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    InvalidArgument,
    FailedPrecondition,
    Internal,
}

impl LogError {
    /// Classify this error for callers at the service boundary
    pub fn code(&self) -> Code {
        match self {
            LogError::Validation(_) => Code::InvalidArgument,
            LogError::Lifecycle(_) => Code::FailedPrecondition,
            _ => Code::Internal,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, LogError>;
