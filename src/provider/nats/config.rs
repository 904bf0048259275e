//! NATS provider configuration

use serde::{Deserialize, Serialize};

/// JetStream storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Persist messages on disk
    #[default]
    File,
    /// Keep messages in server memory only
    Memory,
}

/// Connection and stream settings for NATS JetStream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL (e.g., nats://127.0.0.1:4222)
    pub url: String,

    /// JetStream stream backing the log topics
    pub stream_name: String,

    /// Subjects captured by the stream; topics are published as subjects
    pub subjects: Vec<String>,

    pub storage: StorageType,

    /// Maximum messages retained by the stream (-1 = unlimited)
    pub max_events: i64,

    /// Maximum message age in seconds (0 = unlimited)
    pub max_age_secs: u64,

    /// Maximum stream size in bytes (-1 = unlimited)
    pub max_bytes: i64,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,

    /// Optional auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream_name: "LOGS".to_string(),
            subjects: vec!["logs".to_string(), "logs.>".to_string()],
            storage: StorageType::File,
            max_events: -1,
            max_age_secs: 0,
            max_bytes: -1,
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            token: None,
        }
    }
}
