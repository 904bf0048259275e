//! TOML configuration for the vigilant server

use crate::error::{LogError, Result};
use crate::materializer::MaterializerConfig;
use crate::provider::nats::NatsConfig;
use crate::types::DeliverPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings; every section and field may be omitted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilantConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub materializer: MaterializerSection,
    #[serde(default)]
    pub dead_letter: DeadLetterConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address for the HTTP server (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process topics; nothing survives a restart
    #[default]
    Memory,
    Nats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub kind: BrokerKind,

    /// Topic log events are published to
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Messages retained per topic by the memory broker (0 = unlimited)
    #[serde(default = "default_memory_max_messages")]
    pub memory_max_messages: usize,

    #[serde(default)]
    pub nats: NatsConfig,
}

fn default_topic() -> String {
    "logs".to_string()
}

fn default_memory_max_messages() -> usize {
    100_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            topic: default_topic(),
            memory_max_messages: default_memory_max_messages(),
            nats: NatsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Drop the logs table every time the materializer starts
    #[serde(default)]
    pub recreate_on_start: bool,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/logs.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            recreate_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializerSection {
    /// Consumer name used for offsets and the durable consumer
    #[serde(default = "default_consumer")]
    pub consumer: String,

    /// Longest single wait for the next message, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Start position when no offset has been saved
    #[serde(default)]
    pub deliver_policy: DeliverPolicy,

    /// Offset file; offsets are kept in memory when unset
    ///
    /// Memory broker sequences restart at 1 with the process, so only set
    /// this for a durable broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsets_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_wait_secs: Option<u64>,

    /// Start the materializer together with the server
    #[serde(default = "default_true")]
    pub autostart: bool,
}

fn default_consumer() -> String {
    "materializer".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for MaterializerSection {
    fn default() -> Self {
        Self {
            consumer: default_consumer(),
            poll_interval_ms: default_poll_interval_ms(),
            deliver_policy: DeliverPolicy::default(),
            offsets_path: None,
            ack_wait_secs: None,
            autostart: default_true(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterKind {
    /// Quarantine table in the log store
    #[default]
    Store,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    #[serde(default)]
    pub kind: DeadLetterKind,

    /// Capacity of the memory handler (0 = unbounded)
    #[serde(default = "default_dlq_max_events")]
    pub max_events: usize,
}

fn default_dlq_max_events() -> usize {
    10_000
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            kind: DeadLetterKind::default(),
            max_events: default_dlq_max_events(),
        }
    }
}

impl VigilantConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            LogError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            LogError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| LogError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LogError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Returns the server bind address string (e.g., "127.0.0.1:8080")
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn materializer_config(&self) -> MaterializerConfig {
        MaterializerConfig {
            topic: self.broker.topic.clone(),
            consumer: self.materializer.consumer.clone(),
            poll_interval: Duration::from_millis(self.materializer.poll_interval_ms.max(1)),
            deliver_policy: self.materializer.deliver_policy.clone(),
            recreate_on_start: self.store.recreate_on_start,
            ack_wait_secs: self.materializer.ack_wait_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VigilantConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.broker.kind, BrokerKind::Memory);
        assert_eq!(config.broker.topic, "logs");
        assert!(!config.store.recreate_on_start);
        assert_eq!(config.materializer.poll_interval_ms, 1_000);
        assert_eq!(config.materializer.deliver_policy, DeliverPolicy::New);
        assert!(config.materializer.autostart);
        assert_eq!(config.dead_letter.kind, DeadLetterKind::Store);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = VigilantConfig::parse(
            r#"
            [server]
            port = 9000

            [broker]
            kind = "nats"

            [broker.nats]
            url = "nats://broker:4222"

            [store]
            path = "/var/lib/vigilant/logs.db"
            recreate_on_start = true

            [materializer]
            poll_interval_ms = 250
            deliver_policy = { type = "all" }
            offsets_path = "/var/lib/vigilant/offsets.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.broker.kind, BrokerKind::Nats);
        assert_eq!(config.broker.nats.url, "nats://broker:4222");
        assert_eq!(config.broker.nats.stream_name, "LOGS");
        assert!(config.store.recreate_on_start);

        let materializer = config.materializer_config();
        assert_eq!(materializer.poll_interval, Duration::from_millis(250));
        assert_eq!(materializer.deliver_policy, DeliverPolicy::All);
        assert!(materializer.recreate_on_start);
        assert_eq!(materializer.consumer, "materializer");
        assert_eq!(
            config.materializer.offsets_path,
            Some(PathBuf::from("/var/lib/vigilant/offsets.json"))
        );
    }

    #[test]
    fn test_rejects_unknown_broker() {
        let err = VigilantConfig::parse("[broker]\nkind = \"kafka\"\n").unwrap_err();
        assert!(matches!(err, LogError::Config(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let rendered = VigilantConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[server]"));

        let parsed = VigilantConfig::parse(&rendered).unwrap();
        assert_eq!(parsed.bind_address(), "127.0.0.1:8080");
        assert!(parsed.materializer.offsets_path.is_none());
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VigilantConfig::load(dir.path().join("vigilant.toml")).unwrap();
        assert_eq!(config.broker.topic, "logs");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigilant.toml");
        std::fs::write(&path, "[dead_letter]\nkind = \"memory\"\nmax_events = 5\n").unwrap();

        let config = VigilantConfig::load(&path).unwrap();
        assert_eq!(config.dead_letter.kind, DeadLetterKind::Memory);
        assert_eq!(config.dead_letter.max_events, 5);
    }
}
