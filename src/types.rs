//! Core log types for the vigilant pipeline
//!
//! `LogEvent` is both the ingestion input and the wire envelope on the broker
//! topic. Optional fields are omitted when absent and read back as absent, so
//! a missing key never turns into a zero value.

use bytes::Bytes;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Log level
///
/// `All` and `None` are sentinels used by queries. An unrecognized level on
/// the wire normalizes to `All`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LogLevel {
    #[default]
    All,
    None,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Every level in ordinal order
    pub const VARIANTS: [LogLevel; 6] = [
        LogLevel::All,
        LogLevel::None,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    /// Textual form used on the wire and in the store
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::All => "ALL",
            LogLevel::None => "NONE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parse a level name or a numeric ordinal, case-insensitively.
    /// Unknown names map to `All`.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        if let Ok(ordinal) = trimmed.parse::<u64>() {
            return Self::from_ordinal(ordinal);
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "NONE" => LogLevel::None,
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::All,
        }
    }

    /// Map a numeric ordinal (ALL=0 .. ERROR=5). Out of range maps to `All`.
    pub fn from_ordinal(ordinal: u64) -> Self {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| Self::VARIANTS.get(i).copied())
            .unwrap_or(LogLevel::All)
    }

    /// Severity rank for genuine levels; sentinels have none
    pub fn rank(&self) -> Option<u8> {
        match self {
            LogLevel::Debug => Some(1),
            LogLevel::Info => Some(2),
            LogLevel::Warn => Some(3),
            LogLevel::Error => Some(4),
            LogLevel::All | LogLevel::None => None,
        }
    }

    /// Genuine levels at or above this one
    ///
    /// Empty for the sentinels, which do not act as a threshold.
    pub fn at_or_above(&self) -> Vec<LogLevel> {
        match self.rank() {
            Some(min) => Self::VARIANTS
                .iter()
                .copied()
                .filter(|l| l.rank().is_some_and(|r| r >= min))
                .collect(),
            None => Vec::new(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = LogLevel;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a log level name or ordinal")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<LogLevel, E> {
                Ok(LogLevel::parse(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<LogLevel, E> {
                Ok(LogLevel::from_ordinal(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<LogLevel, E> {
                Ok(u64::try_from(v).map(LogLevel::from_ordinal).unwrap_or_default())
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> std::result::Result<LogLevel, E> {
                Ok(LogLevel::All)
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> std::result::Result<LogLevel, E> {
                Ok(LogLevel::All)
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<LogLevel, E> {
                Ok(LogLevel::All)
            }
        }

        deserializer.deserialize_any(LevelVisitor)
    }
}

/// A single log occurrence
///
/// Only `message` is required. Everything else is optional and stays absent
/// end to end unless the caller supplied it; `timestamp` is filled in at
/// materialization time when missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Caller-supplied id; the store assigns one when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub message: String,

    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default)]
    pub level: LogLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,

    /// Event category (`type` on the wire)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl LogEvent {
    /// Create an event with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, unix_secs: i64) -> Self {
        self.timestamp = Some(unix_secs);
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_severity(mut self, severity: u32) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Add a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Acknowledgement returned by a successful submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

/// A raw message pulled from a topic, before decoding
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Envelope bytes as published
    pub payload: Bytes,

    /// Provider-assigned sequence number (1-based)
    pub sequence: u64,

    /// Number of delivery attempts
    pub num_delivered: u64,

    /// Topic the message was read from
    pub topic: String,
}

/// Where a new subscription starts reading from the topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DeliverPolicy {
    /// Deliver all retained messages
    All,
    /// Deliver only messages published after the subscription
    #[default]
    New,
    /// Deliver starting from a specific sequence number
    ByStartSequence { sequence: u64 },
}

/// Options for creating subscriptions
///
/// Unsupported options are ignored by providers that don't support them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOptions {
    /// Where to start consuming from
    #[serde(default)]
    pub deliver_policy: DeliverPolicy,

    /// How long to wait for an ack before redelivery (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_wait_secs: Option<u64>,

    /// Maximum number of unacknowledged messages in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ack_pending: Option<i64>,
}

/// Current time in Unix seconds
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
