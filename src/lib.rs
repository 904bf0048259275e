//! # vigilant
//!
//! Log event pipeline: producers submit structured log events, a broker
//! topic decouples them from storage, a materializer drains the topic into
//! SQLite, and a query service streams filtered pages back out.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use vigilant::{IngestService, LogEvent, LogLevel, MemoryProvider, Publisher};
//!
//! # async fn example() -> vigilant::Result<()> {
//! let provider = MemoryProvider::default();
//! let ingest = IngestService::new(Publisher::new(Arc::new(provider), "logs"));
//!
//! let ack = ingest
//!     .submit(LogEvent::new("disk full").with_level(LogLevel::Error).with_source("node-3"))
//!     .await?;
//! assert!(ack.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory** - In-process topics for testing and single-process use
//! - **nats** - NATS JetStream for durable, distributed delivery
//!
//! ## Architecture
//!
//! - **IngestService** - validates and publishes one event per call
//! - **LogProvider** trait - broker abstraction all backends implement
//! - **Materializer** / **Supervisor** - topic → store, with a start/stop lifecycle
//! - **LogStore** - SQLite table of events plus a dead-letter quarantine
//! - **QueryService** - defaulting, predicates, and streamed results

pub mod config;
pub mod dlq;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod materializer;
pub mod provider;
pub mod publisher;
pub mod query;
pub mod server;
pub mod state;
pub mod store;
pub mod types;

// Re-export core types
pub use dlq::{DeadLetter, DlqHandler, FailureStage, MemoryDlqHandler, StoreDlqHandler};
pub use error::{Code, LogError, Result};
pub use filter::{GetLogsRequest, LogFilter};
pub use ingest::IngestService;
pub use materializer::{
    Materializer, MaterializerConfig, MaterializerStats, ServiceState, StatsSnapshot, Supervisor,
};
pub use provider::{LogProvider, PendingDelivery, ProviderInfo, Subscription};
pub use publisher::Publisher;
pub use query::QueryService;
pub use state::{FileOffsetStore, MemoryOffsetStore, OffsetStore};
pub use store::{LogRow, LogStore, LogStream};
pub use types::{Ack, DeliverPolicy, Delivery, LogEvent, LogLevel, SubscribeOptions};

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryProvider};
pub use provider::nats::{NatsClient, NatsConfig, NatsProvider, NatsSubscription, StorageType};
