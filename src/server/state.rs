use std::sync::Arc;

use crate::config::{BrokerKind, DeadLetterKind, VigilantConfig};
use crate::dlq::{DlqHandler, MemoryDlqHandler, StoreDlqHandler};
use crate::error::Result;
use crate::ingest::IngestService;
use crate::materializer::{Materializer, Supervisor};
use crate::provider::memory::{MemoryConfig, MemoryProvider};
use crate::provider::nats::NatsProvider;
use crate::provider::LogProvider;
use crate::publisher::Publisher;
use crate::query::QueryService;
use crate::state::{FileOffsetStore, MemoryOffsetStore, OffsetStore};
use crate::store::LogStore;

/// Shared application state accessible to all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub publisher: Publisher,
    pub ingest: IngestService,
    pub query: QueryService,
    pub supervisor: Arc<Supervisor>,
    pub dlq: Arc<dyn DlqHandler>,
}

impl AppState {
    /// Wire the pipeline from already-built parts.
    pub fn new(
        provider: Arc<dyn LogProvider>,
        store: LogStore,
        dlq: Arc<dyn DlqHandler>,
        offsets: Arc<dyn OffsetStore>,
        config: &VigilantConfig,
    ) -> Self {
        let publisher = Publisher::new(provider.clone(), config.broker.topic.clone());
        let materializer = Materializer::new(
            provider,
            store.clone(),
            dlq.clone(),
            offsets,
            config.materializer_config(),
        );

        Self {
            ingest: IngestService::new(publisher.clone()),
            publisher,
            query: QueryService::new(store),
            supervisor: Arc::new(Supervisor::new(materializer)),
            dlq,
        }
    }

    /// Connect the broker, open the store, and wire the pipeline.
    pub async fn from_config(config: &VigilantConfig) -> Result<Self> {
        let provider: Arc<dyn LogProvider> = match config.broker.kind {
            BrokerKind::Memory => Arc::new(MemoryProvider::new(MemoryConfig {
                max_messages: config.broker.memory_max_messages,
            })),
            BrokerKind::Nats => Arc::new(NatsProvider::connect(config.broker.nats.clone()).await?),
        };

        let store = LogStore::open(&config.store.path)?;
        // Queries must work before the materializer first runs
        store.ensure_schema(false).await?;

        let dlq: Arc<dyn DlqHandler> = match config.dead_letter.kind {
            DeadLetterKind::Store => Arc::new(StoreDlqHandler::new(store.clone())),
            DeadLetterKind::Memory => Arc::new(MemoryDlqHandler::new(config.dead_letter.max_events)),
        };

        let offsets: Arc<dyn OffsetStore> = match &config.materializer.offsets_path {
            Some(path) => Arc::new(FileOffsetStore::new(path)),
            None => Arc::new(MemoryOffsetStore::default()),
        };

        tracing::info!(
            provider = provider.name(),
            topic = %config.broker.topic,
            store = %config.store.path.display(),
            "Pipeline initialized"
        );

        Ok(Self::new(provider, store, dlq, offsets, config))
    }
}
