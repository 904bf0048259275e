//! Query service: filtered, paginated reads as a stream

use crate::error::LogError;
use crate::filter::GetLogsRequest;
use crate::store::{LogStore, LogStream};
use crate::types::now_secs;
use futures::StreamExt;

/// Serves `GetLogs` requests from the store
#[derive(Clone)]
pub struct QueryService {
    store: LogStore,
}

impl QueryService {
    pub fn new(store: LogStore) -> Self {
        Self { store }
    }

    /// Stream events matching `request`, newest first
    ///
    /// Defaults are resolved against the clock at call time. Any failure is
    /// reported as a single `LogError::Internal` item that ends the stream.
    pub fn get_logs(&self, request: &GetLogsRequest) -> LogStream {
        let filter = request.resolve(now_secs());

        tracing::debug!(
            limit = filter.limit,
            offset = filter.offset,
            level = %filter.min_level,
            "Querying logs"
        );

        Box::pin(self.store.query(filter).map(|item| {
            item.map_err(|e| match e {
                LogError::Internal(_) => e,
                other => LogError::Internal(other.to_string()),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;
    use crate::store::LogRow;
    use crate::types::{LogEvent, LogLevel};
    use futures::TryStreamExt;

    async fn seeded() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("logs.db")).unwrap();
        store.ensure_schema(false).await.unwrap();

        let events = [
            LogEvent::new("cache warm").with_level(LogLevel::Debug).with_severity(1),
            LogEvent::new("request served").with_level(LogLevel::Info).with_severity(1),
            LogEvent::new("disk full")
                .with_level(LogLevel::Error)
                .with_severity(5)
                .with_source("node-3"),
            LogEvent::new("no severity").with_level(LogLevel::Warn),
        ];
        for (i, event) in events.into_iter().enumerate() {
            let event = event.with_timestamp(1_000 + i as i64);
            store
                .insert(LogRow::from_event(event, chrono::Utc::now()).unwrap())
                .await
                .unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn test_default_request_applies_info_and_severity() {
        let (_dir, store) = seeded().await;
        let service = QueryService::new(store);

        let rows: Vec<LogEvent> = service
            .get_logs(&GetLogsRequest::default())
            .try_collect()
            .await
            .unwrap();
        let messages: Vec<&str> = rows.iter().map(|e| e.message.as_str()).collect();
        // DEBUG excluded by level, NULL severity excluded by severity >= 1
        assert_eq!(messages, vec!["disk full", "request served"]);
    }

    #[tokio::test]
    async fn test_explicit_filters() {
        let (_dir, store) = seeded().await;
        let service = QueryService::new(store);

        let request = GetLogsRequest {
            source: Some("node-3".into()),
            severity: 5,
            ..Default::default()
        };
        let rows: Vec<LogEvent> = service.get_logs(&request).try_collect().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "disk full");

        let request = GetLogsRequest {
            level: Some(LogLevel::All),
            timestamp: 1_001,
            ..Default::default()
        };
        let rows: Vec<LogEvent> = service.get_logs(&request).try_collect().await.unwrap();
        let messages: Vec<&str> = rows.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["request served", "cache warm"]);
    }

    #[tokio::test]
    async fn test_all_levels_include_unrated_events() {
        let (_dir, store) = seeded().await;
        let service = QueryService::new(store);

        let request = GetLogsRequest {
            level: Some(LogLevel::All),
            ..Default::default()
        };
        let rows: Vec<LogEvent> = service.get_logs(&request).try_collect().await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].message, "no severity");
        assert_eq!(rows[0].severity, None);
    }

    #[tokio::test]
    async fn test_failures_are_internal() {
        let dir = tempfile::tempdir().unwrap();
        // Schema never created: the read fails
        let store = LogStore::open(dir.path().join("logs.db")).unwrap();
        let service = QueryService::new(store);

        let err = service
            .get_logs(&GetLogsRequest::default())
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::Internal(_)));
        assert_eq!(err.code(), Code::Internal);
    }
}
