//! SQLite-backed log store
//!
//! One `logs` table whose columns mirror `LogEvent`, plus a `dead_letters`
//! quarantine table. A single writer connection serves inserts; every query
//! opens its own read connection so reads run concurrently with the writer
//! under WAL snapshot isolation. All SQLite work runs on the blocking pool.

use crate::dlq::{DeadLetter, FailureStage};
use crate::error::{LogError, Result};
use crate::filter::LogFilter;
use crate::types::{LogEvent, LogLevel};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::{Stream, TryStreamExt};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Text layout of `DATETIME` columns (same as SQLite's `CURRENT_TIMESTAMP`)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 0000-01-01 00:00:00 UTC
const MIN_TIME_SECS: i64 = -62_167_219_200;
/// 9999-12-31 23:59:59 UTC
const MAX_TIME_SECS: i64 = 253_402_300_799;

/// Rows buffered between the reader task and the stream consumer
const QUERY_BUFFER: usize = 64;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY,
    message TEXT NOT NULL,
    timestamp DATETIME NOT NULL,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    level TEXT NOT NULL,
    severity INTEGER,
    source TEXT,
    "group" TEXT,
    tags TEXT,
    type TEXT,
    origin TEXT,
    data TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs (timestamp DESC, id DESC);
CREATE TABLE IF NOT EXISTS dead_letters (
    id TEXT PRIMARY KEY,
    topic TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    num_delivered INTEGER NOT NULL,
    stage TEXT NOT NULL,
    reason TEXT NOT NULL,
    payload BLOB NOT NULL,
    dead_lettered_at INTEGER NOT NULL
);
"#;

/// Lazily read, finite sequence of query results
///
/// Dropping it stops the reader and releases its cursor.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogEvent>> + Send>>;

/// Convert unix seconds to a UTC datetime the store can represent
pub fn to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    if !(MIN_TIME_SECS..=MAX_TIME_SECS).contains(&secs) {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// Format unix seconds as a `DATETIME` value, clamped to the storable range
pub fn format_time(secs: i64) -> String {
    to_datetime(secs.clamp(MIN_TIME_SECS, MAX_TIME_SECS))
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_time(text: &str) -> Result<i64> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc().timestamp())
        .map_err(|e| LogError::Internal(format!("Invalid stored timestamp '{}': {}", text, e)))
}

/// An event converted to its stored representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub id: Option<i64>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub severity: Option<u32>,
    pub source: Option<String>,
    pub group: Option<String>,
    pub tags: Option<String>,
    pub kind: Option<String>,
    pub origin: Option<String>,
    /// `data` as a JSON object
    pub data: String,
}

impl LogRow {
    /// Convert a decoded event; an absent timestamp becomes `now`
    pub fn from_event(event: LogEvent, now: DateTime<Utc>) -> Result<Self> {
        let timestamp = match event.timestamp {
            Some(secs) => to_datetime(secs).ok_or_else(|| {
                LogError::Internal(format!("timestamp {} is outside the storable range", secs))
            })?,
            None => now,
        };

        Ok(Self {
            id: event.id,
            message: event.message,
            timestamp,
            level: event.level.as_str().to_string(),
            severity: event.severity,
            source: event.source,
            group: event.group,
            tags: event.tags,
            kind: event.kind,
            origin: event.origin,
            data: serde_json::to_string(&event.data)?,
        })
    }
}

/// Durable table of log events
#[derive(Clone)]
pub struct LogStore {
    path: Arc<PathBuf>,
    writer: Arc<Mutex<Connection>>,
}

impl LogStore {
    /// Open (or create) the database file and its writer connection
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                LogError::Config(format!(
                    "Failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        tracing::info!(path = %path.display(), journal_mode = %mode, "Log store opened");

        Ok(Self {
            path: Arc::new(path),
            writer: Arc::new(Mutex::new(conn)),
        })
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the tables if absent
    ///
    /// With `recreate`, the `logs` table is dropped first and every stored
    /// row is lost.
    pub async fn ensure_schema(&self, recreate: bool) -> Result<()> {
        self.with_writer(move |conn| {
            if recreate {
                tracing::warn!("Dropping logs table; all stored rows are discarded");
                conn.execute_batch("DROP TABLE IF EXISTS logs;")?;
            }
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    /// Append one row, returning its id
    pub async fn insert(&self, row: LogRow) -> Result<i64> {
        self.with_writer(move |conn| {
            conn.execute(
                r#"INSERT INTO logs
                   (id, message, timestamp, level, severity, source, "group", tags, type, origin, data)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                params![
                    row.id,
                    row.message,
                    row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    row.level,
                    row.severity,
                    row.source,
                    row.group,
                    row.tags,
                    row.kind,
                    row.origin,
                    row.data,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Stream rows matching `filter`, newest first
    ///
    /// Rows are sent as they are read. A failure ends the stream with a
    /// single `Err` item.
    pub fn query(&self, filter: LogFilter) -> LogStream {
        let (tx, rx) = mpsc::channel(QUERY_BUFFER);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = stream_rows(&path, &filter, &tx) {
                tracing::warn!(error = %e, "Log query aborted");
                let _ = tx.blocking_send(Err(e));
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Collect a query into memory
    pub async fn fetch(&self, filter: LogFilter) -> Result<Vec<LogEvent>> {
        self.query(filter).try_collect().await
    }

    /// Total rows in the `logs` table
    pub async fn count(&self) -> Result<u64> {
        self.with_reader(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
    }

    /// Write a dead letter into the quarantine table
    pub async fn quarantine(&self, letter: DeadLetter) -> Result<()> {
        self.with_writer(move |conn| {
            conn.execute(
                "INSERT INTO dead_letters
                 (id, topic, sequence, num_delivered, stage, reason, payload, dead_lettered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    letter.id,
                    letter.topic,
                    to_sql_int(letter.sequence),
                    to_sql_int(letter.num_delivered),
                    letter.stage.as_str(),
                    letter.reason,
                    letter.payload.as_ref(),
                    to_sql_int(letter.dead_lettered_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Most recent dead letters first
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_reader(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, topic, sequence, num_delivered, stage, reason, payload, dead_lettered_at
                 FROM dead_letters ORDER BY dead_lettered_at DESC, rowid DESC LIMIT ?1",
            )?;
            let letters = stmt
                .query_map([limit], |row| {
                    let stage: String = row.get(4)?;
                    let payload: Vec<u8> = row.get(6)?;
                    Ok(DeadLetter {
                        id: row.get(0)?,
                        topic: row.get(1)?,
                        sequence: from_sql_int(row.get(2)?),
                        num_delivered: from_sql_int(row.get(3)?),
                        stage: FailureStage::parse(&stage),
                        reason: row.get(5)?,
                        payload: Bytes::from(payload),
                        dead_lettered_at: from_sql_int(row.get(7)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(letters)
        })
        .await
    }

    /// Number of quarantined messages
    pub async fn dead_letter_count(&self) -> Result<usize> {
        self.with_reader(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM dead_letters", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn with_writer<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = writer
                .lock()
                .map_err(|e| LogError::Internal(format!("Store writer lock poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| LogError::Internal(format!("Store task failed: {}", e)))?
    }

    async fn with_reader<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_reader(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| LogError::Internal(format!("Store task failed: {}", e)))?
    }
}

fn open_reader(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn stream_rows(
    path: &Path,
    filter: &LogFilter,
    tx: &mpsc::Sender<Result<LogEvent>>,
) -> Result<()> {
    let conn = open_reader(path)?;
    let (sql, params) = filter.to_sql();
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;

    let mut sent = 0usize;
    while let Some(row) = rows.next()? {
        let event = row_to_event(row)?;
        if tx.blocking_send(Ok(event)).is_err() {
            tracing::debug!(sent, "Query stream dropped by consumer");
            return Ok(());
        }
        sent += 1;
    }

    tracing::debug!(sent, "Query stream finished");
    Ok(())
}

fn row_to_event(row: &Row<'_>) -> Result<LogEvent> {
    let timestamp: String = row.get(2)?;
    let level: String = row.get(3)?;
    let data: Option<String> = row.get(10)?;

    let data = match data.as_deref() {
        Some(json) if !json.is_empty() => serde_json::from_str::<HashMap<String, String>>(json)?,
        _ => HashMap::new(),
    };

    Ok(LogEvent {
        id: Some(row.get(0)?),
        message: row.get(1)?,
        timestamp: Some(parse_time(&timestamp)?),
        level: LogLevel::parse(&level),
        severity: row.get(4)?,
        source: row.get(5)?,
        group: row.get(6)?,
        tags: row.get(7)?,
        kind: row.get(8)?,
        origin: row.get(9)?,
        data,
    })
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn test_store() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("logs.db")).unwrap();
        store.ensure_schema(false).await.unwrap();
        (dir, store)
    }

    fn row(message: &str, ts: i64, level: LogLevel) -> LogRow {
        let event = LogEvent::new(message).with_timestamp(ts).with_level(level).with_severity(1);
        LogRow::from_event(event, Utc::now()).unwrap()
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00");
        assert_eq!(format_time(1_700_000_000), "2023-11-14 22:13:20");
        assert_eq!(format_time(i64::MAX), "9999-12-31 23:59:59");
        assert_eq!(parse_time("2023-11-14 22:13:20").unwrap(), 1_700_000_000);
        assert!(to_datetime(i64::MIN).is_none());
    }

    #[test]
    fn test_row_conversion() {
        let now = Utc::now();
        let event = LogEvent::new("disk full")
            .with_level(LogLevel::Error)
            .with_data("k", "v");
        let row = LogRow::from_event(event, now).unwrap();
        assert_eq!(row.level, "ERROR");
        assert_eq!(row.timestamp, now);
        assert_eq!(row.data, r#"{"k":"v"}"#);

        let out_of_range = LogEvent::new("far future").with_timestamp(i64::MAX);
        assert!(LogRow::from_event(out_of_range, now).is_err());
    }

    #[tokio::test]
    async fn test_insert_and_fetch_roundtrip() {
        let (_dir, store) = test_store().await;

        let event = LogEvent::new("disk full")
            .with_timestamp(1_700_000_000)
            .with_level(LogLevel::Error)
            .with_severity(5)
            .with_source("node-3")
            .with_group("storage")
            .with_tags("prod")
            .with_kind("alert")
            .with_origin("host-1")
            .with_data("k", "v")
            .with_data("n", "2");
        let id = store
            .insert(LogRow::from_event(event.clone(), Utc::now()).unwrap())
            .await
            .unwrap();

        let rows = store.fetch(LogFilter::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], event.with_id(id));
    }

    #[tokio::test]
    async fn test_absent_fields_stay_absent() {
        let (_dir, store) = test_store().await;
        store
            .insert(LogRow::from_event(LogEvent::new("bare"), Utc::now()).unwrap())
            .await
            .unwrap();

        let rows = store.fetch(LogFilter::default()).await.unwrap();
        assert!(rows[0].severity.is_none());
        assert!(rows[0].source.is_none());
        assert!(rows[0].timestamp.is_some());
        assert!(rows[0].data.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (_dir, store) = test_store().await;
        let event = LogEvent::new("first").with_id(7);
        store
            .insert(LogRow::from_event(event, Utc::now()).unwrap())
            .await
            .unwrap();

        let dup = LogEvent::new("second").with_id(7);
        let err = store
            .insert(LogRow::from_event(dup, Utc::now()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::Store(_)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_orders_newest_first_and_paginates() {
        let (_dir, store) = test_store().await;
        for (i, ts) in [100, 300, 200].into_iter().enumerate() {
            store
                .insert(row(&format!("m{}", i), ts, LogLevel::Info))
                .await
                .unwrap();
        }

        let all = store.fetch(LogFilter::default()).await.unwrap();
        let stamps: Vec<i64> = all.iter().filter_map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);

        let page = store
            .fetch(LogFilter {
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].timestamp, Some(200));
    }

    #[tokio::test]
    async fn test_query_applies_predicates() {
        let (_dir, store) = test_store().await;
        store.insert(row("debug noise", 10, LogLevel::Debug)).await.unwrap();
        store.insert(row("warn disk", 20, LogLevel::Warn)).await.unwrap();
        store.insert(row("error disk", 30, LogLevel::Error)).await.unwrap();
        store.insert(row("error net", 40, LogLevel::Error)).await.unwrap();

        let warn_up = store
            .fetch(LogFilter {
                min_level: LogLevel::Warn,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(warn_up.len(), 3);

        let disk_before_25 = store
            .fetch(LogFilter {
                message_contains: Some("disk".into()),
                until: Some(25),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(disk_before_25.len(), 1);
        assert_eq!(disk_before_25[0].message, "warn disk");

        let severe = store
            .fetch(LogFilter {
                min_severity: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(severe.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_data_aborts_stream() {
        let (_dir, store) = test_store().await;
        store.insert(row("good", 10, LogLevel::Info)).await.unwrap();
        let mut bad = row("bad", 20, LogLevel::Info);
        bad.data = "not json".to_string();
        store.insert(bad).await.unwrap();

        let mut stream = store.query(LogFilter::default());
        // Newest row is the corrupt one
        let first = stream.next().await.unwrap();
        assert!(first.is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_reader() {
        let (_dir, store) = test_store().await;
        for i in 0..(QUERY_BUFFER as i64 * 3) {
            store.insert(row("bulk", i, LogLevel::Info)).await.unwrap();
        }

        let mut stream = store.query(LogFilter {
            limit: 1_000,
            ..Default::default()
        });
        assert!(stream.next().await.unwrap().is_ok());
        drop(stream);

        // Writer is still usable after the abandoned read
        store.insert(row("after", 999, LogLevel::Info)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), QUERY_BUFFER as u64 * 3 + 1);
    }

    #[tokio::test]
    async fn test_recreate_drops_rows() {
        let (_dir, store) = test_store().await;
        store.insert(row("old", 1, LogLevel::Info)).await.unwrap();

        store.ensure_schema(false).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.ensure_schema(true).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quarantine_roundtrip() {
        let (_dir, store) = test_store().await;
        let letter = DeadLetter {
            id: "dlq-1".into(),
            topic: "logs".into(),
            sequence: 9,
            num_delivered: 1,
            stage: FailureStage::Decode,
            reason: "expected value".into(),
            payload: Bytes::from_static(b"\xffnot json"),
            dead_lettered_at: 1_700_000_000_000,
        };
        store.quarantine(letter).await.unwrap();

        assert_eq!(store.dead_letter_count().await.unwrap(), 1);
        let letters = store.dead_letters(10).await.unwrap();
        assert_eq!(letters[0].sequence, 9);
        assert_eq!(letters[0].stage, FailureStage::Decode);
        assert_eq!(letters[0].payload, Bytes::from_static(b"\xffnot json"));
    }
}
