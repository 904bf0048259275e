//! Query requests, defaulting, and the predicate builder
//!
//! A `GetLogsRequest` is what callers send. `resolve` applies the defaulting
//! rules and yields a `LogFilter`: one optional predicate per field, rendered
//! uniformly into SQL with bound parameters.

use crate::store::format_time;
use crate::types::LogLevel;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Page size used when a request leaves `limit` at 0
pub const DEFAULT_LIMIT: u32 = 100;

/// Minimum severity used when a request leaves `severity` at 0
///
/// Not applied when the level is `ALL` and no severity was given, so unrated
/// events stay reachable.
pub const DEFAULT_SEVERITY: u32 = 1;

/// Level threshold used when a request leaves `level` unset or NONE
pub const DEFAULT_LEVEL: LogLevel = LogLevel::Info;

/// Filter and pagination request for `GetLogs`
///
/// Zero and empty values mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetLogsRequest {
    pub limit: u32,
    pub offset: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Substring of the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Minimum level; `ALL` disables the level predicate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    /// Minimum severity; 0 with `level=ALL` disables the severity predicate
    pub severity: u32,
    /// Upper bound on event time, unix seconds
    pub timestamp: i64,
}

impl GetLogsRequest {
    /// Apply the defaulting rules against the given clock reading
    pub fn resolve(&self, now: i64) -> LogFilter {
        let level = match self.level {
            None | Some(LogLevel::None) => DEFAULT_LEVEL,
            Some(level) => level,
        };

        LogFilter {
            limit: if self.limit == 0 { DEFAULT_LIMIT } else { self.limit },
            offset: self.offset,
            min_level: level,
            min_severity: match (self.severity, level) {
                (0, LogLevel::All) => None,
                (0, _) => Some(DEFAULT_SEVERITY),
                (min, _) => Some(min),
            },
            until: Some(if self.timestamp == 0 { now } else { self.timestamp }),
            source: non_empty(&self.source),
            kind: non_empty(&self.kind),
            group: non_empty(&self.group),
            tags: non_empty(&self.tags),
            origin: non_empty(&self.origin),
            message_contains: non_empty(&self.message),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Resolved query: every field is either a concrete predicate or absent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub limit: u32,
    pub offset: u32,
    /// `All` or `None` disables the level predicate
    pub min_level: LogLevel,
    pub min_severity: Option<u32>,
    /// Inclusive upper bound on event time, unix seconds
    pub until: Option<i64>,
    pub source: Option<String>,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub tags: Option<String>,
    pub origin: Option<String>,
    pub message_contains: Option<String>,
}

impl Default for LogFilter {
    /// Unconstrained filter returning the newest page
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            min_level: LogLevel::All,
            min_severity: None,
            until: None,
            source: None,
            kind: None,
            group: None,
            tags: None,
            origin: None,
            message_contains: None,
        }
    }
}

/// Text columns matched by equality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Source,
    Kind,
    Group,
    Tags,
    Origin,
}

impl Column {
    fn sql(&self) -> &'static str {
        match self {
            Column::Source => "source",
            Column::Kind => "type",
            Column::Group => "\"group\"",
            Column::Tags => "tags",
            Column::Origin => "origin",
        }
    }
}

/// A single condition on the `logs` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    LevelIn(Vec<LogLevel>),
    SeverityAtLeast(u32),
    TimestampAtMost(i64),
    Equals(Column, String),
    MessageContains(String),
}

impl Predicate {
    /// Render as a SQL fragment, pushing its parameters
    fn render(&self, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::LevelIn(levels) => {
                let marks = vec!["?"; levels.len()].join(", ");
                params.extend(levels.iter().map(|l| Value::Text(l.as_str().to_string())));
                format!("level IN ({})", marks)
            }
            Predicate::SeverityAtLeast(min) => {
                params.push(Value::Integer(i64::from(*min)));
                "severity >= ?".to_string()
            }
            Predicate::TimestampAtMost(until) => {
                params.push(Value::Text(format_time(*until)));
                "timestamp <= ?".to_string()
            }
            Predicate::Equals(column, value) => {
                params.push(Value::Text(value.clone()));
                format!("{} = ?", column.sql())
            }
            Predicate::MessageContains(needle) => {
                params.push(Value::Text(format!("%{}%", escape_like(needle))));
                "message LIKE ? ESCAPE '\\'".to_string()
            }
        }
    }
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) const SELECT_COLUMNS: &str =
    "id, message, timestamp, level, severity, source, \"group\", tags, type, origin, data";

impl LogFilter {
    /// The predicates this filter enforces, in a fixed order
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut out = Vec::new();

        let levels = self.min_level.at_or_above();
        if !levels.is_empty() {
            out.push(Predicate::LevelIn(levels));
        }
        if let Some(min) = self.min_severity {
            out.push(Predicate::SeverityAtLeast(min));
        }
        if let Some(until) = self.until {
            out.push(Predicate::TimestampAtMost(until));
        }

        let columns = [
            (Column::Source, &self.source),
            (Column::Kind, &self.kind),
            (Column::Group, &self.group),
            (Column::Tags, &self.tags),
            (Column::Origin, &self.origin),
        ];
        for (column, value) in columns {
            if let Some(value) = value {
                out.push(Predicate::Equals(column, value.clone()));
            }
        }

        if let Some(needle) = &self.message_contains {
            out.push(Predicate::MessageContains(needle.clone()));
        }
        out
    }

    /// Render the full SELECT with its bound parameters
    ///
    /// Newest first; ties broken by id so pagination is stable.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let clauses: Vec<String> = self
            .predicates()
            .iter()
            .map(|p| p.render(&mut params))
            .collect();

        let mut sql = format!("SELECT {} FROM logs", SELECT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");
        params.push(Value::Integer(i64::from(self.limit)));
        params.push(Value::Integer(i64::from(self.offset)));

        (sql, params)
    }
}
