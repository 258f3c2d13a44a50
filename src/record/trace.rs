//! Trace record: one completed unit of traced work and its spans.

use super::{format_timestamp, BucketRecord, Column, RecordKind, SqlValue};
use super::level::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;

const TRACE_COLUMNS: &[Column] = &[
    Column::new("trace_id", "TEXT NOT NULL"),
    Column::new("timestamp", "TEXT NOT NULL DEFAULT ''"),
    Column::new("channel", "TEXT NOT NULL DEFAULT 'unknown'"),
    Column::new("instance", "TEXT NOT NULL DEFAULT ''"),
    Column::new("duration_ms", "INTEGER NOT NULL DEFAULT 0"),
    Column::new("span_count", "INTEGER NOT NULL DEFAULT 0"),
    Column::new("site_id", "INTEGER"),
    Column::new("user_id", "TEXT"),
    Column::new("user_session", "TEXT"),
    Column::new("spans", "TEXT NOT NULL DEFAULT '[]'"),
];

/// One timed operation inside a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    /// Offset from the trace start (milliseconds)
    pub start_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A completed trace.
///
/// `span_count` always equals `spans.len()`: it is derived on construction
/// and checked on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTraceRecord")]
pub struct TraceRecord {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    pub instance: String,
    pub duration_ms: u64,
    span_count: u64,
    pub site_id: Option<i64>,
    pub user_id: Option<String>,
    pub user_session: Option<String>,
    spans: Vec<Span>,
}

#[derive(Deserialize)]
struct RawTraceRecord {
    trace_id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    channel: Channel,
    #[serde(default)]
    instance: String,
    duration_ms: u64,
    span_count: u64,
    site_id: Option<i64>,
    user_id: Option<String>,
    user_session: Option<String>,
    #[serde(default)]
    spans: Vec<Span>,
}

/// Error for traces whose declared span count disagrees with the payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("trace declares {declared} spans but carries {actual}")]
pub struct SpanCountMismatch {
    pub declared: u64,
    pub actual: u64,
}

impl TryFrom<RawTraceRecord> for TraceRecord {
    type Error = SpanCountMismatch;

    fn try_from(raw: RawTraceRecord) -> Result<Self, Self::Error> {
        let actual = raw.spans.len() as u64;
        if raw.span_count != actual {
            return Err(SpanCountMismatch {
                declared: raw.span_count,
                actual,
            });
        }
        Ok(Self {
            trace_id: raw.trace_id,
            timestamp: raw.timestamp,
            channel: raw.channel,
            instance: raw.instance,
            duration_ms: raw.duration_ms,
            span_count: raw.span_count,
            site_id: raw.site_id,
            user_id: raw.user_id,
            user_session: raw.user_session,
            spans: raw.spans,
        })
    }
}

impl TraceRecord {
    pub fn new(
        trace_id: impl Into<String>,
        instance: impl Into<String>,
        channel: Channel,
        duration_ms: u64,
        spans: Vec<Span>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            timestamp: Utc::now(),
            channel,
            instance: instance.into(),
            duration_ms,
            span_count: spans.len() as u64,
            site_id: None,
            user_id: None,
            user_session: None,
            spans,
        }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn span_count(&self) -> u64 {
        self.span_count
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_identity(
        mut self,
        site_id: Option<i64>,
        user_id: Option<String>,
        user_session: Option<String>,
    ) -> Self {
        self.site_id = site_id;
        self.user_id = user_id;
        self.user_session = user_session;
        self
    }
}

impl BucketRecord for TraceRecord {
    const KIND: RecordKind = RecordKind::Trace;
    const SCHEMA_VERSION: u32 = 1;

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn columns() -> &'static [Column] {
        TRACE_COLUMNS
    }

    fn sql_values(&self) -> Vec<SqlValue> {
        let spans = serde_json::to_string(&self.spans).unwrap_or_else(|_| "[]".to_string());
        vec![
            SqlValue::Text(Some(self.trace_id.clone())),
            SqlValue::Text(Some(format_timestamp(&self.timestamp))),
            SqlValue::Text(Some(self.channel.as_str().to_string())),
            SqlValue::Text(Some(self.instance.clone())),
            SqlValue::Integer(Some(self.duration_ms as i64)),
            SqlValue::Integer(Some(self.span_count as i64)),
            SqlValue::Integer(self.site_id),
            SqlValue::Text(self.user_id.clone()),
            SqlValue::Text(self.user_session.clone()),
            SqlValue::Text(Some(spans)),
        ]
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let spans_json: String = row.try_get("spans")?;
        let spans: Vec<Span> =
            serde_json::from_str(&spans_json).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let timestamp = row
            .try_get::<Option<String>, _>("timestamp")?
            .as_deref()
            .and_then(super::parse_timestamp)
            .unwrap_or_default();
        let channel = row
            .try_get::<Option<String>, _>("channel")?
            .and_then(|c| c.parse().ok())
            .unwrap_or_default();

        Ok(Self {
            trace_id: row.try_get("trace_id")?,
            timestamp,
            channel,
            instance: row.try_get("instance")?,
            duration_ms: row.try_get::<i64, _>("duration_ms")?.max(0) as u64,
            span_count: spans.len() as u64,
            site_id: row.try_get("site_id")?,
            user_id: row.try_get("user_id")?,
            user_session: row.try_get("user_session")?,
            spans,
        })
    }
}
