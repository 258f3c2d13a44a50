//! Typed record model shared by every storage medium.
//!
//! Two record types flow through the engine:
//! - [`EventRecord`]: one logged event, enriched by the processor pipeline
//! - [`TraceRecord`]: one completed unit of traced work with its spans
//!
//! Both implement [`BucketRecord`], the small contract a storage bucket needs
//! to persist, filter and rotate a record without knowing its concrete type.

pub mod event;
pub mod level;
pub mod trace;

pub use event::EventRecord;
pub use level::{Channel, ComponentClass, Level, ParseLevelError};
pub use trace::{Span, TraceRecord};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;

/// Timestamp layout used in relational columns.
///
/// Lexicographic order matches chronological order, and SQLite's date
/// functions understand it.
pub const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Which stream a bucket holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Event,
    Trace,
}

/// A value bound into a relational insert.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Integer(Option<i64>),
}

/// Column declaration for relational buckets.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub decl: &'static str,
}

impl Column {
    pub const fn new(name: &'static str, decl: &'static str) -> Self {
        Self { name, decl }
    }
}

/// What a storage bucket needs from the records it holds.
pub trait BucketRecord: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    const KIND: RecordKind;

    /// Schema version written by [`BucketRecord::columns`].
    const SCHEMA_VERSION: u32;

    fn timestamp(&self) -> DateTime<Utc>;

    /// Severity, for record types that carry one.
    fn level(&self) -> Option<Level> {
        None
    }

    /// Current relational columns, excluding the `id` primary key.
    fn columns() -> &'static [Column];

    /// Columns that existed at an older schema version, if that version is
    /// still migratable.
    fn legacy_columns(_version: u32) -> Option<&'static [Column]> {
        None
    }

    /// Values aligned with [`BucketRecord::columns`].
    fn sql_values(&self) -> Vec<SqlValue>;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error>;

    /// Flat JSON projection used by cache buckets for filtering.
    fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Format a timestamp for relational storage.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(SQL_TIMESTAMP_FORMAT).to_string()
}

/// Parse either an RFC 3339 timestamp or the relational layout.
///
/// Returns `None` for anything else; rotation treats such records as expired.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, SQL_TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}
