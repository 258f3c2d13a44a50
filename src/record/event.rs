//! Event record: one logged event with its enrichment fields.

use super::{format_timestamp, BucketRecord, Column, RecordKind, SqlValue};
use super::level::{Channel, ComponentClass, Level};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Current event table layout (schema v2).
const EVENT_COLUMNS: &[Column] = &[
    Column::new("timestamp", "TEXT NOT NULL DEFAULT ''"),
    Column::new("level", "TEXT NOT NULL"),
    Column::new("channel", "TEXT NOT NULL DEFAULT 'unknown'"),
    Column::new("class", "TEXT NOT NULL DEFAULT 'library'"),
    Column::new("component", "TEXT NOT NULL DEFAULT ''"),
    Column::new("version", "TEXT NOT NULL DEFAULT ''"),
    Column::new("code", "INTEGER NOT NULL DEFAULT 0"),
    Column::new("message", "TEXT NOT NULL DEFAULT ''"),
    Column::new("site_id", "INTEGER"),
    Column::new("site_name", "TEXT"),
    Column::new("user_id", "TEXT"),
    Column::new("user_name", "TEXT"),
    Column::new("user_session", "TEXT"),
    Column::new("remote_ip", "TEXT"),
    Column::new("url", "TEXT"),
    Column::new("verb", "TEXT"),
    Column::new("server", "TEXT"),
    Column::new("referrer", "TEXT"),
    Column::new("user_agent", "TEXT"),
    Column::new("file", "TEXT"),
    Column::new("line", "INTEGER"),
    Column::new("classname", "TEXT"),
    Column::new("function", "TEXT"),
    Column::new("trace", "TEXT"),
];

/// Event table layout before sessions and backtraces were stored (schema v1).
const EVENT_COLUMNS_V1: &[Column] = &[
    Column::new("timestamp", "TEXT NOT NULL DEFAULT ''"),
    Column::new("level", "TEXT"),
    Column::new("channel", "TEXT NOT NULL DEFAULT 'unknown'"),
    Column::new("class", "TEXT NOT NULL DEFAULT 'library'"),
    Column::new("component", "TEXT NOT NULL DEFAULT ''"),
    Column::new("version", "TEXT NOT NULL DEFAULT ''"),
    Column::new("code", "INTEGER NOT NULL DEFAULT 0"),
    Column::new("message", "TEXT NOT NULL DEFAULT ''"),
    Column::new("site_id", "INTEGER"),
    Column::new("site_name", "TEXT"),
    Column::new("user_id", "TEXT"),
    Column::new("user_name", "TEXT"),
    Column::new("remote_ip", "TEXT"),
    Column::new("url", "TEXT"),
    Column::new("verb", "TEXT"),
    Column::new("server", "TEXT"),
    Column::new("referrer", "TEXT"),
    Column::new("user_agent", "TEXT"),
    Column::new("file", "TEXT"),
    Column::new("line", "INTEGER"),
    Column::new("classname", "TEXT"),
    Column::new("function", "TEXT"),
];

/// A single logged event.
///
/// Created by the dispatcher from the caller's level, message and code, then
/// filled in by each logger's processor pipeline before it reaches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub class: ComponentClass,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub site_id: Option<i64>,
    pub site_name: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_session: Option<String>,
    pub remote_ip: Option<String>,
    pub url: Option<String>,
    pub verb: Option<String>,
    pub server: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub classname: Option<String>,
    pub function: Option<String>,
    /// Formatted backtrace, when the backtrace processor ran
    pub trace: Option<String>,

    /// Set once identity hashing has been applied
    #[serde(skip)]
    pub(crate) privacy_applied: bool,
}

impl EventRecord {
    /// Create a bare record stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            channel: Channel::Unknown,
            class: ComponentClass::Library,
            component: String::new(),
            version: String::new(),
            code: 0,
            message: message.into(),
            site_id: None,
            site_name: None,
            user_id: None,
            user_name: None,
            user_session: None,
            remote_ip: None,
            url: None,
            verb: None,
            server: None,
            referrer: None,
            user_agent: None,
            file: None,
            line: None,
            classname: None,
            function: None,
            trace: None,
            privacy_applied: false,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_component(
        mut self,
        class: ComponentClass,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.class = class;
        self.component = name.into();
        self.version = version.into();
        self
    }

    /// Whether identity fields have already been hashed.
    pub fn is_privacy_applied(&self) -> bool {
        self.privacy_applied
    }
}

fn text(row: &SqliteRow, column: &str) -> Result<Option<String>, sqlx::Error> {
    row.try_get::<Option<String>, _>(column)
}

impl BucketRecord for EventRecord {
    const KIND: RecordKind = RecordKind::Event;
    const SCHEMA_VERSION: u32 = 2;

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn level(&self) -> Option<Level> {
        Some(self.level)
    }

    fn columns() -> &'static [Column] {
        EVENT_COLUMNS
    }

    fn legacy_columns(version: u32) -> Option<&'static [Column]> {
        match version {
            1 => Some(EVENT_COLUMNS_V1),
            _ => None,
        }
    }

    fn sql_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(Some(format_timestamp(&self.timestamp))),
            SqlValue::Text(Some(self.level.as_str().to_string())),
            SqlValue::Text(Some(self.channel.as_str().to_string())),
            SqlValue::Text(Some(self.class.as_str().to_string())),
            SqlValue::Text(Some(self.component.clone())),
            SqlValue::Text(Some(self.version.clone())),
            SqlValue::Integer(Some(self.code)),
            SqlValue::Text(Some(self.message.clone())),
            SqlValue::Integer(self.site_id),
            SqlValue::Text(self.site_name.clone()),
            SqlValue::Text(self.user_id.clone()),
            SqlValue::Text(self.user_name.clone()),
            SqlValue::Text(self.user_session.clone()),
            SqlValue::Text(self.remote_ip.clone()),
            SqlValue::Text(self.url.clone()),
            SqlValue::Text(self.verb.clone()),
            SqlValue::Text(self.server.clone()),
            SqlValue::Text(self.referrer.clone()),
            SqlValue::Text(self.user_agent.clone()),
            SqlValue::Text(self.file.clone()),
            SqlValue::Integer(self.line),
            SqlValue::Text(self.classname.clone()),
            SqlValue::Text(self.function.clone()),
            SqlValue::Text(self.trace.clone()),
        ]
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let timestamp = text(row, "timestamp")?
            .as_deref()
            .and_then(super::parse_timestamp)
            .unwrap_or_default();
        let level = text(row, "level")?
            .and_then(|l| l.parse().ok())
            .unwrap_or(Level::Unknown);

        Ok(Self {
            timestamp,
            level,
            channel: text(row, "channel")?
                .and_then(|c| c.parse().ok())
                .unwrap_or_default(),
            class: text(row, "class")?
                .and_then(|c| c.parse().ok())
                .unwrap_or_default(),
            component: text(row, "component")?.unwrap_or_default(),
            version: text(row, "version")?.unwrap_or_default(),
            code: row.try_get::<Option<i64>, _>("code")?.unwrap_or(0),
            message: text(row, "message")?.unwrap_or_default(),
            site_id: row.try_get("site_id")?,
            site_name: text(row, "site_name")?,
            user_id: text(row, "user_id")?,
            user_name: text(row, "user_name")?,
            user_session: text(row, "user_session")?,
            remote_ip: text(row, "remote_ip")?,
            url: text(row, "url")?,
            verb: text(row, "verb")?,
            server: text(row, "server")?,
            referrer: text(row, "referrer")?,
            user_agent: text(row, "user_agent")?,
            file: text(row, "file")?,
            line: row.try_get("line")?,
            classname: text(row, "classname")?,
            function: text(row, "function")?,
            trace: text(row, "trace")?,
            privacy_applied: false,
        })
    }
}
