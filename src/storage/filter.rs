//! Record filters shared by every storage medium.
//!
//! A filter is a set of exact-match field constraints plus an optional
//! minimum level. The `level` key is special: it means "this level or more
//! severe", never an exact match.

use crate::record::{Column, Level, ParseLevelError};
use std::collections::BTreeMap;

/// Filter applied by `get_count` and `get_list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    min_level: Option<Level>,
    fields: BTreeMap<String, String>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep records at `level` or above.
    pub fn level(mut self, level: Level) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Keep records whose `name` field equals `value`.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build a filter from loosely typed pairs (CLI flags, query strings).
    ///
    /// # Example
    ///
    /// ```ignore
    /// let filter = RecordFilter::from_pairs([("level", "warning"), ("component", "backup")])?;
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ParseLevelError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut filter = Self::new();
        for (key, value) in pairs {
            let key = key.into();
            let value = value.into();
            if key == "level" {
                filter.min_level = Some(value.parse()?);
            } else {
                filter.fields.insert(key, value);
            }
        }
        Ok(filter)
    }

    pub fn min_level(&self) -> Option<Level> {
        self.min_level
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.min_level.is_none() && self.fields.is_empty()
    }

    /// Evaluate against a flat JSON document (cache buckets).
    pub fn matches_document(&self, doc: &serde_json::Value) -> bool {
        if let Some(min) = self.min_level {
            let level = doc
                .get("level")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Level>().ok());
            match level {
                Some(level) if level.meets(min) => {}
                _ => return false,
            }
        }

        self.fields.iter().all(|(name, expected)| {
            match doc.get(name) {
                Some(serde_json::Value::String(s)) => s == expected,
                Some(serde_json::Value::Number(n)) => n.to_string() == *expected,
                Some(serde_json::Value::Bool(b)) => b.to_string() == *expected,
                _ => false,
            }
        })
    }

    /// Build a SQL `WHERE` clause and its bind values for a table layout.
    ///
    /// Returns `None` when the filter names a field the layout does not have,
    /// in which case nothing can match.
    pub fn to_sql(&self, columns: &[Column]) -> Option<(String, Vec<String>)> {
        let has = |name: &str| columns.iter().any(|c| c.name == name);
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        if let Some(min) = self.min_level {
            if !has("level") {
                return None;
            }
            let levels: Vec<&'static str> = min.at_or_above().map(|l| l.as_str()).collect();
            let placeholders = vec!["?"; levels.len()].join(", ");
            clauses.push(format!("level IN ({})", placeholders));
            binds.extend(levels.into_iter().map(String::from));
        }

        for (name, value) in &self.fields {
            if !has(name) {
                return None;
            }
            clauses.push(format!("\"{}\" = ?", name));
            binds.push(value.clone());
        }

        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Some((clause, binds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_filter_is_upward_closed() {
        let filter = RecordFilter::new().level(Level::Warning);
        assert!(filter.matches_document(&json!({"level": "warning"})));
        assert!(filter.matches_document(&json!({"level": "emergency"})));
        assert!(!filter.matches_document(&json!({"level": "notice"})));
        assert!(!filter.matches_document(&json!({})));
    }

    #[test]
    fn test_exact_fields_compare_numbers_as_text() {
        let filter = RecordFilter::new().field("code", "42").field("component", "backup");
        assert!(filter.matches_document(&json!({"code": 42, "component": "backup"})));
        assert!(!filter.matches_document(&json!({"code": 41, "component": "backup"})));
    }

    #[test]
    fn test_from_pairs_rejects_bad_level() {
        assert!(RecordFilter::from_pairs([("level", "loud")]).is_err());
        let filter = RecordFilter::from_pairs([("level", "error"), ("channel", "cli")]).unwrap();
        assert_eq!(filter.min_level(), Some(Level::Error));
        assert_eq!(filter.fields().count(), 1);
    }

    #[test]
    fn test_to_sql_builds_level_in_list() {
        let columns = [Column::new("level", "TEXT"), Column::new("channel", "TEXT")];
        let filter = RecordFilter::new().level(Level::Alert).field("channel", "cron");
        let (clause, binds) = filter.to_sql(&columns).unwrap();
        assert_eq!(clause, " WHERE level IN (?, ?) AND \"channel\" = ?");
        assert_eq!(binds, vec!["alert", "emergency", "cron"]);
    }

    #[test]
    fn test_to_sql_unknown_column_matches_nothing() {
        let columns = [Column::new("level", "TEXT")];
        let filter = RecordFilter::new().field("nope", "1");
        assert!(filter.to_sql(&columns).is_none());
    }
}
