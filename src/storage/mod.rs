//! Storage layer for logger buckets
//!
//! Every logger owns one bucket. A bucket is reached through the
//! [`StorageBackend`] contract, implemented over three media:
//! - **Relational** ([`SqlBucket`]): one SQLite table per bucket, with online
//!   schema migration
//! - **Process cache** ([`CacheBucket`] over [`ProcessCache`]): the whole bucket
//!   is one value in an in-process shared map
//! - **Shared memory** ([`CacheBucket`] over [`FileStore`]): the same model on
//!   a lock-protected store reachable from several processes
//!
//! ## Failure model
//!
//! The contract never returns errors for expected failures. An unavailable
//! medium or a failed statement yields a sentinel (`None`, `0`, empty list)
//! and a warning through `tracing`; dispatch to other loggers continues.

pub mod cache;
pub mod filter;
pub mod kv;
pub mod rotation;
pub mod sql;

pub use cache::CacheBucket;
pub use filter::RecordFilter;
pub use kv::{FileStore, KvStore, ProcessCache};
pub use rotation::{plan_evictions, RetentionPolicy};
pub use sql::{Database, SqlBucket};

use crate::error::StorageError;
use crate::record::BucketRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned by a bucket on insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Auto-increment row id (relational buckets)
    Row(i64),
    /// Generated unique token (cache buckets)
    Token(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Row(id) => write!(f, "{}", id),
            RecordId::Token(token) => f.write_str(token),
        }
    }
}

impl FromStr for RecordId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(id) => RecordId::Row(id),
            Err(_) => RecordId::Token(s.to_string()),
        })
    }
}

/// A record read back from a bucket together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<R> {
    pub id: RecordId,
    pub record: R,
}

/// Which medium a backend persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Medium {
    Database,
    SharedCache,
    SharedMemory,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Medium::Database => "database",
            Medium::SharedCache => "shared_cache",
            Medium::SharedMemory => "shared_memory",
        })
    }
}

/// Uniform bucket contract shared by every storage medium.
///
/// Only [`StorageBackend::update_schema`] reports errors, because a failed
/// migration must be visible to the operator; everything else degrades to a
/// sentinel value.
#[async_trait]
pub trait StorageBackend<R: BucketRecord>: Send + Sync {
    /// Bucket name
    fn name(&self) -> &str;

    fn medium(&self) -> Medium;

    /// Whether the medium can serve requests right now.
    fn available(&self) -> bool;

    /// Provision the bucket. Idempotent; returns `false` if the medium is
    /// unavailable or provisioning failed.
    async fn initialize(&self) -> bool;

    /// Bring a previously provisioned bucket up to the current layout.
    ///
    /// Returns `Ok(true)` when a migration ran.
    async fn update_schema(&self) -> Result<bool, StorageError> {
        Ok(false)
    }

    /// Append one record. `None` means the record was dropped.
    async fn insert_value(&self, record: &R) -> Option<RecordId>;

    /// Purge every record and remove the bucket itself.
    async fn finalize(&self) -> bool;

    /// Remove every record but keep the bucket provisioned.
    async fn force_purge(&self) -> u64;

    /// Apply retention bounds and return how many records were removed.
    async fn cron_clean(&self, policy: &RetentionPolicy) -> u64;

    async fn get_count(&self, filter: &RecordFilter) -> u64;

    /// Matching records, newest first.
    async fn get_list(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> Vec<StoredRecord<R>>;

    async fn get_by_id(&self, id: &RecordId) -> Option<StoredRecord<R>>;
}

/// Derive a bucket name usable as a table name or cache key.
pub fn bucket_name(prefix: &str, id: &uuid::Uuid) -> String {
    format!("{}_{}", prefix, id.simple())
}

/// Bucket names are restricted to `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_bucket_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_parse() {
        assert_eq!("17".parse::<RecordId>().unwrap(), RecordId::Row(17));
        assert_eq!(
            "a1b2".parse::<RecordId>().unwrap(),
            RecordId::Token("a1b2".to_string())
        );
    }

    #[test]
    fn test_bucket_name_validation() {
        let id = uuid::Uuid::new_v4();
        assert!(is_valid_bucket_name(&bucket_name("fanlog", &id)));
        assert!(!is_valid_bucket_name("drop table; --"));
        assert!(!is_valid_bucket_name("1abc"));
        assert!(!is_valid_bucket_name(""));
    }
}
