//! Cache buckets: a whole bucket stored as one serialized value.
//!
//! The value under `fanlog_bucket_<name>` is a JSON object holding every
//! entry in insertion order. Each operation reads the value, works on it in
//! memory and writes it back. Two writers racing on the same bucket can lose
//! one of their updates; loggers accept that in exchange for needing nothing
//! more than a get/set medium.

use super::{
    plan_evictions, KvStore, Medium, RecordFilter, RecordId, RetentionPolicy, StorageBackend,
    StoredRecord,
};
use crate::error::StorageError;
use crate::record::{parse_timestamp, BucketRecord};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

const KEY_PREFIX: &str = "fanlog_bucket_";

#[derive(Debug, Default, Serialize, Deserialize)]
struct BucketState {
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    id: String,
    record: serde_json::Value,
}

impl CacheEntry {
    fn timestamp(&self) -> Option<chrono::DateTime<Utc>> {
        self.record
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(parse_timestamp)
    }
}

/// Bucket kept as a single value in a [`KvStore`].
///
/// Stores that block on I/O are driven from the blocking thread pool.
///
/// # Example
///
/// ```ignore
/// let bucket: CacheBucket<EventRecord, _> = CacheBucket::new(ProcessCache::new(), "fanlog_x");
/// bucket.initialize().await;
/// ```
pub struct CacheBucket<R, S> {
    inner: Arc<BucketInner<R, S>>,
}

struct BucketInner<R, S> {
    store: S,
    name: String,
    key: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: BucketRecord, S: KvStore> BucketInner<R, S> {
    fn load(&self) -> Result<BucketState, StorageError> {
        match self.store.get(&self.key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BucketState::default()),
        }
    }

    fn save(&self, state: &BucketState) -> Result<(), StorageError> {
        let raw = serde_json::to_string(state)?;
        self.store.set(&self.key, &raw)
    }

    fn decode(&self, entry: &CacheEntry) -> Option<StoredRecord<R>> {
        match serde_json::from_value::<R>(entry.record.clone()) {
            Ok(record) => Some(StoredRecord {
                id: RecordId::Token(entry.id.clone()),
                record,
            }),
            Err(e) => {
                tracing::warn!(bucket = %self.name, id = %entry.id, error = %e, "Skipping undecodable cache entry");
                None
            }
        }
    }

    fn try_initialize(&self) -> Result<bool, StorageError> {
        if self.store.get(&self.key)?.is_none() {
            self.save(&BucketState::default())?;
        }
        Ok(true)
    }

    fn try_insert(&self, record: serde_json::Value) -> Result<Option<RecordId>, StorageError> {
        let mut state = self.load()?;
        let id = Uuid::new_v4().simple().to_string();
        state.entries.push(CacheEntry {
            id: id.clone(),
            record,
        });
        self.save(&state)?;
        Ok(Some(RecordId::Token(id)))
    }

    /// Reset the bucket to empty, whatever it held before.
    fn try_purge(&self) -> Result<u64, StorageError> {
        let removed = match self.load() {
            Ok(state) => state.entries.len() as u64,
            Err(e) => {
                tracing::warn!(bucket = %self.name, error = %e, "Purging unreadable bucket");
                0
            }
        };
        self.save(&BucketState::default())?;
        Ok(removed)
    }

    fn try_clean(&self, policy: &RetentionPolicy) -> Result<u64, StorageError> {
        let mut state = self.load()?;
        let keyed: Vec<(usize, _)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, entry.timestamp()))
            .collect();
        let evicted: HashSet<usize> = plan_evictions(&keyed, policy, Utc::now())
            .into_iter()
            .collect();
        if evicted.is_empty() {
            return Ok(0);
        }

        let mut index = 0;
        state.entries.retain(|_| {
            let keep = !evicted.contains(&index);
            index += 1;
            keep
        });
        self.save(&state)?;
        Ok(evicted.len() as u64)
    }

    fn try_count(&self, filter: &RecordFilter) -> Result<u64, StorageError> {
        let state = self.load()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| filter.matches_document(&e.record))
            .count() as u64)
    }

    fn try_list(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredRecord<R>>, StorageError> {
        let state = self.load()?;
        let limit = if limit == 0 { usize::MAX } else { limit };

        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| filter.matches_document(&e.record))
            .skip(offset)
            .take(limit)
            .filter_map(|e| self.decode(e))
            .collect())
    }

    fn try_get(&self, token: &str) -> Result<Option<StoredRecord<R>>, StorageError> {
        let state = self.load()?;
        Ok(state
            .entries
            .iter()
            .find(|e| e.id == token)
            .and_then(|e| self.decode(e)))
    }

    fn degrade<T>(&self, operation: &'static str, result: Result<T, StorageError>, fallback: T) -> T {
        result.unwrap_or_else(|e| {
            tracing::warn!(
                bucket = %self.name,
                medium = self.store.name(),
                operation = operation,
                error = %e,
                "Bucket operation failed"
            );
            fallback
        })
    }
}

impl<R: BucketRecord, S: KvStore + 'static> CacheBucket<R, S> {
    pub fn new(store: S, name: &str) -> Self {
        Self {
            inner: Arc::new(BucketInner {
                store,
                name: name.to_string(),
                key: format!("{}{}", KEY_PREFIX, name),
                _record: PhantomData,
            }),
        }
    }

    /// Run one store operation, degrading any failure to `fallback`.
    async fn run<T, F>(&self, operation: &'static str, fallback: T, op: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&BucketInner<R, S>) -> Result<T, StorageError> + Send + 'static,
    {
        let inner = self.inner.clone();
        if !inner.store.blocking() {
            let result = op(&*inner);
            return inner.degrade(operation, result, fallback);
        }

        let worker = inner.clone();
        let result = match tokio::task::spawn_blocking(move || op(&*worker)).await {
            Ok(result) => result,
            Err(e) => Err(StorageError::Unavailable(format!(
                "blocking task failed: {}",
                e
            ))),
        };
        inner.degrade(operation, result, fallback)
    }
}

#[async_trait]
impl<R: BucketRecord, S: KvStore + 'static> StorageBackend<R> for CacheBucket<R, S> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn medium(&self) -> Medium {
        self.inner.store.medium()
    }

    fn available(&self) -> bool {
        self.inner.store.available()
    }

    async fn initialize(&self) -> bool {
        if !self.available() {
            return false;
        }
        self.run("initialize", false, |b| b.try_initialize()).await
    }

    async fn insert_value(&self, record: &R) -> Option<RecordId> {
        if !self.available() {
            return None;
        }
        let document = record.to_document();
        self.run("insert", None, move |b| b.try_insert(document)).await
    }

    async fn finalize(&self) -> bool {
        if !self.available() {
            return false;
        }
        self.run("finalize", false, |b| b.store.delete(&b.key).map(|_| true))
            .await
    }

    async fn force_purge(&self) -> u64 {
        if !self.available() {
            return 0;
        }
        self.run("purge", 0, |b| b.try_purge()).await
    }

    async fn cron_clean(&self, policy: &RetentionPolicy) -> u64 {
        if !self.available() || policy.is_unbounded() {
            return 0;
        }
        let policy = *policy;
        self.run("rotate", 0, move |b| b.try_clean(&policy)).await
    }

    async fn get_count(&self, filter: &RecordFilter) -> u64 {
        if !self.available() {
            return 0;
        }
        let filter = filter.clone();
        self.run("count", 0, move |b| b.try_count(&filter)).await
    }

    async fn get_list(
        &self,
        filter: &RecordFilter,
        offset: usize,
        limit: usize,
    ) -> Vec<StoredRecord<R>> {
        if !self.available() {
            return Vec::new();
        }
        let filter = filter.clone();
        self.run("list", Vec::new(), move |b| b.try_list(&filter, offset, limit))
            .await
    }

    async fn get_by_id(&self, id: &RecordId) -> Option<StoredRecord<R>> {
        let RecordId::Token(token) = id else {
            return None;
        };
        if !self.available() {
            return None;
        }
        let token = token.clone();
        self.run("get", None, move |b| b.try_get(&token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventRecord, Level};
    use crate::storage::{FileStore, ProcessCache};
    use chrono::Duration;
    use tempfile::TempDir;

    async fn event_bucket() -> CacheBucket<EventRecord, ProcessCache> {
        let bucket = CacheBucket::new(ProcessCache::new(), "fanlog_cache_test");
        assert!(bucket.initialize().await);
        bucket
    }

    #[tokio::test]
    async fn test_insert_list_newest_first() {
        let bucket = event_bucket().await;
        for i in 0..4 {
            let id = bucket
                .insert_value(&EventRecord::new(Level::Info, format!("event {}", i)))
                .await;
            assert!(matches!(id, Some(RecordId::Token(_))));
        }

        let page = bucket.get_list(&RecordFilter::new(), 1, 2).await;
        let messages: Vec<_> = page.iter().map(|r| r.record.message.as_str()).collect();
        assert_eq!(messages, vec!["event 2", "event 1"]);
    }

    #[tokio::test]
    async fn test_get_by_id_only_accepts_tokens() {
        let bucket = event_bucket().await;
        let id = bucket
            .insert_value(&EventRecord::new(Level::Error, "boom").with_code(7))
            .await
            .unwrap();

        let stored = bucket.get_by_id(&id).await.unwrap();
        assert_eq!(stored.record.code, 7);
        assert!(bucket.get_by_id(&RecordId::Row(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_level_filter_counts_upward() {
        let bucket = event_bucket().await;
        for level in Level::ALL {
            bucket
                .insert_value(&EventRecord::new(level, level.as_str()))
                .await
                .unwrap();
        }
        let filter = RecordFilter::new().level(Level::Warning);
        assert_eq!(bucket.get_count(&filter).await, 5);
        assert_eq!(bucket.get_list(&filter, 0, 0).await.len(), 5);
        assert_eq!(
            bucket
                .get_count(&RecordFilter::new().field("missing", "x"))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_rotation_applies_both_bounds() {
        let bucket = event_bucket().await;
        let old = EventRecord::new(Level::Info, "old")
            .with_timestamp(Utc::now() - Duration::hours(72));
        bucket.insert_value(&old).await.unwrap();
        for i in 0..5 {
            bucket
                .insert_value(&EventRecord::new(Level::Info, format!("fresh {}", i)))
                .await
                .unwrap();
        }

        let policy = RetentionPolicy::new(24, 3);
        assert_eq!(bucket.cron_clean(&policy).await, 3);
        let survivors = bucket.get_list(&RecordFilter::new(), 0, 0).await;
        let messages: Vec<_> = survivors.iter().map(|r| r.record.message.as_str()).collect();
        assert_eq!(messages, vec!["fresh 4", "fresh 3", "fresh 2"]);
        assert_eq!(bucket.cron_clean(&policy).await, 0);
    }

    #[tokio::test]
    async fn test_purge_and_finalize() {
        let bucket = event_bucket().await;
        bucket
            .insert_value(&EventRecord::new(Level::Info, "x"))
            .await
            .unwrap();
        assert_eq!(bucket.force_purge().await, 1);
        assert_eq!(bucket.get_count(&RecordFilter::new()).await, 0);
        assert!(bucket.finalize().await);
    }

    #[tokio::test]
    async fn test_unavailable_cache_returns_sentinels() {
        let bucket: CacheBucket<EventRecord, _> =
            CacheBucket::new(ProcessCache::disabled(), "fanlog_off");
        assert!(!bucket.initialize().await);
        assert!(bucket
            .insert_value(&EventRecord::new(Level::Error, "dropped"))
            .await
            .is_none());
        assert_eq!(bucket.get_count(&RecordFilter::new()).await, 0);
        assert!(bucket.get_list(&RecordFilter::new(), 0, 10).await.is_empty());
        assert_eq!(bucket.cron_clean(&RetentionPolicy::new(1, 1)).await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_not_overwritten() {
        let cache = ProcessCache::new();
        cache.set("fanlog_bucket_fanlog_bad", "{not json").unwrap();
        let bucket: CacheBucket<EventRecord, _> = CacheBucket::new(cache.clone(), "fanlog_bad");

        assert!(bucket
            .insert_value(&EventRecord::new(Level::Info, "x"))
            .await
            .is_none());
        assert_eq!(
            cache.get("fanlog_bucket_fanlog_bad").unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[tokio::test]
    async fn test_purge_recovers_corrupt_value() {
        let cache = ProcessCache::new();
        cache.set("fanlog_bucket_fanlog_trunc", "{trunc").unwrap();
        let bucket: CacheBucket<EventRecord, _> = CacheBucket::new(cache, "fanlog_trunc");

        assert_eq!(bucket.force_purge().await, 0);
        assert!(bucket
            .insert_value(&EventRecord::new(Level::Info, "after purge"))
            .await
            .is_some());
        assert_eq!(bucket.get_count(&RecordFilter::new()).await, 1);
    }

    #[tokio::test]
    async fn test_count_rotation_on_large_bucket() {
        let temp = TempDir::new().unwrap();
        let bucket: CacheBucket<EventRecord, _> =
            CacheBucket::new(FileStore::open(temp.path()).unwrap(), "fanlog_large");
        assert!(bucket.initialize().await);
        for i in 0..500 {
            bucket
                .insert_value(&EventRecord::new(Level::Debug, format!("entry {}", i)))
                .await
                .unwrap();
        }

        assert_eq!(bucket.cron_clean(&RetentionPolicy::new(0, 100)).await, 400);
        let newest = bucket.get_list(&RecordFilter::new(), 0, 1).await;
        assert_eq!(newest[0].record.message, "entry 499");
        let oldest = bucket.get_list(&RecordFilter::new(), 99, 1).await;
        assert_eq!(oldest[0].record.message, "entry 400");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shared_memory_bucket_concurrent_readers() {
        let temp = TempDir::new().unwrap();
        let bucket: Arc<CacheBucket<EventRecord, _>> =
            Arc::new(CacheBucket::new(FileStore::open(temp.path()).unwrap(), "fanlog_readers"));
        assert!(bucket.initialize().await);
        bucket
            .insert_value(&EventRecord::new(Level::Alert, "shared"))
            .await
            .unwrap();

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let bucket = bucket.clone();
                tokio::spawn(async move { bucket.get_count(&RecordFilter::new()).await })
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_shared_memory_bucket_visible_across_handles() {
        let temp = TempDir::new().unwrap();
        let first: CacheBucket<EventRecord, _> =
            CacheBucket::new(FileStore::open(temp.path()).unwrap(), "fanlog_shm");
        let second: CacheBucket<EventRecord, _> =
            CacheBucket::new(FileStore::open(temp.path()).unwrap(), "fanlog_shm");
        assert_eq!(first.medium(), Medium::SharedMemory);

        assert!(first.initialize().await);
        first
            .insert_value(&EventRecord::new(Level::Notice, "from first"))
            .await
            .unwrap();
        let seen = second.get_list(&RecordFilter::new(), 0, 0).await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].record.message, "from first");
    }
}
