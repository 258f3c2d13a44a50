//! Periodic rotation of logger buckets
//!
//! Applies each logger's retention policy to its bucket. Paused loggers are
//! rotated too; only unbounded policies are skipped.

use crate::config::RotationConfig;
use crate::metrics;
use crate::registry::LoggerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// Outcome of one rotation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Buckets whose policy was applied
    pub buckets: usize,
    /// Buckets skipped because neither bound is set
    pub unbounded: usize,
    pub removed: u64,
    /// (bucket name, removed) for every bucket that lost records
    pub per_bucket: Vec<(String, u64)>,
}

/// Spawn the background rotation task.
///
/// The first pass runs after one full `interval`.
///
/// # Example
///
/// ```ignore
/// let handle = spawn_rotation_task(registry.clone(), Duration::from_secs(3600));
/// ```
pub fn spawn_rotation_task(registry: Arc<LoggerRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        rotation_loop(registry, interval).await;
    })
}

/// Spawn the rotation task as configured. Returns `None` when disabled.
pub fn start_scheduled_rotation(
    config: &RotationConfig,
    registry: Arc<LoggerRegistry>,
) -> Option<JoinHandle<()>> {
    if !config.enabled {
        tracing::info!("Scheduled rotation disabled");
        return None;
    }
    tracing::info!(interval_seconds = config.interval_seconds, "Scheduled rotation enabled");
    Some(spawn_rotation_task(registry, config.interval()))
}

async fn rotation_loop(registry: Arc<LoggerRegistry>, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // interval() fires immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let report = run_rotation_now(&registry).await;
        tracing::info!(
            buckets = report.buckets,
            removed = report.removed,
            "Scheduled rotation completed"
        );
    }
}

/// Run one rotation pass over every logger.
pub async fn run_rotation_now(registry: &LoggerRegistry) -> RotationReport {
    let snapshot = registry.snapshot();
    let mut report = RotationReport::default();

    for logger in snapshot.iter() {
        let policy = logger.definition.handler.retention();
        if policy.is_unbounded() {
            report.unbounded += 1;
            continue;
        }

        let removed = logger.bucket.cron_clean(&policy).await;
        report.buckets += 1;
        if removed > 0 {
            let name = logger.bucket.name().to_string();
            tracing::debug!(
                logger = %logger.definition.name,
                bucket = %name,
                removed,
                "Rotated bucket"
            );
            metrics::record_rotation(&name, removed);
            report.removed += removed;
            report.per_bucket.push((name, removed));
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventRecord, Level};
    use crate::registry::{BackendFactory, HandlerConfig, LoggerDraft};
    use crate::storage::{Database, FileStore, ProcessCache, RecordFilter, RetentionPolicy};
    use tempfile::TempDir;

    async fn registry(temp: &TempDir) -> Arc<LoggerRegistry> {
        let factory = BackendFactory::new(
            Database::in_memory().await.unwrap(),
            ProcessCache::new(),
            FileStore::open(temp.path()).unwrap(),
        );
        Arc::new(LoggerRegistry::new(factory, "salt", None))
    }

    #[tokio::test]
    async fn test_run_rotation_now() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp).await;
        let bounded = registry
            .create(LoggerDraft::new(
                "bounded",
                HandlerConfig::Database {
                    retention: RetentionPolicy::new(0, 3),
                },
            ))
            .await
            .unwrap();
        let unbounded = registry
            .create(LoggerDraft::new(
                "unbounded",
                HandlerConfig::SharedCache {
                    retention: RetentionPolicy::default(),
                },
            ))
            .await
            .unwrap();
        registry.pause(bounded).await.unwrap();

        for uuid in [bounded, unbounded] {
            let logger = registry.active(uuid).await.unwrap();
            let bucket = logger.bucket.events().unwrap();
            for i in 0..5 {
                bucket
                    .insert_value(&EventRecord::new(Level::Info, format!("event {}", i)))
                    .await
                    .unwrap();
            }
        }

        let report = run_rotation_now(&registry).await;
        assert_eq!(report.buckets, 1);
        assert_eq!(report.unbounded, 1);
        assert_eq!(report.removed, 2);
        assert_eq!(report.per_bucket.len(), 1);

        let count = |uuid| {
            let registry = registry.clone();
            async move {
                let logger = registry.active(uuid).await.unwrap();
                logger.bucket.get_count(&RecordFilter::new()).await
            }
        };
        assert_eq!(count(bounded).await, 3);
        assert_eq!(count(unbounded).await, 5);

        let again = run_rotation_now(&registry).await;
        assert_eq!(again.removed, 0);
        assert!(again.per_bucket.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_task_rotates_on_interval() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp).await;
        let uuid = registry
            .create(LoggerDraft::new(
                "cache",
                HandlerConfig::SharedCache {
                    retention: RetentionPolicy::new(0, 1),
                },
            ))
            .await
            .unwrap();
        let logger = registry.active(uuid).await.unwrap();
        let bucket = logger.bucket.events().unwrap();
        for _ in 0..3 {
            bucket.insert_value(&EventRecord::new(Level::Info, "x")).await.unwrap();
        }

        let handle = spawn_rotation_task(registry.clone(), Duration::from_millis(50));
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(logger.bucket.get_count(&RecordFilter::new()).await, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_scheduled_rotation_follows_config() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp).await;

        let disabled = RotationConfig {
            enabled: false,
            interval_seconds: 1,
        };
        assert!(start_scheduled_rotation(&disabled, registry.clone()).is_none());

        let uuid = registry
            .create(LoggerDraft::new(
                "hourly",
                HandlerConfig::Database {
                    retention: RetentionPolicy::new(0, 2),
                },
            ))
            .await
            .unwrap();
        let logger = registry.active(uuid).await.unwrap();
        let bucket = logger.bucket.events().unwrap();
        for _ in 0..4 {
            bucket.insert_value(&EventRecord::new(Level::Info, "x")).await.unwrap();
        }

        let enabled = RotationConfig {
            enabled: true,
            interval_seconds: 1,
        };
        let handle = start_scheduled_rotation(&enabled, registry.clone()).unwrap();
        assert_eq!(logger.bucket.get_count(&RecordFilter::new()).await, 4);
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(logger.bucket.get_count(&RecordFilter::new()).await, 2);
        handle.abort();
    }
}
