//! Command implementations for the CLI
//!
//! - loggers: list, add, edit, pause, start, delete and purge loggers
//! - emit: dispatch a single event
//! - logs: read records back from a bucket
//! - rotate: apply retention policies
//! - run: stay in the foreground and rotate on a schedule
//! - metrics: render bucket metrics
//! - config: configuration display and validation

pub mod config;
pub mod emit;
pub mod loggers;
pub mod logs;
pub mod metrics;
pub mod rotate;
pub mod run;

use anyhow::{Context, Result};
use fanlog::config::Settings;
use fanlog::registry::{BackendFactory, LoggerRegistry};
use fanlog::storage::{Database, FileStore, ProcessCache};
use std::sync::Arc;
use uuid::Uuid;

/// Open every storage medium and load the logger registry.
///
/// The process cache only lives as long as this process, so shared-cache
/// buckets start empty on every invocation.
pub async fn open_registry(settings: &Settings) -> Result<Arc<LoggerRegistry>> {
    let database = Database::new(&settings.storage.database_url)
        .await
        .with_context(|| format!("Failed to open {}", settings.storage.database_url))?;
    let cache = if settings.storage.cache_enabled {
        ProcessCache::new()
    } else {
        ProcessCache::disabled()
    };
    let shared_memory = FileStore::open(&settings.storage.shared_memory_dir)
        .with_context(|| {
            format!(
                "Failed to open shared memory directory {}",
                settings.storage.shared_memory_dir.display()
            )
        })?;

    let registry = LoggerRegistry::new(
        BackendFactory::new(database, cache, shared_memory),
        settings.privacy.salt.clone(),
        Some(settings.storage.registry_path.clone()),
    );
    registry.load().await?;
    registry.ensure_system_logger().await?;

    Ok(Arc::new(registry))
}

/// Resolve a logger by UUID, UUID prefix or name.
pub async fn resolve_logger(registry: &LoggerRegistry, needle: &str) -> Result<Uuid> {
    if let Ok(uuid) = needle.parse::<Uuid>() {
        return Ok(uuid);
    }

    let matches: Vec<Uuid> = registry
        .list()
        .await
        .into_iter()
        .filter(|l| l.name == needle || l.uuid.to_string().starts_with(needle))
        .map(|l| l.uuid)
        .collect();

    match matches.as_slice() {
        [uuid] => Ok(*uuid),
        [] => anyhow::bail!("No logger matches '{}'", needle),
        _ => anyhow::bail!("'{}' matches {} loggers; use the full UUID", needle, matches.len()),
    }
}
