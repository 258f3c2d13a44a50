//! Logger registry
//!
//! Holds every configured logger in registration order, owns their buckets
//! and publishes an immutable [`LoggerSet`] snapshot that the dispatcher
//! reads without locking. Definitions can be persisted to a TOML file:
//!
//! ```toml
//! [[logger]]
//! uuid = "6f1c2a4e-..."
//! name = "Errors to database"
//! level = "error"
//! running = true
//! system = false
//! stream = "events"
//!
//! [logger.handler]
//! type = "database"
//! retention = { max_age_hours = 168, max_records = 10000 }
//! ```

use crate::error::{Error, Result, StorageError};
use crate::processor::{Pipeline, PrivacyFlags, ProcessorSet};
use crate::record::{BucketRecord, EventRecord, Level, TraceRecord};
use crate::storage::{
    bucket_name, CacheBucket, Database, FileStore, Medium, ProcessCache, RecordFilter,
    RetentionPolicy, StorageBackend,
};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Prefix of every bucket name
pub const BUCKET_PREFIX: &str = "fanlog";

/// Upper bound accepted for `max_records`
pub const MAX_RETENTION_RECORDS: u32 = 1_000_000;

/// Upper bound accepted for `max_age_hours` (ten years)
pub const MAX_RETENTION_HOURS: u32 = 87_600;

pub const SYSTEM_LOGGER_NAME: &str = "System";

/// Storage medium and its settings. One per logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerConfig {
    Database {
        #[serde(default)]
        retention: RetentionPolicy,
    },
    SharedCache {
        #[serde(default)]
        retention: RetentionPolicy,
    },
    SharedMemory {
        #[serde(default)]
        retention: RetentionPolicy,
    },
}

impl HandlerConfig {
    /// Build from a loosely typed handler name, as given on the command line.
    pub fn from_parts(handler: &str, retention: RetentionPolicy) -> Result<Self> {
        match handler {
            "database" => Ok(Self::Database { retention }),
            "shared_cache" => Ok(Self::SharedCache { retention }),
            "shared_memory" => Ok(Self::SharedMemory { retention }),
            other => Err(Error::InvalidConfig(format!(
                "unknown handler type '{}' (expected database, shared_cache or shared_memory)",
                other
            ))),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        match self {
            Self::Database { retention }
            | Self::SharedCache { retention }
            | Self::SharedMemory { retention } => *retention,
        }
    }

    pub fn medium(&self) -> Medium {
        match self {
            Self::Database { .. } => Medium::Database,
            Self::SharedCache { .. } => Medium::SharedCache,
            Self::SharedMemory { .. } => Medium::SharedMemory,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let retention = self.retention();
        if retention.max_records > MAX_RETENTION_RECORDS {
            return Err(Error::InvalidConfig(format!(
                "max_records {} exceeds the limit of {}",
                retention.max_records, MAX_RETENTION_RECORDS
            )));
        }
        if retention.max_age_hours > MAX_RETENTION_HOURS {
            return Err(Error::InvalidConfig(format!(
                "max_age_hours {} exceeds the limit of {}",
                retention.max_age_hours, MAX_RETENTION_HOURS
            )));
        }
        Ok(())
    }
}

/// Which record type a logger's bucket holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    #[default]
    Events,
    Traces,
}

/// A configured logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerDefinition {
    pub uuid: Uuid,
    pub name: String,
    pub level: Level,
    pub running: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub stream: Stream,
    pub handler: HandlerConfig,
    #[serde(default)]
    pub privacy: PrivacyFlags,
    #[serde(default)]
    pub processors: ProcessorSet,
}

impl LoggerDefinition {
    pub fn bucket_name(&self) -> String {
        bucket_name(BUCKET_PREFIX, &self.uuid)
    }

    /// Same rules as [`LoggerDraft::validate`], for definitions read back from disk.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        self.handler.validate()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidConfig("logger name cannot be empty".to_string()));
    }
    if name.chars().count() > 64 {
        return Err(Error::InvalidConfig(
            "logger name cannot exceed 64 characters".to_string(),
        ));
    }
    Ok(())
}

/// Everything a caller may set when creating or editing a logger.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggerDraft {
    pub name: String,
    pub handler: HandlerConfig,
    pub level: Level,
    pub running: bool,
    pub stream: Stream,
    pub privacy: PrivacyFlags,
    pub processors: ProcessorSet,
}

impl LoggerDraft {
    pub fn new(name: impl Into<String>, handler: HandlerConfig) -> Self {
        Self {
            name: name.into(),
            handler,
            level: Level::Debug,
            running: true,
            stream: Stream::Events,
            privacy: PrivacyFlags::default(),
            processors: ProcessorSet::default(),
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn paused(mut self) -> Self {
        self.running = false;
        self
    }

    pub fn stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    pub fn privacy(mut self, privacy: PrivacyFlags) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn processors(mut self, processors: ProcessorSet) -> Self {
        self.processors = processors;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        self.handler.validate()
    }

    fn into_definition(self, uuid: Uuid, system: bool) -> LoggerDefinition {
        LoggerDefinition {
            uuid,
            name: self.name.trim().to_string(),
            level: self.level,
            running: self.running,
            system,
            stream: self.stream,
            handler: self.handler,
            privacy: self.privacy,
            processors: self.processors,
        }
    }
}

/// A logger's bucket, typed by stream.
#[derive(Clone)]
pub enum Bucket {
    Events(Arc<dyn StorageBackend<EventRecord>>),
    Traces(Arc<dyn StorageBackend<TraceRecord>>),
}

impl Bucket {
    pub fn name(&self) -> &str {
        match self {
            Bucket::Events(b) => b.name(),
            Bucket::Traces(b) => b.name(),
        }
    }

    pub fn medium(&self) -> Medium {
        match self {
            Bucket::Events(b) => b.medium(),
            Bucket::Traces(b) => b.medium(),
        }
    }

    pub fn available(&self) -> bool {
        match self {
            Bucket::Events(b) => b.available(),
            Bucket::Traces(b) => b.available(),
        }
    }

    pub async fn initialize(&self) -> bool {
        match self {
            Bucket::Events(b) => b.initialize().await,
            Bucket::Traces(b) => b.initialize().await,
        }
    }

    pub async fn update_schema(&self) -> std::result::Result<bool, StorageError> {
        match self {
            Bucket::Events(b) => b.update_schema().await,
            Bucket::Traces(b) => b.update_schema().await,
        }
    }

    pub async fn finalize(&self) -> bool {
        match self {
            Bucket::Events(b) => b.finalize().await,
            Bucket::Traces(b) => b.finalize().await,
        }
    }

    pub async fn force_purge(&self) -> u64 {
        match self {
            Bucket::Events(b) => b.force_purge().await,
            Bucket::Traces(b) => b.force_purge().await,
        }
    }

    pub async fn cron_clean(&self, policy: &RetentionPolicy) -> u64 {
        match self {
            Bucket::Events(b) => b.cron_clean(policy).await,
            Bucket::Traces(b) => b.cron_clean(policy).await,
        }
    }

    pub async fn get_count(&self, filter: &RecordFilter) -> u64 {
        match self {
            Bucket::Events(b) => b.get_count(filter).await,
            Bucket::Traces(b) => b.get_count(filter).await,
        }
    }

    pub fn events(&self) -> Option<&Arc<dyn StorageBackend<EventRecord>>> {
        match self {
            Bucket::Events(b) => Some(b),
            Bucket::Traces(_) => None,
        }
    }

    pub fn traces(&self) -> Option<&Arc<dyn StorageBackend<TraceRecord>>> {
        match self {
            Bucket::Traces(b) => Some(b),
            Bucket::Events(_) => None,
        }
    }
}

/// Creates buckets on the configured media.
#[derive(Clone)]
pub struct BackendFactory {
    database: Database,
    cache: ProcessCache,
    shared_memory: FileStore,
}

impl BackendFactory {
    pub fn new(database: Database, cache: ProcessCache, shared_memory: FileStore) -> Self {
        Self {
            database,
            cache,
            shared_memory,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn build<R: BucketRecord>(
        &self,
        handler: &HandlerConfig,
        name: &str,
    ) -> std::result::Result<Arc<dyn StorageBackend<R>>, StorageError> {
        Ok(match handler {
            HandlerConfig::Database { .. } => Arc::new(self.database.bucket::<R>(name)?),
            HandlerConfig::SharedCache { .. } => {
                Arc::new(CacheBucket::<R, _>::new(self.cache.clone(), name))
            }
            HandlerConfig::SharedMemory { .. } => {
                Arc::new(CacheBucket::<R, _>::new(self.shared_memory.clone(), name))
            }
        })
    }

    /// Bucket for a logger definition.
    pub fn bucket(&self, definition: &LoggerDefinition) -> Result<Bucket> {
        let name = definition.bucket_name();
        Ok(match definition.stream {
            Stream::Events => Bucket::Events(self.build(&definition.handler, &name)?),
            Stream::Traces => Bucket::Traces(self.build(&definition.handler, &name)?),
        })
    }
}

/// A logger ready for dispatch: definition, bucket and pipeline.
#[derive(Clone)]
pub struct ActiveLogger {
    pub definition: LoggerDefinition,
    pub bucket: Bucket,
    pub pipeline: Arc<Pipeline>,
}

impl ActiveLogger {
    fn new(definition: LoggerDefinition, bucket: Bucket, salt: &str) -> Self {
        let pipeline = match definition.stream {
            Stream::Events => {
                Pipeline::for_logger(&definition.processors, &definition.privacy, salt)
            }
            Stream::Traces => Pipeline::new(),
        };
        Self {
            definition,
            bucket,
            pipeline: Arc::new(pipeline),
        }
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Clone, Default)]
pub struct LoggerSet {
    loggers: Vec<Arc<ActiveLogger>>,
}

impl LoggerSet {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ActiveLogger>> {
        self.loggers.iter()
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&Arc<ActiveLogger>> {
        self.loggers.iter().find(|l| l.definition.uuid == *uuid)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "logger")]
    loggers: Vec<LoggerDefinition>,
}

/// The set of configured loggers.
///
/// # Example
///
/// ```ignore
/// let registry = LoggerRegistry::new(factory, "salt", Some("loggers.toml".into()));
/// registry.load().await?;
/// registry.ensure_system_logger().await?;
/// let id = registry
///     .create(LoggerDraft::new("errors", HandlerConfig::Database { retention }).level(Level::Error))
///     .await?;
/// ```
pub struct LoggerRegistry {
    factory: BackendFactory,
    salt: String,
    path: Option<PathBuf>,
    loggers: Mutex<Vec<Arc<ActiveLogger>>>,
    published: ArcSwap<LoggerSet>,
}

impl LoggerRegistry {
    pub fn new(factory: BackendFactory, salt: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            factory,
            salt: salt.into(),
            path,
            loggers: Mutex::new(Vec::new()),
            published: ArcSwap::from_pointee(LoggerSet::default()),
        }
    }

    pub fn factory(&self) -> &BackendFactory {
        &self.factory
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current loggers, as seen by dispatch.
    pub fn snapshot(&self) -> Arc<LoggerSet> {
        self.published.load_full()
    }

    fn publish(&self, loggers: &[Arc<ActiveLogger>]) {
        self.published.store(Arc::new(LoggerSet {
            loggers: loggers.to_vec(),
        }));
        crate::metrics::record_logger_count(loggers.len());
    }

    /// Build the bucket and pipeline of a definition without touching storage.
    fn prepare(&self, definition: LoggerDefinition) -> Result<Arc<ActiveLogger>> {
        let bucket = self.factory.bucket(&definition)?;
        Ok(Arc::new(ActiveLogger::new(definition, bucket, &self.salt)))
    }

    /// Provision and migrate a logger's bucket.
    async fn provision(&self, logger: &ActiveLogger) {
        let definition = &logger.definition;
        let bucket = &logger.bucket;
        if !bucket.initialize().await {
            tracing::warn!(
                logger = %definition.uuid,
                bucket = %bucket.name(),
                medium = %bucket.medium(),
                "Bucket could not be provisioned; records will be dropped until it is available"
            );
        }
        // A failed migration is already alerted; the logger keeps its old table
        if let Err(e) = bucket.update_schema().await {
            tracing::warn!(logger = %definition.uuid, error = %e, "Bucket schema left at previous version");
        }
    }

    /// Check a set of stored definitions before any of them is activated.
    ///
    /// A paused system logger is started again.
    fn check_loaded(definitions: &mut [LoggerDefinition]) -> Result<()> {
        let mut seen = HashSet::with_capacity(definitions.len());
        let mut system = None;
        for definition in definitions.iter_mut() {
            definition.validate().map_err(|e| {
                Error::InvalidRegistry(format!("logger {}: {}", definition.uuid, e))
            })?;
            if !seen.insert(definition.uuid) {
                return Err(Error::InvalidRegistry(format!(
                    "duplicate logger uuid {}",
                    definition.uuid
                )));
            }
            if definition.system {
                if let Some(first) = system {
                    return Err(Error::InvalidRegistry(format!(
                        "more than one system logger ({} and {})",
                        first, definition.uuid
                    )));
                }
                system = Some(definition.uuid);
                if !definition.running {
                    tracing::warn!(logger = %definition.uuid, "System logger was stored paused; starting it");
                    definition.running = true;
                }
            }
        }
        Ok(())
    }

    /// Replace the registry with the definitions stored in the registry file.
    ///
    /// A missing file leaves the registry empty. Returns the number of loggers.
    pub async fn load(&self) -> Result<usize> {
        let Some(path) = &self.path else {
            return Ok(0);
        };

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No registry file yet");
                return Ok(0);
            }
            Err(source) => {
                return Err(Error::RegistryRead {
                    path: path.clone(),
                    source,
                })
            }
        };
        let mut file: RegistryFile = toml::from_str(&contents)?;
        Self::check_loaded(&mut file.loggers)?;

        let mut loaded = Vec::with_capacity(file.loggers.len());
        for definition in file.loggers {
            let logger = self.prepare(definition)?;
            self.provision(&logger).await;
            loaded.push(logger);
        }

        let mut loggers = self.loggers.lock().await;
        *loggers = loaded;
        self.publish(&loggers);

        tracing::info!(path = %path.display(), count = loggers.len(), "Loaded logger registry");
        Ok(loggers.len())
    }

    /// Write the current definitions to the registry file.
    ///
    /// Every mutation already saves; this is for rewriting a file that was
    /// edited or removed by hand.
    pub async fn save(&self) -> Result<()> {
        let loggers = self.loggers.lock().await;
        self.persist(&loggers).await
    }

    async fn persist(&self, loggers: &[Arc<ActiveLogger>]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = RegistryFile {
            loggers: loggers.iter().map(|l| l.definition.clone()).collect(),
        };
        let contents = toml::to_string_pretty(&file)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| Error::RegistryWrite {
                    path: path.clone(),
                    source,
                })?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|source| Error::RegistryWrite {
                path: path.clone(),
                source,
            })
    }

    /// Install a candidate set of loggers once the registry file holds it.
    ///
    /// On a write failure the current set stays in memory and in dispatch.
    async fn commit(
        &self,
        loggers: &mut Vec<Arc<ActiveLogger>>,
        next: Vec<Arc<ActiveLogger>>,
    ) -> Result<()> {
        self.persist(&next).await?;
        *loggers = next;
        self.publish(loggers);
        Ok(())
    }

    /// Install the permanent system logger unless one exists.
    ///
    /// It lives in the file-backed shared memory store so that its records
    /// outlive the process that wrote them.
    pub async fn ensure_system_logger(&self) -> Result<Uuid> {
        let mut loggers = self.loggers.lock().await;
        if let Some(existing) = loggers.iter().find(|l| l.definition.system) {
            return Ok(existing.definition.uuid);
        }

        let draft = LoggerDraft::new(
            SYSTEM_LOGGER_NAME,
            HandlerConfig::SharedMemory {
                retention: RetentionPolicy::new(0, 1000),
            },
        )
        .level(Level::Info);
        let logger = self.prepare(draft.into_definition(Uuid::new_v4(), true))?;
        let uuid = logger.definition.uuid;

        let mut next = loggers.clone();
        next.push(logger.clone());
        self.persist(&next).await?;
        self.provision(&logger).await;
        *loggers = next;
        self.publish(&loggers);

        tracing::info!(logger = %uuid, "Installed system logger");
        Ok(uuid)
    }

    /// Register a new logger and provision its bucket.
    pub async fn create(&self, draft: LoggerDraft) -> Result<Uuid> {
        draft.validate()?;
        let logger = self.prepare(draft.into_definition(Uuid::new_v4(), false))?;
        let uuid = logger.definition.uuid;

        let mut loggers = self.loggers.lock().await;
        let mut next = loggers.clone();
        next.push(logger.clone());
        self.persist(&next).await?;
        self.provision(&logger).await;
        *loggers = next;
        self.publish(&loggers);

        tracing::info!(logger = %uuid, "Logger created");
        Ok(uuid)
    }

    fn position(loggers: &[Arc<ActiveLogger>], uuid: Uuid) -> Result<usize> {
        loggers
            .iter()
            .position(|l| l.definition.uuid == uuid)
            .ok_or(Error::LoggerNotFound(uuid))
    }

    fn editable(loggers: &[Arc<ActiveLogger>], uuid: Uuid) -> Result<usize> {
        let index = Self::position(loggers, uuid)?;
        if loggers[index].definition.system {
            return Err(Error::SystemLogger(uuid));
        }
        Ok(index)
    }

    /// Replace the settings of a logger. The UUID and running state are kept.
    ///
    /// Moving to another medium or stream finalizes the old bucket.
    pub async fn update(&self, uuid: Uuid, draft: LoggerDraft) -> Result<()> {
        draft.validate()?;
        let mut loggers = self.loggers.lock().await;
        let index = Self::editable(&loggers, uuid)?;
        let current = loggers[index].clone();

        let mut definition = draft.into_definition(uuid, false);
        definition.running = current.definition.running;

        let relocated = definition.handler.medium() != current.definition.handler.medium()
            || definition.stream != current.definition.stream;
        let logger = if relocated {
            self.prepare(definition)?
        } else {
            Arc::new(ActiveLogger::new(definition, current.bucket.clone(), &self.salt))
        };

        let mut next = loggers.clone();
        next[index] = logger.clone();
        self.persist(&next).await?;

        // Old and new bucket may share a table name, so the old one goes first
        if relocated {
            current.bucket.finalize().await;
            self.provision(&logger).await;
        }
        *loggers = next;
        self.publish(&loggers);

        tracing::info!(logger = %uuid, relocated = relocated, "Logger updated");
        Ok(())
    }

    async fn set_running(&self, uuid: Uuid, running: bool) -> Result<()> {
        let mut loggers = self.loggers.lock().await;
        let index = if running {
            Self::position(&loggers, uuid)?
        } else {
            Self::editable(&loggers, uuid)?
        };
        if loggers[index].definition.running == running {
            return Ok(());
        }

        let mut changed = (*loggers[index]).clone();
        changed.definition.running = running;
        let mut next = loggers.clone();
        next[index] = Arc::new(changed);
        self.commit(&mut loggers, next).await?;

        tracing::info!(logger = %uuid, running = running, "Logger state changed");
        Ok(())
    }

    pub async fn pause(&self, uuid: Uuid) -> Result<()> {
        self.set_running(uuid, false).await
    }

    pub async fn start(&self, uuid: Uuid) -> Result<()> {
        self.set_running(uuid, true).await
    }

    /// Remove a logger and finalize its bucket.
    ///
    /// The bucket is finalized only once the logger is gone from the registry
    /// file and from dispatch.
    pub async fn delete(&self, uuid: Uuid) -> Result<()> {
        let mut loggers = self.loggers.lock().await;
        let index = Self::editable(&loggers, uuid)?;
        let mut next = loggers.clone();
        let removed = next.remove(index);
        self.commit(&mut loggers, next).await?;

        if !removed.bucket.finalize().await {
            tracing::warn!(logger = %uuid, bucket = %removed.bucket.name(), "Bucket could not be finalized");
        }

        tracing::info!(logger = %uuid, "Logger deleted");
        Ok(())
    }

    /// Empty a logger's bucket. Returns the number of removed records.
    pub async fn purge(&self, uuid: Uuid) -> Result<u64> {
        let logger = self.active(uuid).await.ok_or(Error::LoggerNotFound(uuid))?;
        let removed = logger.bucket.force_purge().await;
        tracing::info!(logger = %uuid, removed = removed, "Logger bucket purged");
        Ok(removed)
    }

    pub async fn active(&self, uuid: Uuid) -> Option<Arc<ActiveLogger>> {
        let loggers = self.loggers.lock().await;
        loggers.iter().find(|l| l.definition.uuid == uuid).cloned()
    }

    pub async fn get(&self, uuid: Uuid) -> Option<LoggerDefinition> {
        self.active(uuid).await.map(|l| l.definition.clone())
    }

    /// Definitions in registration order.
    pub async fn list(&self) -> Vec<LoggerDefinition> {
        let loggers = self.loggers.lock().await;
        loggers.iter().map(|l| l.definition.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::EventRecord;
    use tempfile::TempDir;

    async fn create_test_registry(path: Option<PathBuf>) -> (LoggerRegistry, TempDir) {
        let temp = TempDir::new().unwrap();
        let factory = BackendFactory::new(
            Database::in_memory().await.unwrap(),
            ProcessCache::new(),
            FileStore::open(temp.path().join("shm")).unwrap(),
        );
        (LoggerRegistry::new(factory, "test-salt", path), temp)
    }

    fn database(max_records: u32) -> HandlerConfig {
        HandlerConfig::Database {
            retention: RetentionPolicy::new(0, max_records),
        }
    }

    #[test]
    fn test_handler_from_parts_rejects_unknown_type() {
        let err = HandlerConfig::from_parts("syslog", RetentionPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(
            HandlerConfig::from_parts("shared_memory", RetentionPolicy::default())
                .unwrap()
                .medium(),
            Medium::SharedMemory
        );
    }

    #[test]
    fn test_handler_config_deserialize_rejects_unknown_type() {
        let result: std::result::Result<HandlerConfig, _> = toml::from_str("type = \"slack\"");
        assert!(result.is_err());
        let handler: HandlerConfig = toml::from_str("type = \"shared_cache\"").unwrap();
        assert_eq!(handler.retention(), RetentionPolicy::default());
    }

    #[test]
    fn test_draft_validation() {
        assert!(LoggerDraft::new("  ", database(10)).validate().is_err());
        assert!(LoggerDraft::new("big", database(MAX_RETENTION_RECORDS + 1))
            .validate()
            .is_err());
        assert!(LoggerDraft::new("ok", database(10)).validate().is_ok());
    }

    #[tokio::test]
    async fn test_create_provisions_bucket_and_publishes() {
        let (registry, _temp) = create_test_registry(None).await;
        let uuid = registry
            .create(LoggerDraft::new("errors", database(100)).level(Level::Error))
            .await
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let logger = snapshot.get(&uuid).unwrap();
        assert_eq!(logger.definition.level, Level::Error);
        assert_eq!(logger.bucket.medium(), Medium::Database);

        let events = logger.bucket.events().unwrap();
        assert!(events
            .insert_value(&EventRecord::new(Level::Error, "x"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_invalid_draft_is_not_registered() {
        let (registry, _temp) = create_test_registry(None).await;
        assert!(registry.create(LoggerDraft::new("", database(1))).await.is_err());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_system_logger_is_protected() {
        let (registry, _temp) = create_test_registry(None).await;
        let system = registry.ensure_system_logger().await.unwrap();
        assert_eq!(registry.ensure_system_logger().await.unwrap(), system);

        assert!(matches!(
            registry.pause(system).await,
            Err(Error::SystemLogger(_))
        ));
        assert!(matches!(
            registry.delete(system).await,
            Err(Error::SystemLogger(_))
        ));
        assert!(matches!(
            registry
                .update(system, LoggerDraft::new("renamed", database(1)))
                .await,
            Err(Error::SystemLogger(_))
        ));
        assert!(registry.start(system).await.is_ok());

        let definition = registry.get(system).await.unwrap();
        assert!(definition.running && definition.system);
        assert_eq!(definition.level, Level::Info);
    }

    #[tokio::test]
    async fn test_pause_and_start() {
        let (registry, _temp) = create_test_registry(None).await;
        let uuid = registry
            .create(LoggerDraft::new("l", database(0)))
            .await
            .unwrap();

        registry.pause(uuid).await.unwrap();
        assert!(!registry.snapshot().get(&uuid).unwrap().definition.running);
        registry.start(uuid).await.unwrap();
        assert!(registry.snapshot().get(&uuid).unwrap().definition.running);

        assert!(matches!(
            registry.pause(Uuid::new_v4()).await,
            Err(Error::LoggerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_finalizes_bucket() {
        let (registry, _temp) = create_test_registry(None).await;
        let uuid = registry
            .create(LoggerDraft::new("gone", database(0)))
            .await
            .unwrap();
        let bucket = registry.snapshot().get(&uuid).unwrap().bucket.clone();

        registry.delete(uuid).await.unwrap();
        assert!(registry.snapshot().is_empty());
        assert!(registry
            .factory()
            .database()
            .bucket_versions()
            .await
            .unwrap()
            .is_empty());
        assert!(bucket
            .events()
            .unwrap()
            .insert_value(&EventRecord::new(Level::Info, "x"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_update_keeps_uuid_and_relocates() {
        let (registry, _temp) = create_test_registry(None).await;
        let uuid = registry
            .create(LoggerDraft::new("moving", database(0)))
            .await
            .unwrap();
        registry.pause(uuid).await.unwrap();

        let shm = HandlerConfig::SharedMemory {
            retention: RetentionPolicy::new(24, 0),
        };
        registry
            .update(uuid, LoggerDraft::new("moved", shm).level(Level::Warning))
            .await
            .unwrap();

        let logger = registry.active(uuid).await.unwrap();
        assert_eq!(logger.definition.name, "moved");
        assert!(!logger.definition.running);
        assert_eq!(logger.bucket.medium(), Medium::SharedMemory);
        assert!(registry
            .factory()
            .database()
            .bucket_versions()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_preserve_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loggers.toml");

        let (registry, _temp) = create_test_registry(Some(path.clone())).await;
        let system = registry.ensure_system_logger().await.unwrap();
        let traces = registry
            .create(LoggerDraft::new("traces", database(50)).stream(Stream::Traces))
            .await
            .unwrap();
        let privacy = PrivacyFlags {
            obfuscate_ip: true,
            pseudonymize_user: false,
        };
        let private = registry
            .create(
                LoggerDraft::new("private", database(0))
                    .privacy(privacy)
                    .paused(),
            )
            .await
            .unwrap();

        let reloaded = LoggerRegistry::new(registry.factory().clone(), "test-salt", Some(path));
        assert_eq!(reloaded.load().await.unwrap(), 3);

        let order: Vec<Uuid> = reloaded.list().await.iter().map(|d| d.uuid).collect();
        assert_eq!(order, vec![system, traces, private]);
        assert_eq!(reloaded.get(private).await.unwrap(), registry.get(private).await.unwrap());
        assert_eq!(
            reloaded.get(traces).await.unwrap().stream,
            Stream::Traces
        );

        std::fs::remove_file(reloaded.path().unwrap()).unwrap();
        reloaded.save().await.unwrap();
        assert!(reloaded.path().unwrap().exists());
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loggers.toml");
        std::fs::write(&path, "[[logger]]\nname = 3\n").unwrap();

        let (registry, _temp) = create_test_registry(Some(path)).await;
        assert!(matches!(
            registry.load().await,
            Err(Error::RegistryParse(_))
        ));
    }

    fn logger_entry(uuid: Uuid, name: &str, system: bool, running: bool, max_records: u64) -> String {
        format!(
            "[[logger]]\nuuid = \"{}\"\nname = \"{}\"\nlevel = \"info\"\nrunning = {}\nsystem = {}\n\n\
             [logger.handler]\ntype = \"database\"\nretention = {{ max_age_hours = 0, max_records = {} }}\n\n",
            uuid, name, running, system, max_records
        )
    }

    #[tokio::test]
    async fn test_load_restarts_paused_system_logger() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loggers.toml");
        let system = Uuid::new_v4();
        std::fs::write(&path, logger_entry(system, "System", true, false, 100)).unwrap();

        let (registry, _temp) = create_test_registry(Some(path)).await;
        assert_eq!(registry.load().await.unwrap(), 1);
        assert!(registry.get(system).await.unwrap().running);
        assert!(registry.snapshot().get(&system).unwrap().definition.running);
        assert_eq!(registry.ensure_system_logger().await.unwrap(), system);
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_definitions() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cases = [
            logger_entry(a, "", true, false, 100),
            logger_entry(a, "huge", false, true, 4_000_000_000),
            logger_entry(a, "first", false, true, 10) + &logger_entry(a, "second", false, true, 10),
            logger_entry(a, "System", true, true, 10) + &logger_entry(b, "Other", true, true, 10),
        ];

        for contents in cases {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("loggers.toml");
            std::fs::write(&path, &contents).unwrap();

            let (registry, _temp) = create_test_registry(Some(path)).await;
            let result = registry.load().await;
            assert!(
                matches!(result, Err(Error::InvalidRegistry(_))),
                "accepted:\n{}",
                contents
            );
            assert!(registry.list().await.is_empty());
            assert!(registry.snapshot().is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("registry");
        let path = parent.join("loggers.toml");

        let (registry, _temp) = create_test_registry(Some(path)).await;
        let kept = registry
            .create(LoggerDraft::new("kept", database(0)))
            .await
            .unwrap();

        // Replace the registry directory with a plain file
        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, "not a directory").unwrap();

        assert!(matches!(
            registry.create(LoggerDraft::new("lost", database(0))).await,
            Err(Error::RegistryWrite { .. })
        ));
        assert!(matches!(
            registry.pause(kept).await,
            Err(Error::RegistryWrite { .. })
        ));
        assert!(matches!(
            registry.delete(kept).await,
            Err(Error::RegistryWrite { .. })
        ));

        let listed: Vec<Uuid> = registry.list().await.iter().map(|d| d.uuid).collect();
        assert_eq!(listed, vec![kept]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let logger = snapshot.get(&kept).unwrap();
        assert!(logger.definition.running);

        // The bucket of the logger that failed to delete is still provisioned
        assert_eq!(
            registry.factory().database().bucket_versions().await.unwrap().len(),
            1
        );
        assert!(logger
            .bucket
            .events()
            .unwrap()
            .insert_value(&EventRecord::new(Level::Info, "still here"))
            .await
            .is_some());
    }
}
