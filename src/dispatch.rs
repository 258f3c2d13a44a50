//! Event dispatch
//!
//! One emitted event is delivered to every eligible logger exactly once, in
//! registration order. A logger is eligible when it is running, holds events
//! and its threshold accepts the event's level. Each eligible logger runs its
//! own pipeline on a copy of the event and inserts the result into its
//! bucket. A failed insert is counted and dispatch moves on.

use crate::context::{ContextProvider, RuntimeContext};
use crate::processor::{CallSite, ProcessContext};
use crate::record::{ComponentClass, EventRecord, Level, TraceRecord};
use crate::registry::LoggerRegistry;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use std::time::Instant;

/// An event as emitted, before any logger processed it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub code: i64,
    pub class: ComponentClass,
    pub component: String,
    pub version: String,
    pub call_site: Option<CallSite>,
}

impl PendingEvent {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            code: 0,
            class: ComponentClass::default(),
            component: String::new(),
            version: String::new(),
            call_site: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
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

    pub fn at(mut self, call_site: CallSite) -> Self {
        self.call_site = Some(call_site);
        self
    }

    fn to_record(&self, runtime: &RuntimeContext) -> EventRecord {
        EventRecord::new(self.level, self.message.clone())
            .with_timestamp(self.timestamp)
            .with_code(self.code)
            .with_channel(runtime.channel)
            .with_component(self.class, self.component.clone(), self.version.clone())
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Buckets that stored the record
    pub delivered: usize,
    /// Buckets that dropped the record
    pub failed: usize,
    pub skipped_paused: usize,
    pub skipped_level: usize,
    /// Debug event suppressed by the host debug flag
    pub suppressed: bool,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Fans events and traces out to the loggers of a registry.
pub struct Dispatcher {
    registry: Arc<LoggerRegistry>,
    context: Arc<dyn ContextProvider>,
    respect_debug_flag: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<LoggerRegistry>, context: Arc<dyn ContextProvider>) -> Self {
        Self {
            registry,
            context,
            respect_debug_flag: false,
        }
    }

    /// When set, a host debug flag of `false` suppresses every debug event.
    pub fn respect_debug_flag(mut self, respect: bool) -> Self {
        self.respect_debug_flag = respect;
        self
    }

    pub fn registry(&self) -> &Arc<LoggerRegistry> {
        &self.registry
    }

    /// Facade for one emitting component.
    pub fn logger(
        self: &Arc<Self>,
        class: ComponentClass,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> EventLogger {
        EventLogger {
            dispatcher: Arc::clone(self),
            class,
            name: name.into(),
            version: version.into(),
        }
    }

    pub async fn dispatch(&self, event: PendingEvent) -> DispatchReport {
        let started = Instant::now();
        let runtime = self.context.current();
        let mut report = DispatchReport::default();
        crate::metrics::record_event(event.level);

        if self.respect_debug_flag && !runtime.debug_flag && event.level == Level::Debug {
            report.suppressed = true;
            crate::metrics::record_suppressed();
            return report;
        }

        let base = event.to_record(&runtime);
        let ctx = ProcessContext {
            runtime: &runtime,
            call_site: event.call_site,
        };
        let snapshot = self.registry.snapshot();

        for logger in snapshot.iter() {
            let Some(bucket) = logger.bucket.events() else {
                continue;
            };
            let definition = &logger.definition;
            if !definition.running {
                report.skipped_paused += 1;
                continue;
            }
            if !event.level.meets(definition.level) {
                report.skipped_level += 1;
                continue;
            }

            let record = logger.pipeline.run(base.clone(), &ctx);
            match bucket.insert_value(&record).await {
                Some(_) => report.delivered += 1,
                None => {
                    report.failed += 1;
                    tracing::debug!(
                        logger = %definition.uuid,
                        bucket = %bucket.name(),
                        level = %event.level,
                        "Record dropped by bucket"
                    );
                }
            }
        }

        crate::metrics::record_delivery(event.level, report.delivered, report.failed);
        crate::metrics::record_dispatch_duration(started.elapsed());
        report
    }

    /// Store a completed trace in every running trace logger.
    pub async fn dispatch_trace(&self, trace: TraceRecord) -> DispatchReport {
        let runtime = self.context.current();
        let trace = if trace.site_id.is_none() && trace.user_id.is_none() {
            trace.with_identity(runtime.site_id, runtime.user_id.clone(), runtime.session.clone())
        } else {
            trace
        };

        let mut report = DispatchReport::default();
        let snapshot = self.registry.snapshot();
        for logger in snapshot.iter() {
            let Some(bucket) = logger.bucket.traces() else {
                continue;
            };
            if !logger.definition.running {
                report.skipped_paused += 1;
                continue;
            }
            match bucket.insert_value(&trace).await {
                Some(_) => report.delivered += 1,
                None => {
                    report.failed += 1;
                    tracing::debug!(
                        logger = %logger.definition.uuid,
                        trace_id = %trace.trace_id,
                        "Trace dropped by bucket"
                    );
                }
            }
        }
        report
    }
}

/// Logging API handed to one component.
///
/// Callers pass a level, a message and at most a numeric code. Everything
/// else is derived from the runtime context, so nothing sensitive can be
/// smuggled into structured fields.
///
/// The call site is recorded through `#[track_caller]`. Class and function
/// names come from the stack at dispatch time, so they are only filled when
/// the binary carries symbols and the call and its `.await` share a line.
///
/// # Example
///
/// ```ignore
/// let log = dispatcher.logger(ComponentClass::Plugin, "backup", "1.4.0");
/// log.error("Archive upload failed", 502).await;
/// ```
#[derive(Clone)]
pub struct EventLogger {
    dispatcher: Arc<Dispatcher>,
    class: ComponentClass,
    name: String,
    version: String,
}

impl EventLogger {
    fn event(&self, level: Level, message: String, code: i64, site: &'static Location<'static>) -> PendingEvent {
        PendingEvent::new(level, message)
            .with_code(code)
            .with_component(self.class, self.name.clone(), self.version.clone())
            .at(site.into())
    }

    /// Log with a context map. Only an integer `code` entry is kept.
    #[track_caller]
    pub fn log(
        &self,
        level: Level,
        message: impl Into<String>,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> impl Future<Output = DispatchReport> + '_ {
        let code = context.get("code").and_then(|v| v.as_i64()).unwrap_or(0);
        let dropped = context.keys().filter(|k| k.as_str() != "code").count();
        if dropped > 0 {
            tracing::debug!(dropped = dropped, "Context keys other than code are ignored");
        }
        let event = self.event(level, message.into(), code, Location::caller());
        self.dispatcher.dispatch(event)
    }

    #[track_caller]
    fn at_level(&self, level: Level, message: String, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        let event = self.event(level, message, code, Location::caller());
        self.dispatcher.dispatch(event)
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Debug, message.into(), code)
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Info, message.into(), code)
    }

    #[track_caller]
    pub fn notice(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Notice, message.into(), code)
    }

    #[track_caller]
    pub fn warning(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Warning, message.into(), code)
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Error, message.into(), code)
    }

    #[track_caller]
    pub fn critical(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Critical, message.into(), code)
    }

    #[track_caller]
    pub fn alert(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Alert, message.into(), code)
    }

    #[track_caller]
    pub fn emergency(&self, message: impl Into<String>, code: i64) -> impl Future<Output = DispatchReport> + '_ {
        self.at_level(Level::Emergency, message.into(), code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContext;
    use crate::processor::PrivacyFlags;
    use crate::record::Channel;
    use crate::registry::{BackendFactory, HandlerConfig, LoggerDraft, Stream};
    use crate::storage::{Database, FileStore, ProcessCache, RecordFilter, RetentionPolicy};
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    const DATABASE: HandlerConfig = HandlerConfig::Database {
        retention: RetentionPolicy {
            max_age_hours: 0,
            max_records: 0,
        },
    };

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        context: Arc<StaticContext>,
        _temp: TempDir,
    }

    async fn create_harness(cache: ProcessCache) -> Harness {
        let temp = TempDir::new().unwrap();
        let factory = BackendFactory::new(
            Database::in_memory().await.unwrap(),
            cache,
            FileStore::open(temp.path()).unwrap(),
        );
        let registry = Arc::new(LoggerRegistry::new(factory, "salt", None));
        let context = Arc::new(StaticContext::new(RuntimeContext::for_channel(Channel::Cron)));
        let dispatcher = Arc::new(Dispatcher::new(registry, context.clone()));
        Harness {
            dispatcher,
            context,
            _temp: temp,
        }
    }

    async fn count(dispatcher: &Dispatcher, uuid: Uuid) -> u64 {
        let logger = dispatcher.registry().active(uuid).await.unwrap();
        logger.bucket.get_count(&RecordFilter::new()).await
    }

    #[tokio::test]
    async fn test_threshold_and_paused_scenario() {
        let h = create_harness(ProcessCache::new()).await;
        let registry = h.dispatcher.registry();
        let l1 = registry
            .create(LoggerDraft::new("L1", DATABASE).level(Level::Error))
            .await
            .unwrap();
        let l2 = registry
            .create(LoggerDraft::new("L2", DATABASE).level(Level::Debug).paused())
            .await
            .unwrap();

        let report = h
            .dispatcher
            .dispatch(PendingEvent::new(Level::Warning, "disk at 85%"))
            .await;
        assert_eq!(report.skipped_level, 1);
        assert_eq!(report.skipped_paused, 1);
        assert_eq!(count(&h.dispatcher, l1).await, 0);
        assert_eq!(count(&h.dispatcher, l2).await, 0);

        let report = h
            .dispatcher
            .dispatch(PendingEvent::new(Level::Critical, "disk full"))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(count(&h.dispatcher, l1).await, 1);
        assert_eq!(count(&h.dispatcher, l2).await, 0);
    }

    #[tokio::test]
    async fn test_failing_bucket_does_not_block_others() {
        let h = create_harness(ProcessCache::disabled()).await;
        let registry = h.dispatcher.registry();
        let broken = registry
            .create(LoggerDraft::new(
                "cache",
                HandlerConfig::SharedCache {
                    retention: RetentionPolicy::default(),
                },
            ))
            .await
            .unwrap();
        let healthy = registry
            .create(LoggerDraft::new("db", DATABASE))
            .await
            .unwrap();

        let report = h
            .dispatcher
            .dispatch(PendingEvent::new(Level::Error, "boom"))
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(count(&h.dispatcher, broken).await, 0);
        assert_eq!(count(&h.dispatcher, healthy).await, 1);
    }

    #[tokio::test]
    async fn test_debug_flag_suppresses_debug_only() {
        let h = create_harness(ProcessCache::new()).await;
        let uuid = h
            .dispatcher
            .registry()
            .create(LoggerDraft::new("all", DATABASE))
            .await
            .unwrap();
        let registry = h.dispatcher.registry().clone();
        let strict = Dispatcher::new(registry, h.context.clone()).respect_debug_flag(true);

        let report = strict.dispatch(PendingEvent::new(Level::Debug, "noise")).await;
        assert!(report.suppressed);
        assert_eq!(report.attempted(), 0);

        strict.dispatch(PendingEvent::new(Level::Info, "kept")).await;
        assert_eq!(count(&h.dispatcher, uuid).await, 1);

        h.context.replace(RuntimeContext {
            debug_flag: true,
            ..RuntimeContext::default()
        });
        assert!(!strict.dispatch(PendingEvent::new(Level::Debug, "now kept")).await.suppressed);
        assert_eq!(count(&h.dispatcher, uuid).await, 2);
    }

    #[tokio::test]
    async fn test_per_logger_privacy() {
        let h = create_harness(ProcessCache::new()).await;
        h.context.replace(RuntimeContext {
            remote_ip: Some("198.51.100.7".to_string()),
            ..RuntimeContext::for_channel(Channel::Wfront)
        });
        let registry = h.dispatcher.registry();
        let plain = registry
            .create(LoggerDraft::new("plain", DATABASE))
            .await
            .unwrap();
        let private = registry
            .create(LoggerDraft::new("private", DATABASE).privacy(PrivacyFlags {
                obfuscate_ip: true,
                pseudonymize_user: false,
            }))
            .await
            .unwrap();

        h.dispatcher
            .dispatch(PendingEvent::new(Level::Info, "login"))
            .await;

        let read = |uuid| {
            let dispatcher = h.dispatcher.clone();
            async move {
                let logger = dispatcher.registry().active(uuid).await.unwrap();
                let events = logger.bucket.events().unwrap().clone();
                events.get_list(&RecordFilter::new(), 0, 1).await.remove(0).record
            }
        };
        let plain_record = read(plain).await;
        let private_record = read(private).await;
        assert_eq!(plain_record.remote_ip.as_deref(), Some("198.51.100.7"));
        assert_eq!(plain_record.channel, Channel::Wfront);
        assert_ne!(private_record.remote_ip.as_deref(), Some("198.51.100.7"));
        assert!(private_record.remote_ip.is_some());
    }

    #[tokio::test]
    async fn test_event_logger_keeps_only_code() {
        let h = create_harness(ProcessCache::new()).await;
        let uuid = h
            .dispatcher
            .registry()
            .create(LoggerDraft::new("all", DATABASE))
            .await
            .unwrap();
        let log = h
            .dispatcher
            .logger(ComponentClass::Plugin, "backup", "1.4.0");

        let context = json!({"code": 504, "password": "hunter2"});
        let report = log
            .log(Level::Error, "upload failed", context.as_object().unwrap())
            .await;
        assert_eq!(report.delivered, 1);

        let logger = h.dispatcher.registry().active(uuid).await.unwrap();
        let stored = logger
            .bucket
            .events()
            .unwrap()
            .get_list(&RecordFilter::new(), 0, 1)
            .await
            .remove(0)
            .record;
        assert_eq!(stored.code, 504);
        assert_eq!(stored.component, "backup");
        assert!(stored.file.as_ref().unwrap().ends_with("dispatch.rs"));
        assert!(!serde_json::to_string(&stored).unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_level_methods_dispatch_at_their_level() {
        let h = create_harness(ProcessCache::new()).await;
        let uuid = h
            .dispatcher
            .registry()
            .create(LoggerDraft::new("warn+", DATABASE).level(Level::Warning))
            .await
            .unwrap();
        let log = h.dispatcher.logger(ComponentClass::Core, "core", "6.5");

        log.debug("d", 0).await;
        log.info("i", 0).await;
        log.notice("n", 0).await;
        log.warning("w", 0).await;
        log.error("e", 0).await;
        log.critical("c", 0).await;
        log.alert("a", 0).await;
        log.emergency("em", 0).await;
        assert_eq!(count(&h.dispatcher, uuid).await, 5);
    }

    #[tokio::test]
    async fn test_traces_go_to_trace_loggers_only() {
        let h = create_harness(ProcessCache::new()).await;
        let registry = h.dispatcher.registry();
        let events = registry
            .create(LoggerDraft::new("events", DATABASE))
            .await
            .unwrap();
        let traces = registry
            .create(LoggerDraft::new("traces", DATABASE).stream(Stream::Traces))
            .await
            .unwrap();

        let trace = TraceRecord::new("t-1", "worker", Channel::Cron, 40, Vec::new());
        let report = h.dispatcher.dispatch_trace(trace).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(count(&h.dispatcher, traces).await, 1);
        assert_eq!(count(&h.dispatcher, events).await, 0);

        let report = h
            .dispatcher
            .dispatch(PendingEvent::new(Level::Info, "x"))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(count(&h.dispatcher, traces).await, 1);
    }
}
