//! `tracing` layer turning host events into dispatched records.

use super::writer::BridgeWriter;
use crate::dispatch::PendingEvent;
use crate::processor::CallSite;
use crate::record::{ComponentClass, Level};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Target prefix of events emitted by this crate
const OWN_TARGET: &str = "fanlog";

/// Targets written while storing a record; forwarding them would loop
const STORAGE_TARGETS: &[&str] = &["sqlx"];

/// Forwards `tracing` events to the dispatcher.
///
/// The level comes from an explicit `severity` field when present (so the
/// nine-level scale can be used from `tracing`), otherwise from the event's
/// own level. Only an integer `code` field is carried over; every other
/// field is dropped. Events emitted by this crate are forwarded only when
/// they carry a `severity` field, so ordinary diagnostics never loop back
/// into the buckets.
pub struct BridgeLayer {
    writer: BridgeWriter,
    min_level: Level,
}

impl BridgeLayer {
    pub fn new(writer: BridgeWriter) -> Self {
        Self {
            writer,
            min_level: Level::Debug,
        }
    }

    /// Ignore events below `level` before they are queued.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warning,
        tracing::Level::INFO => Level::Info,
        tracing::Level::DEBUG | tracing::Level::TRACE => Level::Debug,
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    severity: Option<String>,
    code: Option<i64>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{:?}", value)),
            "severity" => self.severity = Some(format!("{:?}", value).trim_matches('"').to_string()),
            "code" => self.code = format!("{:?}", value).parse().ok(),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "severity" => self.severity = Some(value.to_string()),
            _ => self.record_debug(field, &value),
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "code" {
            self.code = Some(value);
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "code" {
            self.code = i64::try_from(value).ok();
        }
    }
}

impl<S> Layer<S> for BridgeLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if STORAGE_TARGETS.iter().any(|t| target.starts_with(t)) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let internal = target == OWN_TARGET || target.starts_with("fanlog::");
        if internal && visitor.severity.is_none() {
            return;
        }

        let level = visitor
            .severity
            .as_deref()
            .and_then(|s| s.parse::<Level>().ok())
            .unwrap_or_else(|| map_level(metadata.level()));
        if !level.meets(self.min_level) {
            return;
        }

        let component = target.split("::").next().unwrap_or(target);
        let class = if internal {
            ComponentClass::Core
        } else {
            ComponentClass::Library
        };
        let mut pending = PendingEvent::new(level, visitor.message.unwrap_or_default())
            .with_code(visitor.code.unwrap_or(0))
            .with_component(class, component, "");
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            pending = pending.at(CallSite {
                file,
                line,
                column: 0,
            });
        }

        self.writer.send_event(pending);
    }
}
