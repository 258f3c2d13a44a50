//! Trace builder
//!
//! Collects nested spans for one unit of work and turns them into a
//! [`TraceRecord`] when the work completes.

use crate::record::{Channel, Span, TraceRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

struct OpenSpan {
    name: String,
    start_ms: u64,
    order: usize,
}

/// Builds one trace.
///
/// # Example
///
/// ```ignore
/// let mut trace = TraceBuilder::new("web-1", Channel::Wfront);
/// trace.start_span("render");
/// trace.start_span("query");
/// trace.end_span([("table", "posts")]);
/// trace.end_span([]);
/// dispatcher.dispatch_trace(trace.finish()).await;
/// ```
pub struct TraceBuilder {
    trace_id: String,
    instance: String,
    channel: Channel,
    started: Instant,
    started_at: DateTime<Utc>,
    open: Vec<OpenSpan>,
    closed: Vec<(usize, Span)>,
    next_order: usize,
}

impl TraceBuilder {
    pub fn new(instance: impl Into<String>, channel: Channel) -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            instance: instance.into(),
            channel,
            started: Instant::now(),
            started_at: Utc::now(),
            open: Vec::new(),
            closed: Vec::new(),
            next_order: 0,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Open a span nested in the currently open one.
    pub fn start_span(&mut self, name: impl Into<String>) {
        let start_ms = self.elapsed_ms();
        self.open.push(OpenSpan {
            name: name.into(),
            start_ms,
            order: self.next_order,
        });
        self.next_order += 1;
    }

    /// Close the innermost open span. Returns `false` if none was open.
    pub fn end_span<I, K, V>(&mut self, tags: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let now = self.elapsed_ms();
        let Some(open) = self.open.pop() else {
            tracing::debug!(trace_id = %self.trace_id, "end_span without an open span");
            return false;
        };

        let tags: BTreeMap<String, String> =
            tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.closed.push((
            open.order,
            Span {
                name: open.name,
                start_ms: open.start_ms,
                duration_ms: now.saturating_sub(open.start_ms),
                tags,
            },
        ));
        true
    }

    pub fn open_spans(&self) -> usize {
        self.open.len()
    }

    /// Close any spans left open and produce the record.
    ///
    /// Spans are ordered by the moment they were started.
    pub fn finish(mut self) -> TraceRecord {
        while !self.open.is_empty() {
            self.end_span(std::iter::empty::<(String, String)>());
        }

        let duration_ms = self.elapsed_ms();
        self.closed.sort_by_key(|(order, _)| *order);
        let spans = self.closed.into_iter().map(|(_, span)| span).collect();

        TraceRecord::new(self.trace_id, self.instance, self.channel, duration_ms, spans)
            .with_timestamp(self.started_at)
    }
}
