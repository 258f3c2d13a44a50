//! Background writer feeding the dispatcher.
//!
//! A `tracing` layer runs inside whatever code emits the event and must not
//! wait on storage. It hands events to this writer, which dispatches them
//! one at a time from a background task.

use crate::dispatch::{Dispatcher, PendingEvent};
use crate::record::TraceRecord;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
enum BridgeMessage {
    Event(PendingEvent),
    Trace(TraceRecord),
}

/// Totals reported by the writer task when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub events: usize,
    pub traces: usize,
    pub dropped: usize,
}

/// Handle for sending events to the background task. Clones share the task.
///
/// The task stops once every handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct BridgeWriter {
    sender: mpsc::UnboundedSender<BridgeMessage>,
}

impl BridgeWriter {
    /// Spawn the writer task.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (writer, task) = BridgeWriter::spawn(dispatcher.clone());
    /// writer.send_event(PendingEvent::new(Level::Error, "boom"));  // Non-blocking
    /// drop(writer);
    /// let stats = task.await?;
    /// ```
    pub fn spawn(dispatcher: Arc<Dispatcher>) -> (Self, JoinHandle<BridgeStats>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_task(dispatcher, rx));
        (Self { sender: tx }, handle)
    }

    /// Queue an event. Silently dropped if the task has stopped.
    pub fn send_event(&self, event: PendingEvent) {
        let _ = self.sender.send(BridgeMessage::Event(event));
    }

    pub fn send_trace(&self, trace: TraceRecord) {
        let _ = self.sender.send(BridgeMessage::Trace(trace));
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

async fn writer_task(
    dispatcher: Arc<Dispatcher>,
    mut rx: mpsc::UnboundedReceiver<BridgeMessage>,
) -> BridgeStats {
    let mut stats = BridgeStats::default();

    while let Some(message) = rx.recv().await {
        let report = match message {
            BridgeMessage::Event(event) => {
                stats.events += 1;
                dispatcher.dispatch(event).await
            }
            BridgeMessage::Trace(trace) => {
                stats.traces += 1;
                dispatcher.dispatch_trace(trace).await
            }
        };
        stats.dropped += report.failed;
    }

    tracing::debug!(
        events = stats.events,
        traces = stats.traces,
        dropped = stats.dropped,
        "Bridge writer stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContext;
    use crate::record::{Channel, Level};
    use crate::registry::{BackendFactory, HandlerConfig, LoggerDraft, LoggerRegistry, Stream};
    use crate::storage::{Database, FileStore, ProcessCache, RecordFilter, RetentionPolicy};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writer_drains_queue_before_stopping() {
        let temp = TempDir::new().unwrap();
        let factory = BackendFactory::new(
            Database::in_memory().await.unwrap(),
            ProcessCache::new(),
            FileStore::open(temp.path()).unwrap(),
        );
        let registry = Arc::new(LoggerRegistry::new(factory, "salt", None));
        let handler = HandlerConfig::SharedCache {
            retention: RetentionPolicy::default(),
        };
        let events = registry.create(LoggerDraft::new("events", handler)).await.unwrap();
        let traces = registry
            .create(LoggerDraft::new("traces", handler).stream(Stream::Traces))
            .await
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            Arc::new(StaticContext::default()),
        ));

        let (writer, task) = BridgeWriter::spawn(dispatcher);
        for i in 0..5 {
            writer.send_event(PendingEvent::new(Level::Info, format!("event {}", i)));
        }
        writer.send_trace(TraceRecord::new("t", "w", Channel::Cli, 1, Vec::new()));
        drop(writer);

        let stats = task.await.unwrap();
        assert_eq!(stats.events, 5);
        assert_eq!(stats.traces, 1);
        assert_eq!(stats.dropped, 0);

        let count = |uuid| {
            let registry = registry.clone();
            async move {
                let logger = registry.active(uuid).await.unwrap();
                logger.bucket.get_count(&RecordFilter::new()).await
            }
        };
        assert_eq!(count(events).await, 5);
        assert_eq!(count(traces).await, 1);
    }
}
