//! Self-instrumentation through the `metrics` facade.
//!
//! The library only emits; a host that wants these numbers installs its own
//! recorder. Without one every call is a no-op.

use crate::record::Level;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Register descriptions for every metric (safe to call repeatedly).
pub fn describe_metrics() {
    describe_counter!(
        "fanlog_events_total",
        "Events handed to the dispatcher, by level"
    );
    describe_counter!(
        "fanlog_events_delivered_total",
        "Records accepted by a logger bucket"
    );
    describe_counter!(
        "fanlog_events_dropped_total",
        "Records a logger bucket failed to store"
    );
    describe_counter!(
        "fanlog_events_suppressed_total",
        "Debug events suppressed by the host debug flag"
    );
    describe_histogram!(
        "fanlog_dispatch_duration_seconds",
        "Time spent dispatching one event to every logger"
    );
    describe_counter!(
        "fanlog_rotation_removed_total",
        "Records removed by rotation, by bucket"
    );
    describe_gauge!("fanlog_loggers", "Loggers in the published registry snapshot");
}

pub fn record_event(level: Level) {
    counter!("fanlog_events_total", "level" => level.as_str()).increment(1);
}

pub fn record_delivery(level: Level, delivered: usize, dropped: usize) {
    if delivered > 0 {
        counter!("fanlog_events_delivered_total", "level" => level.as_str())
            .increment(delivered as u64);
    }
    if dropped > 0 {
        counter!("fanlog_events_dropped_total", "level" => level.as_str())
            .increment(dropped as u64);
    }
}

pub fn record_suppressed() {
    counter!("fanlog_events_suppressed_total").increment(1);
}

pub fn record_dispatch_duration(duration: Duration) {
    histogram!("fanlog_dispatch_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_rotation(bucket: &str, removed: u64) {
    counter!("fanlog_rotation_removed_total", "bucket" => bucket.to_string()).increment(removed);
}

pub fn record_logger_count(count: usize) {
    gauge!("fanlog_loggers").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics_without_recorder() {
        describe_metrics();
        record_event(Level::Error);
        record_delivery(Level::Error, 2, 1);
        record_suppressed();
        record_dispatch_duration(Duration::from_millis(3));
        record_rotation("fanlog_abc", 10);
        record_logger_count(4);
    }
}
