//! Metrics API
//!
//! Named counters, gauges and histograms kept in two independent profiles
//! (production and development) and rendered on demand for external
//! collectors. This is separate from the event path: nothing here touches a
//! logger bucket.
//!
//! ## Example
//!
//! ```ignore
//! let monitor = Monitor::new(Channel::Cron, "staging");
//! monitor.create_counter(Profile::Production, "wp_cron_jobs_total", "Jobs run")?;
//! monitor.inc_counter(Profile::Production, "wp_cron_jobs_total", &[("hook", "backup")], 1.0)?;
//! let body = monitor.render(Profile::Production, Format::Prometheus);
//! ```

pub mod render;

pub use render::{render, Format, RenderContext};

use crate::record::Channel;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Instant;
use thiserror::Error;

static METRIC_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").unwrap());
static LABEL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

/// Default histogram buckets, in seconds
pub const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Error, PartialEq)]
pub enum MonitorError {
    #[error("Invalid metric name: {0}")]
    InvalidName(String),

    #[error("Invalid label name: {0}")]
    InvalidLabel(String),

    #[error("Metric {name} already exists as a {existing}")]
    KindMismatch { name: String, existing: MetricKind },

    #[error("Metric not found: {0}")]
    NotFound(String),

    #[error("Counter {0} cannot be decreased")]
    NegativeIncrement(String),

    #[error("Histogram buckets must be finite and strictly increasing")]
    InvalidBuckets,
}

/// Independent metric namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Profile {
    Production,
    Development,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Profile::Production => "production",
            Profile::Development => "development",
        })
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Profile::Production),
            "development" | "dev" => Ok(Profile::Development),
            other => Err(format!("unknown profile '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        })
    }
}

pub type Labels = BTreeMap<String, String>;

/// Accumulated observations of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramState {
    /// Per-bucket counts, not cumulative; one extra slot for `+Inf`
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
    pub min: f64,
    pub max: f64,
}

impl HistogramState {
    fn new(buckets: usize) -> Self {
        Self {
            counts: vec![0; buckets + 1],
            sum: 0.0,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn observe(&mut self, buckets: &[f64], value: f64) {
        let slot = buckets
            .iter()
            .position(|le| value <= *le)
            .unwrap_or(buckets.len());
        self.counts[slot] += 1;
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Cumulative counts per bucket bound, `+Inf` last.
    pub fn cumulative(&self) -> Vec<u64> {
        self.counts
            .iter()
            .scan(0, |acc, c| {
                *acc += c;
                Some(*acc)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Scalar(f64),
    Histogram(HistogramState),
}

/// One metric with all of its labelled series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub buckets: Vec<f64>,
    pub series: BTreeMap<Labels, SeriesValue>,
}

fn validate_name(name: &str) -> Result<(), MonitorError> {
    if METRIC_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(MonitorError::InvalidName(name.to_string()))
    }
}

fn to_labels(labels: &[(&str, &str)]) -> Result<Labels, MonitorError> {
    labels
        .iter()
        .map(|(k, v)| {
            if !LABEL_NAME_RE.is_match(k) || k.starts_with("__") {
                return Err(MonitorError::InvalidLabel(k.to_string()));
            }
            Ok((k.to_string(), v.to_string()))
        })
        .collect()
}

/// Metric store with per-profile namespaces and base labels.
pub struct Monitor {
    base_labels: Labels,
    families: DashMap<(Profile, String), MetricFamily>,
    started: Instant,
}

impl Monitor {
    /// Every rendered sample carries `channel` and `environment` labels.
    pub fn new(channel: Channel, environment: impl Into<String>) -> Self {
        let mut base_labels = Labels::new();
        base_labels.insert("channel".to_string(), channel.to_string());
        base_labels.insert("environment".to_string(), environment.into());
        Self {
            base_labels,
            families: DashMap::new(),
            started: Instant::now(),
        }
    }

    pub fn base_labels(&self) -> &Labels {
        &self.base_labels
    }

    fn create(
        &self,
        profile: Profile,
        name: &str,
        help: &str,
        kind: MetricKind,
        buckets: Vec<f64>,
    ) -> Result<(), MonitorError> {
        validate_name(name)?;
        match self.families.entry((profile, name.to_string())) {
            Entry::Occupied(existing) => {
                let existing = existing.get().kind;
                if existing != kind {
                    return Err(MonitorError::KindMismatch {
                        name: name.to_string(),
                        existing,
                    });
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(MetricFamily {
                    name: name.to_string(),
                    help: help.to_string(),
                    kind,
                    buckets,
                    series: BTreeMap::new(),
                });
            }
        }
        Ok(())
    }

    /// Create a counter. Creating an existing counter again is a no-op.
    pub fn create_counter(&self, profile: Profile, name: &str, help: &str) -> Result<(), MonitorError> {
        self.create(profile, name, help, MetricKind::Counter, Vec::new())
    }

    pub fn create_gauge(&self, profile: Profile, name: &str, help: &str) -> Result<(), MonitorError> {
        self.create(profile, name, help, MetricKind::Gauge, Vec::new())
    }

    /// Create a histogram with the given bucket bounds, or [`DEFAULT_BUCKETS`].
    pub fn create_histogram(
        &self,
        profile: Profile,
        name: &str,
        help: &str,
        buckets: Option<Vec<f64>>,
    ) -> Result<(), MonitorError> {
        let buckets = buckets.unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
        let increasing = buckets.windows(2).all(|w| w[0] < w[1]);
        if buckets.is_empty() || !increasing || buckets.iter().any(|b| !b.is_finite()) {
            return Err(MonitorError::InvalidBuckets);
        }
        self.create(profile, name, help, MetricKind::Histogram, buckets)
    }

    fn update(
        &self,
        profile: Profile,
        name: &str,
        kind: MetricKind,
        labels: &[(&str, &str)],
        apply: impl FnOnce(&mut SeriesValue, &[f64]),
    ) -> Result<(), MonitorError> {
        let labels = to_labels(labels)?;
        let mut family = self
            .families
            .get_mut(&(profile, name.to_string()))
            .ok_or_else(|| MonitorError::NotFound(name.to_string()))?;
        if family.kind != kind {
            return Err(MonitorError::KindMismatch {
                name: name.to_string(),
                existing: family.kind,
            });
        }

        let family = &mut *family;
        let initial = match kind {
            MetricKind::Histogram => SeriesValue::Histogram(HistogramState::new(family.buckets.len())),
            _ => SeriesValue::Scalar(0.0),
        };
        let series = family.series.entry(labels).or_insert(initial);
        apply(series, &family.buckets);
        Ok(())
    }

    pub fn inc_counter(
        &self,
        profile: Profile,
        name: &str,
        labels: &[(&str, &str)],
        by: f64,
    ) -> Result<(), MonitorError> {
        if by < 0.0 || by.is_nan() {
            return Err(MonitorError::NegativeIncrement(name.to_string()));
        }
        self.update(profile, name, MetricKind::Counter, labels, |series, _| {
            if let SeriesValue::Scalar(v) = series {
                *v += by;
            }
        })
    }

    pub fn set_gauge(
        &self,
        profile: Profile,
        name: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<(), MonitorError> {
        self.update(profile, name, MetricKind::Gauge, labels, |series, _| {
            if let SeriesValue::Scalar(v) = series {
                *v = value;
            }
        })
    }

    /// Add `delta` (possibly negative) to a gauge.
    pub fn add_gauge(
        &self,
        profile: Profile,
        name: &str,
        labels: &[(&str, &str)],
        delta: f64,
    ) -> Result<(), MonitorError> {
        self.update(profile, name, MetricKind::Gauge, labels, |series, _| {
            if let SeriesValue::Scalar(v) = series {
                *v += delta;
            }
        })
    }

    pub fn observe(
        &self,
        profile: Profile,
        name: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<(), MonitorError> {
        self.update(profile, name, MetricKind::Histogram, labels, |series, buckets| {
            if let SeriesValue::Histogram(state) = series {
                state.observe(buckets, value);
            }
        })
    }

    /// Families of one profile, sorted by name.
    pub fn families(&self, profile: Profile) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> = self
            .families
            .iter()
            .filter(|entry| entry.key().0 == profile)
            .map(|entry| entry.value().clone())
            .collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));
        families
    }

    /// Drop every metric of a profile.
    pub fn reset(&self, profile: Profile) {
        self.families.retain(|key, _| key.0 != profile);
    }

    pub fn render(&self, profile: Profile, format: Format) -> String {
        let ctx = RenderContext {
            timestamp: Utc::now(),
            interval_ms: self.started.elapsed().as_millis() as u64,
            base_labels: self.base_labels.clone(),
        };
        render(&self.families(profile), format, &ctx)
    }
}
