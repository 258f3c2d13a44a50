//! Retention bounds applied when a bucket is rotated.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Age and count bounds for one bucket. A value of 0 disables that bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Delete records older than this many hours
    #[serde(default)]
    pub max_age_hours: u32,

    /// Keep only this many most recent records
    #[serde(default)]
    pub max_records: u32,
}

impl RetentionPolicy {
    pub fn new(max_age_hours: u32, max_records: u32) -> Self {
        Self {
            max_age_hours,
            max_records,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_age_hours == 0 && self.max_records == 0
    }

    /// Oldest timestamp that survives the age bound, if the bound is set.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.max_age_hours > 0).then(|| now - Duration::hours(i64::from(self.max_age_hours)))
    }
}

/// Choose which entries a rotation pass removes.
///
/// `entries` must be in insertion order, oldest first. A missing timestamp
/// counts as expired. The age bound runs first, then the count bound trims
/// the oldest survivors. Each key appears at most once in the result.
///
/// # Example
///
/// ```ignore
/// let evicted = plan_evictions(&[("a", Some(old)), ("b", Some(now))], &policy, now);
/// ```
pub fn plan_evictions<K: Clone>(
    entries: &[(K, Option<DateTime<Utc>>)],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<K> {
    let cutoff = policy.cutoff(now);
    let mut evicted = Vec::new();
    let mut survivors = Vec::with_capacity(entries.len());

    for (key, timestamp) in entries {
        let expired = match (cutoff, timestamp) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(cutoff), Some(ts)) => *ts < cutoff,
        };
        if expired {
            evicted.push(key.clone());
        } else {
            survivors.push(key);
        }
    }

    let max = policy.max_records as usize;
    if max > 0 && survivors.len() > max {
        let excess = survivors.len() - max;
        evicted.extend(survivors.into_iter().take(excess).cloned());
    }

    evicted
}
