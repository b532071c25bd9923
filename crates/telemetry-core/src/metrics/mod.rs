//! Metric identities and accumulated call statistics.
//!
//! A metric is keyed by (name, scope). Scope is either the empty
//! string for the application-wide rollup table, or the name of the
//! owning transaction for the scoped table. `MetricData::merge` is
//! commutative and associative, so partial aggregates accumulated in
//! different places (per transaction, per buffer) can be folded
//! together in any order without changing the harvested totals.

pub mod aggregator;
pub mod double_buffered;

use serde::Serialize;
use std::time::Duration;

pub use aggregator::{MetricSnapshot, MetricStore};
pub use double_buffered::DoubleBufferedAggregator;

/// Scope marker for rollup (application-wide) metrics.
pub const ROLLUP_SCOPE: &str = "";

/// Identity of one accumulated statistic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricId {
    pub name: String,
    pub scope: String,
}

impl MetricId {
    pub fn rollup(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: ROLLUP_SCOPE.to_string(),
        }
    }

    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
        }
    }

    pub fn is_rollup(&self) -> bool {
        self.scope.is_empty()
    }
}

/// Accumulated call statistics for one (name, scope).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricData {
    pub call_count: u64,
    pub total_time: Duration,
    pub exclusive_time: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Sum of squared durations in seconds squared, for downstream
    /// standard-deviation computation.
    pub sum_of_squares: f64,
}

impl MetricData {
    /// Statistics for a single recorded call.
    pub fn from_sample(duration: Duration, exclusive: Duration) -> Self {
        let secs = duration.as_secs_f64();
        Self {
            call_count: 1,
            total_time: duration,
            exclusive_time: exclusive,
            min: duration,
            max: duration,
            sum_of_squares: secs * secs,
        }
    }

    /// Fold another sample into this entry.
    pub fn record(&mut self, duration: Duration, exclusive: Duration) {
        self.merge(&Self::from_sample(duration, exclusive));
    }

    /// Field-wise commutative merge of two aggregates for the same key.
    pub fn merge(&mut self, other: &Self) {
        if other.call_count == 0 {
            return;
        }
        if self.call_count == 0 {
            *self = *other;
            return;
        }
        self.call_count += other.call_count;
        self.total_time += other.total_time;
        self.exclusive_time += other.exclusive_time;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum_of_squares += other.sum_of_squares;
    }
}

/// One harvested metric entry, ready for payload serialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricSummary {
    pub name: String,
    pub scope: String,
    pub call_count: u64,
    pub total_time_secs: f64,
    pub exclusive_time_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub sum_of_squares: f64,
}

impl MetricSummary {
    pub fn new(id: MetricId, data: &MetricData) -> Self {
        Self {
            name: id.name,
            scope: id.scope,
            call_count: data.call_count,
            total_time_secs: data.total_time.as_secs_f64(),
            exclusive_time_secs: data.exclusive_time.as_secs_f64(),
            min_secs: data.min.as_secs_f64(),
            max_secs: data.max.as_secs_f64(),
            sum_of_squares: data.sum_of_squares,
        }
    }

    /// A pure counter entry, used for supportability signals where
    /// only the call count is meaningful.
    pub fn counter(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            scope: ROLLUP_SCOPE.to_string(),
            call_count: count,
            total_time_secs: 0.0,
            exclusive_time_secs: 0.0,
            min_secs: 0.0,
            max_secs: 0.0,
            sum_of_squares: 0.0,
        }
    }
}
