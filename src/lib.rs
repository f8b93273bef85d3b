pub mod actors;
pub mod alerts;
pub mod config;
pub mod error;
pub mod events;
pub mod meter;
pub mod metric;
pub mod rules;
pub mod source;
pub mod stats;
pub mod storage;
pub mod window;

use serde::{Deserialize, Serialize};

/// Stable identifier of a metric within its owning entity.
pub type MetricId = String;

/// Stable identifier of a rule within its owning entity.
pub type RuleId = String;

/// A single timestamped sample. `ts` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesDataPoint {
    pub ts: i64,
    pub value: f64,
}

impl TimeseriesDataPoint {
    pub fn new(ts: i64, value: f64) -> Self {
        Self { ts, value }
    }
}

/// Kind of entity a metric is collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    #[default]
    Queue,
    Host,
    Redis,
}

/// Inclusive time range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Range covering every representable timestamp.
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// Range of `duration_ms` ending at `end`.
    pub fn ending_at(end: i64, duration_ms: i64) -> Self {
        Self {
            start: end.saturating_sub(duration_ms),
            end,
        }
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts <= self.end
    }
}
