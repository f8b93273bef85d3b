//! Records exchanged with the persistence collaborator
//!
//! The monitor hands over closed time buckets as [`AggregateRow`]s and alerts
//! as [`Alert`](crate::alerts::Alert) records. How a backend lays them out is
//! its own business.

use serde::{Deserialize, Serialize};

use crate::MetricId;

/// Summary of one closed time bucket of a metric window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub metric_id: MetricId,

    /// Start of the bucket (milliseconds)
    pub ts: i64,

    /// Bucket width (milliseconds)
    pub period: i64,

    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,

    /// Most recent sample of the bucket
    pub last: f64,
}

impl AggregateRow {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}
