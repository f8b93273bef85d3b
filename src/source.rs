//! Where samples come from
//!
//! Samples are either pushed into a [`Metric`](crate::metric::Metric) one by
//! one (`Metric::update`, or `MonitorHandle::sample` through the actor) or
//! pulled in bulk from a [`SampleSource`].

use async_trait::async_trait;

use crate::storage::StorageResult;
use crate::{TimeRange, TimeseriesDataPoint};

/// Pull side of the sample feed
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Samples of `metric_id` within `range`, ordered by timestamp (oldest
    /// first), at most `limit` of them when given.
    async fn get_samples(
        &self,
        metric_id: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> StorageResult<Vec<TimeseriesDataPoint>>;
}
