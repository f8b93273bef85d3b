//! Time-series handle binding a window, an aggregator and a decay meter to a
//! named signal.

use std::time::Duration;

use tracing::{instrument, trace, warn};

use crate::config::MetricConfig;
use crate::error::MonitorResult;
use crate::meter::{DecayMeter, DecayWindow};
use crate::source::SampleSource;
use crate::stats::{
    AggregationType, OutlierMethod, OutlierOptions, aggregate, insertion_point, outlier_indexes,
    range_locate_by,
};
use crate::storage::schema::AggregateRow;
use crate::window::{SlidingWindow, SlotDefault, WindowAdvance};
use crate::{MetricCategory, MetricId, TimeRange, TimeseriesDataPoint};

/// Samples of one time bucket, ordered by timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    samples: Vec<TimeseriesDataPoint>,
}

impl Bucket {
    pub fn samples(&self) -> &[TimeseriesDataPoint] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Insert keeping timestamp order; equal timestamps keep arrival order.
    fn insert(&mut self, point: TimeseriesDataPoint) -> MonitorResult<()> {
        let located = range_locate_by(&self.samples, &point.ts, |p| p.ts)?;
        let mut at = insertion_point(located);
        while at < self.samples.len() && self.samples[at].ts == point.ts {
            at += 1;
        }
        self.samples.insert(at, point);
        Ok(())
    }

    /// Samples with a timestamp inside `range`.
    fn within(&self, range: &TimeRange) -> MonitorResult<&[TimeseriesDataPoint]> {
        let start = self.first_at_or_after(range.start)?;
        let mut end = start;
        while end < self.samples.len() && self.samples[end].ts <= range.end {
            end += 1;
        }
        Ok(&self.samples[start..end])
    }

    fn first_at_or_after(&self, ts: i64) -> MonitorResult<usize> {
        let mut at = insertion_point(range_locate_by(&self.samples, &ts, |p| p.ts)?);
        while at > 0 && self.samples[at - 1].ts == ts {
            at -= 1;
        }
        Ok(at)
    }

    fn summarize(&self, metric_id: &str, ts: i64, period: i64) -> Option<AggregateRow> {
        let values: Vec<f64> = self.samples.iter().map(|p| p.value).collect();

        Some(AggregateRow {
            metric_id: metric_id.to_string(),
            ts,
            period,
            count: values.len(),
            sum: aggregate(AggregationType::Sum, &values)?,
            min: aggregate(AggregationType::Min, &values)?,
            max: aggregate(AggregationType::Max, &values)?,
            last: aggregate(AggregationType::Latest, &values)?,
        })
    }
}

#[derive(Debug)]
pub struct Metric {
    id: MetricId,
    category: MetricCategory,
    aggregation: AggregationType,
    description: String,
    window: SlidingWindow<Bucket>,
    meter: DecayMeter,
}

impl Metric {
    pub fn new(
        id: impl Into<MetricId>,
        category: MetricCategory,
        aggregation: AggregationType,
        duration_ms: i64,
        period_ms: i64,
        now: i64,
    ) -> MonitorResult<Self> {
        Ok(Self {
            id: id.into(),
            category,
            aggregation,
            description: String::new(),
            window: SlidingWindow::starting_at(
                duration_ms,
                period_ms,
                SlotDefault::Value(Bucket::default()),
                now,
            )?,
            meter: DecayMeter::new(now),
        })
    }

    pub fn from_config(
        config: &MetricConfig,
        entity_category: MetricCategory,
        now: i64,
    ) -> MonitorResult<Self> {
        let metric = Self::new(
            config.id.clone(),
            config.category.unwrap_or(entity_category),
            config.aggregation,
            config.duration_ms,
            config.period_ms,
            now,
        )?;
        Ok(metric.with_description(config.description.clone()))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> MetricCategory {
        self.category
    }

    pub fn aggregation(&self) -> AggregationType {
        self.aggregation
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn window(&self) -> &SlidingWindow<Bucket> {
        &self.window
    }

    /// Record a sample.
    ///
    /// Returns the summary of the bucket that was closed by this sample, if
    /// the sample moved the window forward and that bucket held data.
    /// Samples older than the window are dropped.
    pub fn update(&mut self, sample: TimeseriesDataPoint) -> MonitorResult<Option<AggregateRow>> {
        if !sample.value.is_finite() {
            warn!(metric_id = %self.id, "ignoring non-finite sample {}", sample.value);
            return Ok(None);
        }

        self.meter.tick_if_needed(sample.ts);

        let closing = self
            .window
            .current()
            .filter(|slot| self.window.bucket_of(sample.ts) > slot.index)
            .and_then(|slot| {
                slot.value.summarize(
                    &self.id,
                    self.window.bucket_start(slot.index),
                    self.window.period(),
                )
            });

        let advance = self.window.update(sample.ts);
        trace!(metric_id = %self.id, ts = sample.ts, "window {advance:?}");

        let Some(slot) = self.window.slot_for_mut(sample.ts) else {
            debug_assert_eq!(advance, WindowAdvance::Stale);
            trace!(metric_id = %self.id, "sample at {} is older than the window", sample.ts);
            return Ok(None);
        };

        slot.value.insert(sample)?;
        self.meter.update(1);

        Ok(closing)
    }

    /// Apply the decay ticks due at `now`.
    pub fn tick(&mut self, now: i64) -> usize {
        self.meter.tick_if_needed(now)
    }

    /// Samples inside `range`, oldest first.
    pub fn samples(&self, range: TimeRange) -> MonitorResult<Vec<TimeseriesDataPoint>> {
        let mut points = vec![];
        for slot in self.window.iter() {
            let bucket_start = self.window.bucket_start(slot.index);
            let bucket_end = bucket_start.saturating_add(self.window.period() - 1);
            if bucket_end < range.start || bucket_start > range.end {
                continue;
            }
            points.extend_from_slice(slot.value.within(&range)?);
        }
        Ok(points)
    }

    /// Reduce the samples in `range` with `kind`.
    pub fn get_aggregate(
        &self,
        range: TimeRange,
        kind: AggregationType,
    ) -> MonitorResult<Option<f64>> {
        let values: Vec<f64> = self.samples(range)?.iter().map(|p| p.value).collect();
        Ok(aggregate(kind, &values))
    }

    /// Reduce the whole window with the metric's own aggregation.
    pub fn value(&self) -> MonitorResult<Option<f64>> {
        self.get_aggregate(TimeRange::all(), self.aggregation)
    }

    /// Summary of every sample in the window, stamped with the start of the
    /// oldest bucket and the window duration.
    pub fn summary(&self) -> MonitorResult<Option<AggregateRow>> {
        let Some(oldest) = self.window.get(0) else {
            return Ok(None);
        };
        let bucket = Bucket {
            samples: self.samples(TimeRange::all())?,
        };
        Ok(bucket.summarize(
            &self.id,
            self.window.bucket_start(oldest.index),
            self.window.duration(),
        ))
    }

    /// Samples in `range` flagged as outliers, oldest first.
    pub fn get_outliers(
        &self,
        method: OutlierMethod,
        range: TimeRange,
        opts: OutlierOptions,
    ) -> MonitorResult<Vec<TimeseriesDataPoint>> {
        let points = self.samples(range)?;
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();

        Ok(outlier_indexes(method, &values, opts)
            .into_iter()
            .map(|i| points[i])
            .collect())
    }

    /// Smoothed event rate of the metric.
    pub fn rate(&self, window: DecayWindow, unit: Duration) -> f64 {
        self.meter.rate(window, unit)
    }

    pub fn meter(&self) -> &DecayMeter {
        &self.meter
    }

    /// Pull samples for `range` from `source` and record them.
    #[instrument(skip(self, source), fields(metric_id = %self.id))]
    pub async fn backfill(
        &mut self,
        source: &dyn SampleSource,
        range: TimeRange,
        limit: Option<usize>,
    ) -> MonitorResult<Vec<AggregateRow>> {
        let samples = source.get_samples(&self.id, range, limit).await?;
        trace!("backfilling {} samples", samples.len());

        let mut closed = vec![];
        for sample in samples {
            if let Some(row) = self.update(sample)? {
                closed.push(row);
            }
        }
        Ok(closed)
    }
}
