//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without external dependencies
//! - Replaying recorded samples through the monitor
//!
//! All data is lost when the backend is dropped.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::AggregateRow;
use crate::alerts::{Alert, AlertId};
use crate::source::SampleSource;
use crate::stats::{insertion_point, range_locate_by};
use crate::{MetricId, RuleId, TimeRange, TimeseriesDataPoint};

#[derive(Debug, Default)]
struct Tables {
    /// Closed buckets keyed by start
    aggregates: HashMap<MetricId, BTreeMap<i64, AggregateRow>>,
    alerts: HashMap<RuleId, BTreeMap<AlertId, Alert>>,

    /// Raw samples ordered by timestamp
    samples: HashMap<MetricId, Vec<TimeseriesDataPoint>>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record raw samples to be served through [`SampleSource`].
    pub async fn add_samples(
        &self,
        metric_id: &str,
        samples: impl IntoIterator<Item = TimeseriesDataPoint>,
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let series = tables.samples.entry(metric_id.to_string()).or_default();
        for sample in samples {
            let located = range_locate_by(series, &sample.ts, |p| p.ts)
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            let mut at = insertion_point(located);
            while at < series.len() && series[at].ts == sample.ts {
                at += 1;
            }
            series.insert(at, sample);
        }
        Ok(())
    }

    pub async fn alert_count(&self) -> usize {
        self.tables.read().await.alerts.values().map(BTreeMap::len).sum()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save_aggregate(&self, row: &AggregateRow) -> StorageResult<()> {
        debug!(metric_id = %row.metric_id, ts = row.ts, "saving aggregate");
        self.tables
            .write()
            .await
            .aggregates
            .entry(row.metric_id.clone())
            .or_default()
            .insert(row.ts, row.clone());
        Ok(())
    }

    async fn load_aggregate(
        &self,
        metric_id: &str,
        range: TimeRange,
    ) -> StorageResult<Vec<AggregateRow>> {
        ordered(range)?;
        let tables = self.tables.read().await;
        Ok(tables
            .aggregates
            .get(metric_id)
            .map(|rows| rows.range(range.start..=range.end).map(|(_, row)| row.clone()).collect())
            .unwrap_or_default())
    }

    async fn save_alert(&self, alert: &Alert) -> StorageResult<()> {
        debug!(rule_id = %alert.rule_id, alert_id = %alert.id, "saving alert");
        self.tables
            .write()
            .await
            .alerts
            .entry(alert.rule_id.clone())
            .or_default()
            .insert(alert.id, alert.clone());
        Ok(())
    }

    async fn load_alerts(&self, rule_id: &str, range: TimeRange) -> StorageResult<Vec<Alert>> {
        ordered(range)?;
        let tables = self.tables.read().await;
        let mut alerts: Vec<Alert> = tables
            .alerts
            .get(rule_id)
            .map(|alerts| {
                alerts
                    .values()
                    .filter(|alert| range.contains(alert.start))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        alerts.sort_by_key(|alert| (alert.start, alert.id));
        Ok(alerts)
    }

    async fn delete_alerts(&self, rule_id: &str) -> StorageResult<usize> {
        let removed = self
            .tables
            .write()
            .await
            .alerts
            .remove(rule_id)
            .map(|alerts| alerts.len())
            .unwrap_or(0);
        debug!(rule_id, "deleted {removed} alerts");
        Ok(removed)
    }

    async fn mark_alert_as_read(
        &self,
        rule_id: &str,
        alert_id: AlertId,
        is_read: bool,
    ) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        let alert = tables
            .alerts
            .get_mut(rule_id)
            .and_then(|alerts| alerts.get_mut(&alert_id))
            .ok_or_else(|| StorageError::NotFound(format!("alert {alert_id} of rule {rule_id}")))?;
        alert.is_read = is_read;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.tables.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("metrics".to_string(), tables.aggregates.len().to_string()),
                ("rules".to_string(), tables.alerts.len().to_string()),
            ]),
        })
    }
}

fn ordered(range: TimeRange) -> StorageResult<()> {
    if range.start > range.end {
        return Err(StorageError::QueryFailed(format!(
            "range starts at {} after it ends at {}",
            range.start, range.end
        )));
    }
    Ok(())
}

#[async_trait]
impl SampleSource for MemoryBackend {
    async fn get_samples(
        &self,
        metric_id: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> StorageResult<Vec<TimeseriesDataPoint>> {
        ordered(range)?;
        let tables = self.tables.read().await;
        Ok(tables
            .samples
            .get(metric_id)
            .map(|series| {
                series
                    .iter()
                    .filter(|p| range.contains(p.ts))
                    .take(limit.unwrap_or(usize::MAX))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}
