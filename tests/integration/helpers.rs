//! Helper functions for integration tests

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pulse_monitor::alerts::{Alert, AlertId};
use pulse_monitor::metric::Metric;
use pulse_monitor::rules::{CompareOp, RuleSpec};
use pulse_monitor::stats::AggregationType;
use pulse_monitor::storage::{
    AggregateRow, HealthStatus, MemoryBackend, StorageBackend, StorageError, StorageResult,
};
use pulse_monitor::{MetricCategory, TimeRange, TimeseriesDataPoint};

pub const METRIC: &str = "waiting";
pub const RULE: &str = "backlog";

/// Queue depth metric over ten one-second buckets, reduced to the latest value.
pub fn create_test_metric() -> Metric {
    Metric::new(
        METRIC,
        MetricCategory::Queue,
        AggregationType::Latest,
        10_000,
        1_000,
        0,
    )
    .unwrap()
}

/// `waiting > 100`
pub fn create_test_rule() -> RuleSpec {
    RuleSpec::threshold(RULE, METRIC, CompareOp::GreaterThan, 100.0)
}

pub fn point(ts: i64, value: f64) -> TimeseriesDataPoint {
    TimeseriesDataPoint::new(ts, value)
}

/// Memory backend whose writes can be switched to fail.
#[derive(Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    failing: AtomicBool,
}

impl FailingBackend {
    pub fn new(failing: bool) -> Self {
        Self {
            inner: MemoryBackend::new(),
            failing: AtomicBool::new(failing),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::WriteFailed("backend offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn save_aggregate(&self, row: &AggregateRow) -> StorageResult<()> {
        self.check()?;
        self.inner.save_aggregate(row).await
    }

    async fn load_aggregate(
        &self,
        metric_id: &str,
        range: TimeRange,
    ) -> StorageResult<Vec<AggregateRow>> {
        self.inner.load_aggregate(metric_id, range).await
    }

    async fn save_alert(&self, alert: &Alert) -> StorageResult<()> {
        self.check()?;
        self.inner.save_alert(alert).await
    }

    async fn load_alerts(&self, rule_id: &str, range: TimeRange) -> StorageResult<Vec<Alert>> {
        self.inner.load_alerts(rule_id, range).await
    }

    async fn delete_alerts(&self, rule_id: &str) -> StorageResult<usize> {
        self.check()?;
        self.inner.delete_alerts(rule_id).await
    }

    async fn mark_alert_as_read(
        &self,
        rule_id: &str,
        alert_id: AlertId,
        is_read: bool,
    ) -> StorageResult<()> {
        self.check()?;
        self.inner.mark_alert_as_read(rule_id, alert_id, is_read).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let mut status = self.inner.health_check().await?;
        if self.failing.load(Ordering::SeqCst) {
            status.healthy = false;
            status.message = "backend offline".to_string();
        }
        Ok(status)
    }
}
