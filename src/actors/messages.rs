//! Message types for actor communication
//!
//! Every request carries a oneshot sender the actor answers on. Dropping the
//! receiving end is fine; the actor ignores failed replies.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::alerts::{Alert, AlertId, AlertQuery};
use crate::error::MonitorResult;
use crate::events::AlertSubscription;
use crate::meter::DecayWindow;
use crate::metric::Metric;
use crate::rules::{EvaluationReport, RuleSpec, RuleState};
use crate::stats::{AggregationType, OutlierMethod, OutlierOptions};
use crate::storage::AggregateRow;
use crate::{MetricCategory, MetricId, RuleId, TimeRange, TimeseriesDataPoint};

type Reply<T> = oneshot::Sender<MonitorResult<T>>;

/// Commands understood by the MonitorActor
#[derive(Debug)]
pub enum MonitorCommand {
    AddMetric {
        metric: Metric,
        respond_to: Reply<()>,
    },

    /// Remove a metric; rules bound to it stay registered but see no data
    RemoveMetric {
        metric_id: MetricId,
        respond_to: Reply<()>,
    },

    /// Record a sample and evaluate the rules bound to its metric
    Sample {
        metric_id: MetricId,
        sample: TimeseriesDataPoint,
        respond_to: Reply<EvaluationReport>,
    },

    /// Pull samples from the configured sample source
    Backfill {
        metric_id: MetricId,
        range: TimeRange,
        limit: Option<usize>,
        respond_to: Reply<Vec<AggregateRow>>,
    },

    /// Evaluate every rule against the current windows
    Evaluate {
        now: i64,
        respond_to: Reply<EvaluationReport>,
    },

    /// Apply decay ticks due at `now`
    Tick { now: i64 },

    GetAggregate {
        metric_id: MetricId,
        range: TimeRange,
        kind: AggregationType,
        respond_to: Reply<Option<f64>>,
    },

    GetOutliers {
        metric_id: MetricId,
        method: OutlierMethod,
        range: TimeRange,
        opts: OutlierOptions,
        respond_to: Reply<Vec<TimeseriesDataPoint>>,
    },

    GetRate {
        metric_id: MetricId,
        window: DecayWindow,
        unit: Duration,
        respond_to: Reply<f64>,
    },

    AddRule {
        spec: RuleSpec,
        respond_to: Reply<()>,
    },

    DeleteRule {
        rule_id: RuleId,
        respond_to: Reply<()>,
    },

    SetRuleStatus {
        rule_id: RuleId,
        active: bool,
        respond_to: Reply<()>,
    },

    ResetRuleError {
        rule_id: RuleId,
        respond_to: Reply<bool>,
    },

    GetAlerts {
        query: AlertQuery,
        respond_to: Reply<Vec<Alert>>,
    },

    ClearAlerts {
        rule_id: RuleId,
        respond_to: Reply<usize>,
    },

    MarkAlertAsRead {
        rule_id: RuleId,
        alert_id: AlertId,
        is_read: bool,
        respond_to: Reply<()>,
    },

    Subscribe {
        filter: Option<HashSet<RuleId>>,
        respond_to: oneshot::Sender<AlertSubscription>,
    },

    GetStatus {
        respond_to: oneshot::Sender<EntityStatus>,
    },

    /// Gracefully shut down the actor
    Shutdown,
}

/// Snapshot of an entity for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityStatus {
    pub entity_id: String,
    pub metrics: Vec<MetricStatus>,
    pub rules: Vec<RuleStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStatus {
    pub id: MetricId,
    pub category: MetricCategory,

    /// Window reduced with the metric's own aggregation
    pub value: Option<f64>,

    /// Samples recorded since creation
    pub count: u64,

    /// Samples per second over the short decay window
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStatus {
    pub id: RuleId,
    pub metric_id: MetricId,
    pub state: RuleState,
    pub active: bool,
    pub error: Option<String>,
}
