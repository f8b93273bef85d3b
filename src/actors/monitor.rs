//! MonitorActor - Owns the metrics and rules of one entity
//!
//! All state of an entity (metric windows, meters, rules, alert history) lives
//! inside a single task. Samples, queries and rule changes arrive as
//! [`MonitorCommand`]s and are processed one at a time, so evaluation of a
//! rule never overlaps with another evaluation or with a change to the rule.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};

use super::messages::{EntityStatus, MetricStatus, MonitorCommand, RuleStatus};
use crate::alerts::{Alert, AlertId, AlertQuery};
use crate::config::EntityConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::events::{AlertSubscription, EventSink};
use crate::meter::{DecayWindow, TICK_INTERVAL_MS};
use crate::metric::Metric;
use crate::rules::{EvaluationReport, RuleManager, RuleSpec};
use crate::source::SampleSource;
use crate::stats::{AggregationType, OutlierMethod, OutlierOptions};
use crate::storage::{AggregateRow, StorageBackend};
use crate::{MetricId, RuleId, TimeRange, TimeseriesDataPoint};

const COMMAND_BUFFER: usize = 64;

/// Collaborators and settings of a monitor actor
#[derive(Clone, Default)]
pub struct MonitorOptions {
    pub store: Option<Arc<dyn StorageBackend>>,
    pub source: Option<Arc<dyn SampleSource>>,
    pub sinks: Vec<Arc<dyn EventSink>>,
    pub history_limit: Option<usize>,

    /// Capacity of each alert subscription
    pub subscription_buffer: usize,

    /// Tick decay meters from the system clock every five seconds. Leave off
    /// when samples carry synthetic timestamps.
    pub wall_clock: bool,
}

impl MonitorOptions {
    pub fn new(subscription_buffer: usize) -> Self {
        Self {
            subscription_buffer,
            ..Self::default()
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StorageBackend>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn SampleSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

pub struct MonitorActor {
    entity_id: String,

    /// Metrics in registration order
    metrics: Vec<Metric>,
    index: HashMap<MetricId, usize>,

    rules: RuleManager,
    store: Option<Arc<dyn StorageBackend>>,
    source: Option<Arc<dyn SampleSource>>,
    wall_clock: bool,
    command_rx: mpsc::Receiver<MonitorCommand>,
}

impl MonitorActor {
    pub fn new(
        entity_id: impl Into<String>,
        options: MonitorOptions,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        let mut rules = RuleManager::new(options.subscription_buffer)
            .with_history_limit(options.history_limit);
        if let Some(store) = &options.store {
            rules = rules.with_store(store.clone());
        }
        for sink in options.sinks {
            rules = rules.with_sink(sink);
        }

        Self {
            entity_id: entity_id.into(),
            metrics: vec![],
            index: HashMap::new(),
            rules,
            store: options.store,
            source: options.source,
            wall_clock: options.wall_clock,
            command_rx,
        }
    }

    fn add_metric(&mut self, metric: Metric) -> MonitorResult<()> {
        if self.index.contains_key(metric.id()) {
            return Err(MonitorError::configuration(format!(
                "metric {} already exists",
                metric.id()
            )));
        }
        debug!(metric_id = %metric.id(), "metric added");
        self.index.insert(metric.id().to_string(), self.metrics.len());
        self.metrics.push(metric);
        Ok(())
    }

    fn remove_metric(&mut self, metric_id: &str) -> MonitorResult<()> {
        let position = self
            .index
            .remove(metric_id)
            .ok_or_else(|| MonitorError::NotFound(format!("metric {metric_id}")))?;
        self.metrics.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        debug!(metric_id, "metric removed");
        Ok(())
    }

    fn metric(&self, metric_id: &str) -> MonitorResult<&Metric> {
        self.index
            .get(metric_id)
            .map(|&i| &self.metrics[i])
            .ok_or_else(|| MonitorError::NotFound(format!("metric {metric_id}")))
    }

    fn metric_mut(&mut self, metric_id: &str) -> MonitorResult<&mut Metric> {
        match self.index.get(metric_id) {
            Some(&i) => Ok(&mut self.metrics[i]),
            None => Err(MonitorError::NotFound(format!("metric {metric_id}"))),
        }
    }

    fn add_rule(&mut self, spec: RuleSpec) -> MonitorResult<()> {
        if !self.index.contains_key(&spec.metric_id) {
            return Err(MonitorError::configuration(format!(
                "rule {} refers to unknown metric {}",
                spec.id, spec.metric_id
            )));
        }
        self.rules.add_rule(spec)
    }

    /// Record a sample, persist the bucket it closed and evaluate rules.
    async fn sample(
        &mut self,
        metric_id: &str,
        sample: TimeseriesDataPoint,
    ) -> MonitorResult<EvaluationReport> {
        let index = *self
            .index
            .get(metric_id)
            .ok_or_else(|| MonitorError::NotFound(format!("metric {metric_id}")))?;

        let closed = self.metrics[index].update(sample)?;
        let mut report = EvaluationReport::default();

        if let Some(row) = closed {
            self.persist_aggregate(&row, &mut report).await;
        }

        let evaluation = self.rules.evaluate(&self.metrics[index], sample.ts).await;
        report.events.extend(evaluation.events);
        report.failures.extend(evaluation.failures);
        Ok(report)
    }

    async fn backfill(
        &mut self,
        metric_id: &str,
        range: TimeRange,
        limit: Option<usize>,
    ) -> MonitorResult<Vec<AggregateRow>> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| MonitorError::configuration("no sample source configured"))?;
        let rows = self
            .metric_mut(metric_id)?
            .backfill(source.as_ref(), range, limit)
            .await?;

        if let Some(store) = &self.store {
            for row in &rows {
                store.save_aggregate(row).await?;
            }
        }
        Ok(rows)
    }

    async fn persist_aggregate(&self, row: &AggregateRow, report: &mut EvaluationReport) {
        if let Some(store) = &self.store
            && let Err(e) = store.save_aggregate(row).await
        {
            warn!(metric_id = %row.metric_id, "failed to persist aggregate: {e}");
            report.failures.push(e.into());
        }
    }

    async fn evaluate_all(&mut self, now: i64) -> EvaluationReport {
        let mut report = EvaluationReport::default();
        for metric in &self.metrics {
            let evaluation = self.rules.evaluate(metric, now).await;
            report.events.extend(evaluation.events);
            report.failures.extend(evaluation.failures);
        }
        report
    }

    fn tick(&mut self, now: i64) {
        for metric in &mut self.metrics {
            let ticks = metric.tick(now);
            if ticks > 0 {
                trace!(metric_id = %metric.id(), "applied {ticks} decay ticks");
            }
        }
    }

    fn status(&self) -> EntityStatus {
        EntityStatus {
            entity_id: self.entity_id.clone(),
            metrics: self
                .metrics
                .iter()
                .map(|metric| MetricStatus {
                    id: metric.id().to_string(),
                    category: metric.category(),
                    value: metric.value().ok().flatten(),
                    count: metric.meter().count(),
                    rate: metric.rate(DecayWindow::Short, Duration::from_secs(1)),
                })
                .collect(),
            rules: self
                .rules
                .rules()
                .map(|rule| RuleStatus {
                    id: rule.id().to_string(),
                    metric_id: rule.metric_id().to_string(),
                    state: rule.state(),
                    active: rule.is_active(),
                    error: rule.error().map(str::to_string),
                })
                .collect(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command is received or every handle is dropped.
    #[instrument(skip(self), fields(entity = %self.entity_id))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        let mut ticker = interval(Duration::from_millis(TICK_INTERVAL_MS as u64));
        let wall_clock = self.wall_clock;

        loop {
            tokio::select! {
                _ = ticker.tick(), if wall_clock => {
                    self.tick(Utc::now().timestamp_millis());
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };
                    if !self.handle(cmd).await {
                        debug!("received shutdown command");
                        break;
                    }
                }
            }
        }

        debug!("monitor actor stopped");
    }

    /// Process one command, returns `false` on shutdown.
    async fn handle(&mut self, cmd: MonitorCommand) -> bool {
        match cmd {
            MonitorCommand::AddMetric { metric, respond_to } => {
                let _ = respond_to.send(self.add_metric(metric));
            }
            MonitorCommand::RemoveMetric { metric_id, respond_to } => {
                let _ = respond_to.send(self.remove_metric(&metric_id));
            }
            MonitorCommand::Sample {
                metric_id,
                sample,
                respond_to,
            } => {
                let result = self.sample(&metric_id, sample).await;
                let _ = respond_to.send(result);
            }
            MonitorCommand::Backfill {
                metric_id,
                range,
                limit,
                respond_to,
            } => {
                let result = self.backfill(&metric_id, range, limit).await;
                let _ = respond_to.send(result);
            }
            MonitorCommand::Evaluate { now, respond_to } => {
                let report = self.evaluate_all(now).await;
                let _ = respond_to.send(Ok(report));
            }
            MonitorCommand::Tick { now } => self.tick(now),
            MonitorCommand::GetAggregate {
                metric_id,
                range,
                kind,
                respond_to,
            } => {
                let result = self
                    .metric(&metric_id)
                    .and_then(|metric| metric.get_aggregate(range, kind));
                let _ = respond_to.send(result);
            }
            MonitorCommand::GetOutliers {
                metric_id,
                method,
                range,
                opts,
                respond_to,
            } => {
                let result = self
                    .metric(&metric_id)
                    .and_then(|metric| metric.get_outliers(method, range, opts));
                let _ = respond_to.send(result);
            }
            MonitorCommand::GetRate {
                metric_id,
                window,
                unit,
                respond_to,
            } => {
                let result = self.metric(&metric_id).map(|metric| metric.rate(window, unit));
                let _ = respond_to.send(result);
            }
            MonitorCommand::AddRule { spec, respond_to } => {
                let _ = respond_to.send(self.add_rule(spec));
            }
            MonitorCommand::DeleteRule { rule_id, respond_to } => {
                let result = self.rules.delete_rule(&rule_id).await;
                let _ = respond_to.send(result);
            }
            MonitorCommand::SetRuleStatus {
                rule_id,
                active,
                respond_to,
            } => {
                let _ = respond_to.send(self.rules.set_rule_status(&rule_id, active));
            }
            MonitorCommand::ResetRuleError { rule_id, respond_to } => {
                let _ = respond_to.send(self.rules.reset_rule_error(&rule_id));
            }
            MonitorCommand::GetAlerts { query, respond_to } => {
                let _ = respond_to.send(Ok(self.rules.get_alerts(&query)));
            }
            MonitorCommand::ClearAlerts { rule_id, respond_to } => {
                let result = self.rules.clear_alerts(&rule_id).await;
                let _ = respond_to.send(result);
            }
            MonitorCommand::MarkAlertAsRead {
                rule_id,
                alert_id,
                is_read,
                respond_to,
            } => {
                let result = self.rules.mark_alert_as_read(&rule_id, alert_id, is_read).await;
                let _ = respond_to.send(result);
            }
            MonitorCommand::Subscribe { filter, respond_to } => {
                let _ = respond_to.send(self.rules.subscribe_to_alerts(filter));
            }
            MonitorCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            MonitorCommand::Shutdown => return false,
        }
        true
    }
}

/// Handle for controlling a MonitorActor
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
    pub entity_id: String,
}

impl MonitorHandle {
    /// Spawn an empty monitor actor.
    pub fn spawn(entity_id: impl Into<String>, options: MonitorOptions) -> Self {
        let entity_id = entity_id.into();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = MonitorActor::new(entity_id.clone(), options, cmd_rx);

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            entity_id,
        }
    }

    /// Spawn an actor with the metrics and rules of `entity`. Alert history is
    /// restored from the store before the actor starts.
    pub async fn spawn_entity(
        entity: &EntityConfig,
        mut options: MonitorOptions,
        now: i64,
    ) -> MonitorResult<Self> {
        options.history_limit = entity.alert_history_limit.or(options.history_limit);

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let mut actor = MonitorActor::new(entity.id.clone(), options, cmd_rx);

        for config in &entity.metrics {
            actor.add_metric(Metric::from_config(config, entity.category, now)?)?;
        }
        for spec in &entity.rules {
            actor.add_rule(spec.clone())?;
        }
        actor.rules.restore().await?;

        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            entity_id: entity.id.clone(),
        })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MonitorCommand,
    ) -> MonitorResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| MonitorError::ActorUnavailable)?;
        rx.await.map_err(|_| MonitorError::ActorUnavailable)
    }

    pub async fn add_metric(&self, metric: Metric) -> MonitorResult<()> {
        self.request(|respond_to| MonitorCommand::AddMetric { metric, respond_to })
            .await?
    }

    pub async fn remove_metric(&self, metric_id: impl Into<MetricId>) -> MonitorResult<()> {
        let metric_id = metric_id.into();
        self.request(|respond_to| MonitorCommand::RemoveMetric { metric_id, respond_to })
            .await?
    }

    pub async fn sample(
        &self,
        metric_id: impl Into<MetricId>,
        sample: TimeseriesDataPoint,
    ) -> MonitorResult<EvaluationReport> {
        let metric_id = metric_id.into();
        self.request(|respond_to| MonitorCommand::Sample {
            metric_id,
            sample,
            respond_to,
        })
        .await?
    }

    pub async fn backfill(
        &self,
        metric_id: impl Into<MetricId>,
        range: TimeRange,
        limit: Option<usize>,
    ) -> MonitorResult<Vec<AggregateRow>> {
        let metric_id = metric_id.into();
        self.request(|respond_to| MonitorCommand::Backfill {
            metric_id,
            range,
            limit,
            respond_to,
        })
        .await?
    }

    pub async fn evaluate(&self, now: i64) -> MonitorResult<EvaluationReport> {
        self.request(|respond_to| MonitorCommand::Evaluate { now, respond_to })
            .await?
    }

    pub async fn tick(&self, now: i64) -> MonitorResult<()> {
        self.sender
            .send(MonitorCommand::Tick { now })
            .await
            .map_err(|_| MonitorError::ActorUnavailable)
    }

    pub async fn get_aggregate(
        &self,
        metric_id: impl Into<MetricId>,
        range: TimeRange,
        kind: AggregationType,
    ) -> MonitorResult<Option<f64>> {
        let metric_id = metric_id.into();
        self.request(|respond_to| MonitorCommand::GetAggregate {
            metric_id,
            range,
            kind,
            respond_to,
        })
        .await?
    }

    pub async fn get_outliers(
        &self,
        metric_id: impl Into<MetricId>,
        method: OutlierMethod,
        range: TimeRange,
        opts: OutlierOptions,
    ) -> MonitorResult<Vec<TimeseriesDataPoint>> {
        let metric_id = metric_id.into();
        self.request(|respond_to| MonitorCommand::GetOutliers {
            metric_id,
            method,
            range,
            opts,
            respond_to,
        })
        .await?
    }

    pub async fn rate(
        &self,
        metric_id: impl Into<MetricId>,
        window: DecayWindow,
        unit: Duration,
    ) -> MonitorResult<f64> {
        let metric_id = metric_id.into();
        self.request(|respond_to| MonitorCommand::GetRate {
            metric_id,
            window,
            unit,
            respond_to,
        })
        .await?
    }

    pub async fn add_rule(&self, spec: RuleSpec) -> MonitorResult<()> {
        self.request(|respond_to| MonitorCommand::AddRule { spec, respond_to })
            .await?
    }

    pub async fn delete_rule(&self, rule_id: impl Into<RuleId>) -> MonitorResult<()> {
        let rule_id = rule_id.into();
        self.request(|respond_to| MonitorCommand::DeleteRule { rule_id, respond_to })
            .await?
    }

    pub async fn set_rule_status(
        &self,
        rule_id: impl Into<RuleId>,
        active: bool,
    ) -> MonitorResult<()> {
        let rule_id = rule_id.into();
        self.request(|respond_to| MonitorCommand::SetRuleStatus {
            rule_id,
            active,
            respond_to,
        })
        .await?
    }

    pub async fn reset_rule_error(&self, rule_id: impl Into<RuleId>) -> MonitorResult<bool> {
        let rule_id = rule_id.into();
        self.request(|respond_to| MonitorCommand::ResetRuleError { rule_id, respond_to })
            .await?
    }

    pub async fn get_alerts(&self, query: AlertQuery) -> MonitorResult<Vec<Alert>> {
        self.request(|respond_to| MonitorCommand::GetAlerts { query, respond_to })
            .await?
    }

    pub async fn clear_alerts(&self, rule_id: impl Into<RuleId>) -> MonitorResult<usize> {
        let rule_id = rule_id.into();
        self.request(|respond_to| MonitorCommand::ClearAlerts { rule_id, respond_to })
            .await?
    }

    pub async fn mark_alert_as_read(
        &self,
        rule_id: impl Into<RuleId>,
        alert_id: AlertId,
        is_read: bool,
    ) -> MonitorResult<()> {
        let rule_id = rule_id.into();
        self.request(|respond_to| MonitorCommand::MarkAlertAsRead {
            rule_id,
            alert_id,
            is_read,
            respond_to,
        })
        .await?
    }

    pub async fn subscribe_to_alerts(
        &self,
        filter: Option<HashSet<RuleId>>,
    ) -> MonitorResult<AlertSubscription> {
        self.request(|respond_to| MonitorCommand::Subscribe { filter, respond_to })
            .await
    }

    /// Stop receiving events on `subscription`.
    pub fn unsubscribe(&self, subscription: AlertSubscription) {
        debug!(subscription_id = subscription.id(), "unsubscribed");
        drop(subscription);
    }

    pub async fn status(&self) -> MonitorResult<EntityStatus> {
        self.request(|respond_to| MonitorCommand::GetStatus { respond_to })
            .await
    }

    /// Gracefully shut down the actor
    pub async fn shutdown(&self) -> MonitorResult<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .map_err(|_| MonitorError::ActorUnavailable)
    }
}
