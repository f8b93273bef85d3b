//! Rule registry of one monitored entity
//!
//! The [`RuleManager`] owns the rules of an entity, the alert history they
//! produce and the fan-out of alert events. Evaluation takes `&mut self`, so a
//! rule is never evaluated by two callers at once; the
//! [`MonitorActor`](crate::actors::monitor::MonitorActor) serializes all access.
//!
//! ```text
//! Condition holds:
//!   Untriggered, violations < confirm_count  → Exceeding (count, no alert)
//!   Untriggered, violations == confirm_count → StartsToExceed (alert raised)
//!   Triggered                                → StillExceeding (alert updated)
//!
//! Condition does not hold:
//!   Untriggered                              → Ok
//!   Triggered                                → BackToOk (alert closed)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, instrument, trace, warn};

use super::rule::{Rule, RuleEvaluation, RuleSpec, RuleState};
use crate::alerts::{Alert, AlertId, AlertQuery};
use crate::error::{MonitorError, MonitorResult};
use crate::events::{AlertBus, AlertEvent, AlertSubscription, EventSink};
use crate::metric::Metric;
use crate::storage::StorageBackend;
use crate::{RuleId, TimeRange};

/// What one evaluation pass produced
#[derive(Debug, Default)]
pub struct EvaluationReport {
    /// Events in the order they were published
    pub events: Vec<AlertEvent>,

    /// Rules that could not be evaluated and persistence failures. Rules
    /// listed here did not stop the others from being evaluated.
    pub failures: Vec<MonitorError>,
}

impl EvaluationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: EvaluationReport) {
        self.events.extend(other.events);
        self.failures.extend(other.failures);
    }
}

pub struct RuleManager {
    /// Rules in registration order
    rules: Vec<Rule>,

    /// Alert history per rule, oldest first
    alerts: HashMap<RuleId, Vec<Alert>>,

    /// Closed alerts kept per rule
    history_limit: Option<usize>,

    next_alert_id: u64,
    store: Option<Arc<dyn StorageBackend>>,
    sinks: Vec<Arc<dyn EventSink>>,
    bus: AlertBus,
}

impl std::fmt::Debug for RuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleManager")
            .field("rules", &self.rules)
            .field("alerts", &self.alerts)
            .field("history_limit", &self.history_limit)
            .field("next_alert_id", &self.next_alert_id)
            .field("store", &self.store.is_some())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl RuleManager {
    /// `subscription_buffer` bounds how far a subscriber may fall behind.
    pub fn new(subscription_buffer: usize) -> Self {
        Self {
            rules: vec![],
            alerts: HashMap::new(),
            history_limit: None,
            next_alert_id: 1,
            store: None,
            sinks: vec![],
            bus: AlertBus::new(subscription_buffer),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StorageBackend>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn add_rule(&mut self, spec: RuleSpec) -> MonitorResult<()> {
        if self.rule(&spec.id).is_some() {
            return Err(MonitorError::configuration(format!(
                "rule {} already exists",
                spec.id
            )));
        }
        let rule = Rule::new(spec)?;
        debug!(rule_id = %rule.id(), metric_id = %rule.metric_id(), "rule added");
        self.rules.push(rule);
        Ok(())
    }

    /// Remove a rule together with its alert history.
    #[instrument(skip(self))]
    pub async fn delete_rule(&mut self, rule_id: &str) -> MonitorResult<()> {
        let position = self
            .rules
            .iter()
            .position(|rule| rule.id() == rule_id)
            .ok_or_else(|| MonitorError::NotFound(format!("rule {rule_id}")))?;
        self.rules.remove(position);
        self.alerts.remove(rule_id);
        info!("rule deleted");

        if let Some(store) = &self.store {
            store.delete_alerts(rule_id).await?;
        }
        Ok(())
    }

    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id() == rule_id)
    }

    fn rule_mut(&mut self, rule_id: &str) -> MonitorResult<&mut Rule> {
        self.rules
            .iter_mut()
            .find(|rule| rule.id() == rule_id)
            .ok_or_else(|| MonitorError::NotFound(format!("rule {rule_id}")))
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn set_rule_status(&mut self, rule_id: &str, active: bool) -> MonitorResult<()> {
        self.rule_mut(rule_id)?.set_active(active);
        debug!(rule_id, active, "rule status changed");
        Ok(())
    }

    /// Let an errored rule be evaluated again.
    pub fn reset_rule_error(&mut self, rule_id: &str) -> MonitorResult<bool> {
        let cleared = self.rule_mut(rule_id)?.reset_error();
        if cleared {
            info!(rule_id, "rule error cleared");
        }
        Ok(cleared)
    }

    /// Evaluate every rule bound to `metric` against its window at `now`.
    #[instrument(skip_all, fields(metric_id = %metric.id()))]
    pub async fn evaluate(&mut self, metric: &Metric, now: i64) -> EvaluationReport {
        let mut report = EvaluationReport::default();

        for index in 0..self.rules.len() {
            let rule = &self.rules[index];
            if rule.metric_id() != metric.id() || !rule.is_active() || rule.error().is_some() {
                continue;
            }

            let spec = rule.spec();
            let range = spec
                .window_ms
                .map(|window_ms| TimeRange::ending_at(now, window_ms))
                .unwrap_or_else(TimeRange::all);
            let kind = spec.aggregation.unwrap_or(metric.aggregation());

            let value = match metric.get_aggregate(range, kind) {
                Ok(Some(value)) => value,
                Ok(None) => {
                    trace!(rule_id = %spec.id, "no samples to evaluate");
                    continue;
                }
                Err(e) => {
                    let error = self.rules[index].fail(e.to_string());
                    self.fail_rule(index, error, &mut report).await;
                    continue;
                }
            };

            let single = self.apply(index, value, now).await;
            report.merge(single);
        }

        report
    }

    /// Evaluate the rules bound to `metric_id` against a precomputed value.
    #[instrument(skip(self))]
    pub async fn evaluate_value(
        &mut self,
        metric_id: &str,
        value: f64,
        ts: i64,
    ) -> EvaluationReport {
        let mut report = EvaluationReport::default();
        for index in 0..self.rules.len() {
            if self.rules[index].metric_id() == metric_id {
                let single = self.apply(index, value, ts).await;
                report.merge(single);
            }
        }
        report
    }

    async fn apply(&mut self, index: usize, value: f64, ts: i64) -> EvaluationReport {
        let mut report = EvaluationReport::default();
        let rule = &mut self.rules[index];
        let rule_id = rule.id().to_string();

        let evaluation = match rule.evaluate(value, ts) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                self.fail_rule(index, e, &mut report).await;
                return report;
            }
        };

        match evaluation {
            RuleEvaluation::Skipped | RuleEvaluation::Ok => {}
            RuleEvaluation::Exceeding { violations } => {
                debug!(rule_id = %rule_id, violations, "condition holds, not confirmed yet");
            }
            RuleEvaluation::StartsToExceed { violations, bound } => {
                let alert = self.raise(index, value, ts, violations, bound);
                info!(rule_id = %rule_id, alert_id = %alert.id, value, "alert raised");
                self.persist(&alert, &mut report).await;
                self.publish(AlertEvent::Raised { alert }, &mut report).await;
                self.publish_state(index, &mut report).await;
            }
            RuleEvaluation::StillExceeding { violations, bound } => {
                let updated = self.active_alert_mut(&rule_id).map(|alert| {
                    alert.value = value;
                    alert.violations = violations;
                    alert.clone()
                });
                let alert = match updated {
                    Some(alert) => alert,
                    None => {
                        // history was cleared while the rule stayed triggered
                        self.raise(index, value, ts, violations, bound)
                    }
                };
                self.persist(&alert, &mut report).await;
                self.publish(AlertEvent::Updated { alert }, &mut report).await;
            }
            RuleEvaluation::BackToOk => {
                let closed = self.active_alert_mut(&rule_id).map(|alert| {
                    alert.end = Some(ts);
                    alert.reset_value = Some(value);
                    alert.clone()
                });
                if let Some(alert) = closed {
                    info!(rule_id = %rule_id, alert_id = %alert.id, value, "alert reset");
                    self.persist(&alert, &mut report).await;
                    if self.rules[index].spec().alert_on_reset {
                        self.publish(AlertEvent::Reset { alert }, &mut report).await;
                    }
                }
                self.trim_history(&rule_id);
                self.publish_state(index, &mut report).await;
            }
        }

        report
    }

    /// Report a rule that was just marked errored.
    async fn fail_rule(&self, index: usize, error: MonitorError, report: &mut EvaluationReport) {
        warn!(rule_id = %self.rules[index].id(), "{error}");
        report.failures.push(error);
        self.publish_state(index, report).await;
    }

    fn raise(&mut self, index: usize, value: f64, ts: i64, violations: u32, bound: f64) -> Alert {
        let spec = self.rules[index].spec();
        let alert = Alert {
            id: AlertId(self.next_alert_id),
            rule_id: spec.id.clone(),
            start: ts,
            end: None,
            threshold: bound,
            value,
            reset_value: None,
            violations,
            severity: spec.severity,
            is_read: false,
            payload: spec.payload.clone(),
        };
        self.next_alert_id += 1;
        self.alerts.entry(alert.rule_id.clone()).or_default().push(alert.clone());
        alert
    }

    fn active_alert_mut(&mut self, rule_id: &str) -> Option<&mut Alert> {
        self.alerts
            .get_mut(rule_id)
            .and_then(|alerts| alerts.iter_mut().rev().find(|alert| alert.is_active()))
    }

    fn trim_history(&mut self, rule_id: &str) {
        let Some(limit) = self.history_limit else {
            return;
        };
        let Some(alerts) = self.alerts.get_mut(rule_id) else {
            return;
        };
        let closed = alerts.iter().filter(|alert| !alert.is_active()).count();
        let mut excess = closed.saturating_sub(limit);
        if excess > 0 {
            trace!(rule_id, "dropping {excess} old alerts");
            alerts.retain(|alert| {
                if excess > 0 && !alert.is_active() {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    async fn persist(&self, alert: &Alert, report: &mut EvaluationReport) {
        if let Some(store) = &self.store
            && let Err(e) = store.save_alert(alert).await
        {
            warn!(rule_id = %alert.rule_id, alert_id = %alert.id, "failed to persist alert: {e}");
            report.failures.push(e.into());
        }
    }

    async fn publish_state(&self, index: usize, report: &mut EvaluationReport) {
        let rule = &self.rules[index];
        let event = AlertEvent::RuleStateChanged {
            rule_id: rule.id().to_string(),
            state: rule.state(),
            error: rule.error().map(str::to_string),
        };
        self.publish(event, report).await;
    }

    async fn publish(&self, event: AlertEvent, report: &mut EvaluationReport) {
        if !self.sinks.is_empty() {
            match serde_json::to_value(&event) {
                Ok(payload) => {
                    for sink in &self.sinks {
                        if let Err(e) = sink.publish(event.channel(), payload.clone()).await {
                            warn!(channel = event.channel(), "event sink failed: {e}");
                        }
                    }
                }
                Err(e) => warn!("failed to serialize {event:?}: {e}"),
            }
        }

        self.bus.publish(event.clone());
        report.events.push(event);
    }

    /// Alert history matching `query`.
    pub fn get_alerts(&self, query: &AlertQuery) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .values()
            .flatten()
            .filter(|alert| query.matches(alert))
            .cloned()
            .collect();

        alerts.sort_by_key(|alert| (alert.start, alert.id));
        if !query.ascending {
            alerts.reverse();
        }
        if let Some(limit) = query.limit {
            alerts.truncate(limit);
        }
        alerts
    }

    pub fn active_alert(&self, rule_id: &str) -> Option<&Alert> {
        self.alerts
            .get(rule_id)
            .and_then(|alerts| alerts.iter().rev().find(|alert| alert.is_active()))
    }

    /// Drop the alert history of a rule and put the rule back to untriggered.
    /// Returns how many alerts were removed from memory.
    #[instrument(skip(self))]
    pub async fn clear_alerts(&mut self, rule_id: &str) -> MonitorResult<usize> {
        let removed = self.alerts.remove(rule_id).map(|alerts| alerts.len()).unwrap_or(0);

        if let Some(rule) = self.rules.iter_mut().find(|rule| rule.id() == rule_id) {
            rule.reset_state();
        }
        debug!("cleared {removed} alerts");

        if let Some(store) = &self.store {
            store.delete_alerts(rule_id).await?;
        }
        Ok(removed)
    }

    pub async fn mark_alert_as_read(
        &mut self,
        rule_id: &str,
        alert_id: AlertId,
        is_read: bool,
    ) -> MonitorResult<()> {
        let alert = self
            .alerts
            .get_mut(rule_id)
            .and_then(|alerts| alerts.iter_mut().find(|alert| alert.id == alert_id))
            .ok_or_else(|| MonitorError::NotFound(format!("alert {alert_id} of rule {rule_id}")))?;
        alert.is_read = is_read;

        if let Some(store) = &self.store {
            store.mark_alert_as_read(rule_id, alert_id, is_read).await?;
        }
        Ok(())
    }

    /// Reload alert history from the store, resuming rules whose latest
    /// alert is still active. Returns the number of alerts loaded.
    #[instrument(skip(self))]
    pub async fn restore(&mut self) -> MonitorResult<usize> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };

        let mut loaded = 0;
        for rule in &mut self.rules {
            let alerts = store.load_alerts(rule.id(), TimeRange::all()).await?;
            if let Some(active) = alerts.iter().rev().find(|alert| alert.is_active()) {
                rule.restore_triggered(active.violations);
            }
            if let Some(max_id) = alerts.iter().map(|alert| alert.id.0).max() {
                self.next_alert_id = self.next_alert_id.max(max_id + 1);
            }
            loaded += alerts.len();
            self.alerts.insert(rule.id().to_string(), alerts);
        }
        info!("restored {loaded} alerts");
        Ok(loaded)
    }

    /// Subscribe to alert events of the rules in `filter`, or all rules.
    pub fn subscribe_to_alerts(&self, filter: Option<HashSet<RuleId>>) -> AlertSubscription {
        self.bus.subscribe(filter)
    }

    pub fn unsubscribe(&self, subscription: AlertSubscription) {
        debug!(subscription_id = subscription.id(), "unsubscribed");
        drop(subscription);
    }

    pub fn bus(&self) -> &AlertBus {
        &self.bus
    }

    /// Current state of every rule, in registration order.
    pub fn rule_states(&self) -> Vec<(RuleId, RuleState)> {
        self.rules
            .iter()
            .map(|rule| (rule.id().to_string(), rule.state()))
            .collect()
    }
}
