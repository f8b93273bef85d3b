use serde::{Deserialize, Serialize};
use tracing::trace;

use super::condition::{CompareOp, ConditionState, RuleCondition};
use crate::alerts::Severity;
use crate::error::{MonitorError, MonitorResult};
use crate::stats::AggregationType;
use crate::{MetricId, RuleId};

/// Declarative description of a rule, as found in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: RuleId,
    pub metric_id: MetricId,

    #[serde(default)]
    pub name: String,

    pub condition: RuleCondition,

    /// Reduction applied to the metric window, the metric's own if absent
    #[serde(default)]
    pub aggregation: Option<AggregationType>,

    /// Trailing span of the window to reduce, the whole window if absent
    #[serde(default)]
    pub window_ms: Option<i64>,

    /// Consecutive violations needed before an alert is raised
    #[serde(default = "default_confirm_count")]
    pub confirm_count: u32,

    /// Publish a notification when the condition clears
    #[serde(default)]
    pub alert_on_reset: bool,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_confirm_count() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

impl RuleSpec {
    pub fn new(
        id: impl Into<RuleId>,
        metric_id: impl Into<MetricId>,
        condition: RuleCondition,
    ) -> Self {
        Self {
            id: id.into(),
            metric_id: metric_id.into(),
            name: String::new(),
            condition,
            aggregation: None,
            window_ms: None,
            confirm_count: default_confirm_count(),
            alert_on_reset: false,
            severity: Severity::default(),
            active: default_active(),
            payload: serde_json::Value::Null,
        }
    }

    /// Shorthand for a `value OP threshold` rule.
    pub fn threshold(
        id: impl Into<RuleId>,
        metric_id: impl Into<MetricId>,
        operator: CompareOp,
        threshold: f64,
    ) -> Self {
        Self::new(id, metric_id, RuleCondition::Threshold { operator, threshold })
    }

    pub fn with_confirm_count(mut self, confirm_count: u32) -> Self {
        self.confirm_count = confirm_count;
        self
    }

    pub fn with_alert_on_reset(mut self, alert_on_reset: bool) -> Self {
        self.alert_on_reset = alert_on_reset;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationType) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn with_window_ms(mut self, window_ms: i64) -> Self {
        self.window_ms = Some(window_ms);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn validate(&self) -> MonitorResult<()> {
        if self.id.is_empty() {
            return Err(MonitorError::configuration("rule id must not be empty"));
        }
        if self.metric_id.is_empty() {
            return Err(MonitorError::configuration(format!(
                "rule {} is not bound to a metric",
                self.id
            )));
        }
        if self.confirm_count == 0 {
            return Err(MonitorError::configuration(format!(
                "rule {}: confirm_count must be at least 1",
                self.id
            )));
        }
        if let Some(window_ms) = self.window_ms
            && window_ms <= 0
        {
            return Err(MonitorError::configuration(format!(
                "rule {}: window must be positive, got {window_ms}ms",
                self.id
            )));
        }
        self.condition.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    Untriggered,
    Triggered,
}

/// What a single evaluation did to the rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleEvaluation {
    /// Rule is inactive or errored and was not evaluated
    Skipped,
    Ok,

    /// Condition holds but not yet often enough in a row
    Exceeding { violations: u32 },

    /// Rule just triggered
    StartsToExceed { violations: u32, bound: f64 },

    /// Rule was already triggered and the condition still holds
    StillExceeding { violations: u32, bound: f64 },

    /// Rule was triggered and the condition cleared
    BackToOk,
}

/// A rule with its evaluation state
#[derive(Debug, Clone)]
pub struct Rule {
    spec: RuleSpec,
    state: RuleState,
    violation_count: u32,
    errored: Option<String>,
    condition_state: ConditionState,
    last_value: Option<f64>,
    last_evaluated: Option<i64>,
}

impl Rule {
    pub fn new(spec: RuleSpec) -> MonitorResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            state: RuleState::Untriggered,
            violation_count: 0,
            errored: None,
            condition_state: ConditionState::default(),
            last_value: None,
            last_evaluated: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn metric_id(&self) -> &str {
        &self.spec.metric_id
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    pub fn state(&self) -> RuleState {
        self.state
    }

    pub fn violation_count(&self) -> u32 {
        self.violation_count
    }

    pub fn is_active(&self) -> bool {
        self.spec.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.spec.active = active;
    }

    /// Error that stopped evaluation of this rule, if any
    pub fn error(&self) -> Option<&str> {
        self.errored.as_deref()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    pub fn last_evaluated(&self) -> Option<i64> {
        self.last_evaluated
    }

    /// Clear the error so the rule is evaluated again.
    pub fn reset_error(&mut self) -> bool {
        self.errored.take().is_some()
    }

    /// Back to a clean untriggered state, keeping configuration.
    pub fn reset_state(&mut self) {
        self.state = RuleState::Untriggered;
        self.violation_count = 0;
        self.condition_state.clear();
    }

    /// Mark the rule errored, e.g. when its input could not be computed.
    pub fn fail(&mut self, message: impl Into<String>) -> MonitorError {
        let message = message.into();
        self.errored = Some(message.clone());
        MonitorError::evaluation(self.spec.id.clone(), message)
    }

    /// Resume a triggered episode, e.g. one loaded from storage.
    pub fn restore_triggered(&mut self, violations: u32) {
        self.state = RuleState::Triggered;
        self.violation_count = violations.max(self.spec.confirm_count);
    }

    /// Feed one aggregated value observed at `ts`.
    ///
    /// A failing condition marks the rule as errored; it stays out of
    /// evaluation until [`Rule::reset_error`] is called.
    pub fn evaluate(&mut self, value: f64, ts: i64) -> MonitorResult<RuleEvaluation> {
        if !self.spec.active || self.errored.is_some() {
            return Ok(RuleEvaluation::Skipped);
        }

        let check = match self.spec.condition.check(&mut self.condition_state, value, ts) {
            Ok(check) => check,
            Err(message) => return Err(self.fail(message)),
        };

        self.last_value = Some(value);
        self.last_evaluated = Some(ts);

        let evaluation = if check.holds {
            self.violation_count = self.violation_count.saturating_add(1);
            match self.state {
                RuleState::Untriggered if self.violation_count >= self.spec.confirm_count => {
                    self.state = RuleState::Triggered;
                    RuleEvaluation::StartsToExceed {
                        violations: self.violation_count,
                        bound: check.bound,
                    }
                }
                RuleState::Untriggered => RuleEvaluation::Exceeding {
                    violations: self.violation_count,
                },
                RuleState::Triggered => RuleEvaluation::StillExceeding {
                    violations: self.violation_count,
                    bound: check.bound,
                },
            }
        } else {
            self.violation_count = 0;
            match self.state {
                RuleState::Triggered => {
                    self.state = RuleState::Untriggered;
                    RuleEvaluation::BackToOk
                }
                RuleState::Untriggered => RuleEvaluation::Ok,
            }
        };

        trace!(rule_id = %self.spec.id, value, "{evaluation:?}");
        Ok(evaluation)
    }
}
