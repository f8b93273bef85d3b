//! Alert records
//!
//! An [`Alert`] spans one violation episode of a rule, from the evaluation that
//! triggered the rule to the one that reset it. `end == None` marks the alert
//! that is currently active; a rule never has more than one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RuleId;

/// Identifier of an alert, unique within its rule manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub rule_id: RuleId,

    /// Evaluation time that triggered the rule (milliseconds)
    pub start: i64,

    /// Evaluation time that reset the rule, `None` while active
    pub end: Option<i64>,

    pub threshold: f64,

    /// Most recent violating value
    pub value: f64,

    /// Value that cleared the condition
    pub reset_value: Option<f64>,

    /// Consecutive violations observed in this episode
    pub violations: u32,

    pub severity: Severity,
    pub is_read: bool,

    /// Free-form data copied from the rule
    pub payload: serde_json::Value,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.end.is_none()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.start)
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end.and_then(DateTime::from_timestamp_millis)
    }

    /// Length of the episode, up to `now` for an active alert.
    pub fn duration_ms(&self, now: i64) -> i64 {
        self.end.unwrap_or(now) - self.start
    }
}

/// Filter and ordering for alert history queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertQuery {
    /// Only alerts of this rule
    pub rule_id: Option<RuleId>,

    /// Alerts whose start lies within this range
    pub range: crate::TimeRange,

    /// Oldest first if `true`, newest first otherwise
    pub ascending: bool,

    pub limit: Option<usize>,
}

impl Default for AlertQuery {
    fn default() -> Self {
        Self {
            rule_id: None,
            range: crate::TimeRange::all(),
            ascending: false,
            limit: None,
        }
    }
}

impl AlertQuery {
    pub fn for_rule(rule_id: impl Into<RuleId>) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.rule_id.as_ref().is_none_or(|id| *id == alert.rule_id)
            && self.range.contains(alert.start)
    }
}
