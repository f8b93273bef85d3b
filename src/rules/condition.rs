use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TimeseriesDataPoint;
use crate::error::{MonitorError, MonitorResult};
use crate::stats::{AggregationType, aggregate, insertion_point, range_locate_by};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "gt", alias = "greater_than")]
    GreaterThan,
    #[serde(rename = "gte", alias = "greater_equal")]
    GreaterEqual,
    #[serde(rename = "lt", alias = "less_than")]
    LessThan,
    #[serde(rename = "lte", alias = "less_equal")]
    LessEqual,
    #[serde(rename = "eq")]
    Equal,
    #[serde(rename = "ne")]
    NotEqual,
}

impl FromStr for CompareOp {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater_than" | "gt" | ">" => Ok(Self::GreaterThan),
            "greater_equal" | "gte" | ">=" => Ok(Self::GreaterEqual),
            "less_than" | "lt" | "<" => Ok(Self::LessThan),
            "less_equal" | "lte" | "<=" => Ok(Self::LessEqual),
            "eq" | "==" => Ok(Self::Equal),
            "ne" | "!=" => Ok(Self::NotEqual),
            _ => Err(MonitorError::configuration(format!(
                "unknown compare operator: {s}"
            ))),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessEqual => write!(f, "<="),
            Self::Equal => write!(f, "=="),
            Self::NotEqual => write!(f, "!="),
        }
    }
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// `value - baseline`
    #[default]
    Absolute,
    /// `(value - baseline) / |baseline| * 100`
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakDirection {
    /// New value above the recent maximum
    Above,
    /// New value below the recent minimum
    Below,
}

/// What a rule checks an aggregated value against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleCondition {
    /// `value OP threshold`
    Threshold { operator: CompareOp, threshold: f64 },

    /// `change OP threshold`, where the change is measured against the latest
    /// value seen at least `window_ms` earlier.
    ///
    /// During the first `window_ms` after the first evaluation no baseline can
    /// exist yet and the condition does not hold. Past that warm-up a missing
    /// baseline (a value arriving for a time the history no longer covers) is
    /// an evaluation error.
    Change {
        operator: CompareOp,
        threshold: f64,
        #[serde(default)]
        kind: ChangeKind,
        window_ms: i64,
    },

    /// Value breaks out of the extrema of the previous `lookback` values by
    /// more than `tolerance` (a fraction of the extremum)
    Peak {
        direction: PeakDirection,
        #[serde(default)]
        tolerance: f64,
        #[serde(default = "default_lookback")]
        lookback: usize,
    },
}

fn default_lookback() -> usize {
    10
}

/// Result of checking one value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Check {
    pub holds: bool,

    /// Threshold the value was compared against
    pub bound: f64,
}

/// Values a condition remembers between evaluations
#[derive(Debug, Clone, Default)]
pub struct ConditionState {
    history: VecDeque<TimeseriesDataPoint>,

    /// Timestamp of the first remembered value
    first_seen: Option<i64>,
}

impl ConditionState {
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.first_seen = None;
    }

    fn insert(&mut self, point: TimeseriesDataPoint) -> Result<(), String> {
        let located = range_locate_by(self.history.make_contiguous(), &point.ts, |p| p.ts)
            .map_err(|e| e.to_string())?;
        let mut at = insertion_point(located);
        while at < self.history.len() && self.history[at].ts == point.ts {
            at += 1;
        }
        self.history.insert(at, point);
        Ok(())
    }
}

impl RuleCondition {
    pub fn validate(&self) -> MonitorResult<()> {
        match self {
            RuleCondition::Threshold { threshold, .. } => finite("threshold", *threshold),
            RuleCondition::Change {
                threshold,
                window_ms,
                ..
            } => {
                finite("threshold", *threshold)?;
                if *window_ms <= 0 {
                    return Err(MonitorError::configuration(format!(
                        "change window must be positive, got {window_ms}ms"
                    )));
                }
                Ok(())
            }
            RuleCondition::Peak {
                tolerance,
                lookback,
                ..
            } => {
                finite("tolerance", *tolerance)?;
                if *tolerance < 0.0 {
                    return Err(MonitorError::configuration("peak tolerance must not be negative"));
                }
                if *lookback == 0 {
                    return Err(MonitorError::configuration("peak lookback must be at least 1"));
                }
                Ok(())
            }
        }
    }

    /// The configured threshold, used for display before any evaluation.
    pub fn threshold(&self) -> f64 {
        match self {
            RuleCondition::Threshold { threshold, .. }
            | RuleCondition::Change { threshold, .. } => *threshold,
            RuleCondition::Peak { tolerance, .. } => *tolerance,
        }
    }

    /// Check `value` observed at `ts` and remember it for later evaluations.
    pub fn check(&self, state: &mut ConditionState, value: f64, ts: i64) -> Result<Check, String> {
        if !value.is_finite() {
            return Err(format!("value {value} is not finite"));
        }

        match self {
            RuleCondition::Threshold {
                operator,
                threshold,
            } => Ok(Check {
                holds: operator.check(value, *threshold),
                bound: *threshold,
            }),

            RuleCondition::Change {
                operator,
                threshold,
                kind,
                window_ms,
            } => {
                let at = ts.saturating_sub(*window_ms);
                let warming_up = state.first_seen.is_none_or(|first| at < first);

                let check = match baseline(state, at)? {
                    None if warming_up => Check {
                        holds: false,
                        bound: *threshold,
                    },
                    None => return Err(format!("no change baseline at or before {at}")),
                    Some(base) => {
                        let change = match kind {
                            ChangeKind::Absolute => value - base,
                            ChangeKind::Percent => {
                                if base == 0.0 {
                                    return Err(
                                        "percent change against a zero baseline".to_string()
                                    );
                                }
                                (value - base) / base.abs() * 100.0
                            }
                        };
                        Check {
                            holds: operator.check(change, *threshold),
                            bound: *threshold,
                        }
                    }
                };

                state.insert(TimeseriesDataPoint::new(ts, value))?;
                state.first_seen.get_or_insert(ts);
                Ok(check)
            }

            RuleCondition::Peak {
                direction,
                tolerance,
                lookback,
            } => {
                let recent: Vec<f64> = state.history.iter().map(|p| p.value).collect();
                let check = match direction {
                    PeakDirection::Above => aggregate(AggregationType::Max, &recent).map(|max| {
                        let bound = max + max.abs() * tolerance;
                        Check {
                            holds: value > bound,
                            bound,
                        }
                    }),
                    PeakDirection::Below => aggregate(AggregationType::Min, &recent).map(|min| {
                        let bound = min - min.abs() * tolerance;
                        Check {
                            holds: value < bound,
                            bound,
                        }
                    }),
                };

                state.history.push_back(TimeseriesDataPoint::new(ts, value));
                while state.history.len() > *lookback {
                    state.history.pop_front();
                }

                Ok(check.unwrap_or(Check {
                    holds: false,
                    bound: value,
                }))
            }
        }
    }
}

/// Latest remembered value at or before `at`; older history is discarded.
fn baseline(state: &mut ConditionState, at: i64) -> Result<Option<f64>, String> {
    let located = range_locate_by(state.history.make_contiguous(), &at, |p| p.ts)
        .map_err(|e| e.to_string())?;

    let index = if located >= 0 {
        let mut i = located as usize;
        while i + 1 < state.history.len() && state.history[i + 1].ts == at {
            i += 1;
        }
        i
    } else {
        match insertion_point(located).checked_sub(1) {
            Some(i) => i,
            None => return Ok(None),
        }
    };

    state.history.drain(..index);
    Ok(state.history.front().map(|p| p.value))
}

fn finite(name: &str, value: f64) -> MonitorResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MonitorError::configuration(format!("{name} must be a finite number")))
    }
}
