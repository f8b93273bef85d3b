//! Alert rules
//!
//! A rule watches one metric: it reduces the metric window to a value,
//! checks the value against a [`RuleCondition`] and walks a small state
//! machine that turns confirmed violations into alerts.

pub mod condition;
pub mod manager;
pub mod rule;

pub use condition::{ChangeKind, Check, CompareOp, ConditionState, PeakDirection, RuleCondition};
pub use manager::{EvaluationReport, RuleManager};
pub use rule::{Rule, RuleEvaluation, RuleSpec, RuleState};
