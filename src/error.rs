//! Error taxonomy of the monitoring core
//!
//! - [`MonitorError::Configuration`] is raised while building windows, metrics
//!   and rules and is fatal to that construction call only.
//! - [`MonitorError::Evaluation`] is raised per rule; the rule is marked errored
//!   and skipped until it is reset, other rules keep evaluating.
//! - [`MonitorError::Persistence`] wraps failures of the persistence
//!   collaborator. In-memory state has already been updated when it is returned.

use std::fmt;

use crate::RuleId;
use crate::storage::StorageError;

/// Result type alias for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug)]
pub enum MonitorError {
    /// Invalid window, unknown method name or malformed rule
    Configuration(String),

    /// A rule condition could not be evaluated
    Evaluation { rule_id: RuleId, message: String },

    /// The persistence collaborator failed
    Persistence(StorageError),

    /// Unknown rule, metric or alert
    NotFound(String),

    /// The monitor actor has stopped
    ActorUnavailable,
}

impl MonitorError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        MonitorError::Configuration(msg.into())
    }

    pub fn evaluation(rule_id: impl Into<RuleId>, msg: impl Into<String>) -> Self {
        MonitorError::Evaluation {
            rule_id: rule_id.into(),
            message: msg.into(),
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Configuration(msg) => write!(f, "invalid configuration: {}", msg),
            MonitorError::Evaluation { rule_id, message } => {
                write!(f, "rule `{}` could not be evaluated: {}", rule_id, message)
            }
            MonitorError::Persistence(err) => write!(f, "persistence failed: {}", err),
            MonitorError::NotFound(what) => write!(f, "not found: {}", what),
            MonitorError::ActorUnavailable => write!(f, "monitor actor is not running"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for MonitorError {
    fn from(err: StorageError) -> Self {
        MonitorError::Persistence(err)
    }
}
