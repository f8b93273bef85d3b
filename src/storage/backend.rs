//! Persistence collaborator
//!
//! The monitor never reads back its own state from a backend during normal
//! operation; it hands over closed buckets and alert records as they happen
//! and asks for them again only when restoring or backfilling.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::AggregateRow;
use crate::TimeRange;
use crate::alerts::{Alert, AlertId};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,

    /// Backend-specific details
    pub metadata: HashMap<String, String>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store the summary of a closed bucket. Rows are keyed by
    /// `(metric_id, ts)`; saving the same key again replaces the row.
    async fn save_aggregate(&self, row: &AggregateRow) -> StorageResult<()>;

    /// Rows of `metric_id` whose bucket start lies within `range`, oldest first.
    async fn load_aggregate(
        &self,
        metric_id: &str,
        range: TimeRange,
    ) -> StorageResult<Vec<AggregateRow>>;

    /// Insert or replace an alert, keyed by `(rule_id, id)`.
    async fn save_alert(&self, alert: &Alert) -> StorageResult<()>;

    /// Alerts of `rule_id` started within `range`, oldest first.
    async fn load_alerts(&self, rule_id: &str, range: TimeRange) -> StorageResult<Vec<Alert>>;

    /// Remove every alert of `rule_id`, returning how many were removed.
    async fn delete_alerts(&self, rule_id: &str) -> StorageResult<usize>;

    /// Mark a single alert as read or unread.
    async fn mark_alert_as_read(
        &self,
        rule_id: &str,
        alert_id: AlertId,
        is_read: bool,
    ) -> StorageResult<()>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;
}
