use tracing::trace;

use crate::rules::RuleSpec;
use crate::stats::AggregationType;
use crate::{MetricCategory, MetricId};

/// Persistence collaborator configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// No persistence, alerts and aggregates only live in memory
    #[serde(rename = "none")]
    None,

    /// In-process store (default)
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,

    /// Storage configuration (optional - defaults to in-memory)
    pub storage: Option<StorageConfig>,

    /// Capacity of every alert subscription buffer
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

/// A monitored entity (queue, host, redis instance) and everything it owns
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EntityConfig {
    pub id: String,

    #[serde(default)]
    pub category: MetricCategory,

    #[serde(default)]
    pub metrics: Vec<MetricConfig>,

    #[serde(default)]
    pub rules: Vec<RuleSpec>,

    /// Closed alerts kept in memory per rule (unbounded if absent)
    pub alert_history_limit: Option<usize>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MetricConfig {
    pub id: MetricId,

    /// Overrides the entity's category
    pub category: Option<MetricCategory>,

    #[serde(default)]
    pub aggregation: AggregationType,

    #[serde(default = "default_duration_ms")]
    pub duration_ms: i64,

    #[serde(default = "default_period_ms")]
    pub period_ms: i64,

    #[serde(default)]
    pub description: String,
}

fn default_subscription_buffer() -> usize {
    256
}

fn default_duration_ms() -> i64 {
    15 * 60 * 1000
}

fn default_period_ms() -> i64 {
    60 * 1000
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
