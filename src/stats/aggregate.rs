//! Reduce a batch of samples to a single scalar

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// How a batch of samples is reduced to one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Latest,
    Min,
    Max,
    #[default]
    Avg,
    Sum,
    Count,
    P90,
    P95,
    P99,
}

impl AggregationType {
    /// Quantile in `[0, 1]` for the percentile variants
    pub fn quantile(&self) -> Option<f64> {
        match self {
            AggregationType::P90 => Some(0.90),
            AggregationType::P95 => Some(0.95),
            AggregationType::P99 => Some(0.99),
            _ => None,
        }
    }
}

impl FromStr for AggregationType {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latest" | "last" => Ok(Self::Latest),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" | "mean" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "p90" => Ok(Self::P90),
            "p95" => Ok(Self::P95),
            "p99" => Ok(Self::P99),
            _ => Err(MonitorError::configuration(format!(
                "unknown aggregation type: {s}"
            ))),
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Latest => "latest",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::P90 => "p90",
            Self::P95 => "p95",
            Self::P99 => "p99",
        };
        write!(f, "{name}")
    }
}

/// Reduce `data` (in arrival order) to one value.
///
/// Returns `None` where the reduction is undefined on empty input
/// (`latest`, `min`, `max` and the percentiles). `sum`, `count` and `avg`
/// yield `0` on empty input.
pub fn aggregate(kind: AggregationType, data: &[f64]) -> Option<f64> {
    match kind {
        AggregationType::Latest => data.last().copied(),
        AggregationType::Min => data.iter().copied().reduce(f64::min),
        AggregationType::Max => data.iter().copied().reduce(f64::max),
        AggregationType::Sum => Some(data.iter().sum()),
        AggregationType::Count => Some(data.len() as f64),
        AggregationType::Avg => {
            if data.is_empty() {
                Some(0.0)
            } else {
                Some(data.iter().sum::<f64>() / data.len() as f64)
            }
        }
        AggregationType::P90 | AggregationType::P95 | AggregationType::P99 => {
            let mut sorted = data.to_vec();
            sorted.sort_by(f64::total_cmp);
            kind.quantile().and_then(|q| quantile(&sorted, q))
        }
    }
}

/// Linear-interpolation quantile of an ascending slice.
///
/// `q` is clamped to `[0, 1]`. Returns `None` for an empty slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let q = q.clamp(0.0, 1.0);
    let pos = (sorted.len() - 1) as f64 * q;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let fraction = pos - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}
