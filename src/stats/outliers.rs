//! Outlier detection over a batch of samples
//!
//! Two tests are supported:
//!
//! ```text
//! Sigma: |x - mean| > k * stddev          (sample stddev, default k = 3)
//! IQR:   x < Q1 - m * IQR  or  x > Q3 + m * IQR   (default m = 1.5)
//! ```
//!
//! Indexes are always reported in ascending order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::aggregate::quantile;
use crate::error::MonitorError;

/// Default multiplier of the standard deviation for the sigma test
pub const DEFAULT_SIGMA_THRESHOLD: f64 = 3.0;

/// Default multiplier of the interquartile range for the IQR test
pub const DEFAULT_IQR_THRESHOLD: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    Sigma,
    Iqr,
}

impl OutlierMethod {
    pub fn default_threshold(&self) -> f64 {
        match self {
            OutlierMethod::Sigma => DEFAULT_SIGMA_THRESHOLD,
            OutlierMethod::Iqr => DEFAULT_IQR_THRESHOLD,
        }
    }
}

impl FromStr for OutlierMethod {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sigma" | "stddev" => Ok(Self::Sigma),
            "iqr" => Ok(Self::Iqr),
            _ => Err(MonitorError::configuration(format!(
                "unknown outlier method: {s}"
            ))),
        }
    }
}

impl fmt::Display for OutlierMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlierMethod::Sigma => write!(f, "sigma"),
            OutlierMethod::Iqr => write!(f, "iqr"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierOptions {
    /// Overrides the method's default multiplier
    pub threshold: Option<f64>,
}

impl OutlierOptions {
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
        }
    }
}

/// Indexes of the outliers in `data`, ascending.
pub fn outlier_indexes(method: OutlierMethod, data: &[f64], opts: OutlierOptions) -> Vec<usize> {
    outlier_indexes_by(method, data, |v| Some(*v), opts)
}

/// Values of the outliers in `data`, in index order.
pub fn outliers(method: OutlierMethod, data: &[f64], opts: OutlierOptions) -> Vec<f64> {
    outlier_indexes(method, data, opts)
        .into_iter()
        .map(|i| data[i])
        .collect()
}

/// Indexes of the outlying items, reading each item's value through
/// `accessor`. Items for which the accessor yields `None` take no part in the
/// statistics and are never flagged.
pub fn outlier_indexes_by<T, F>(
    method: OutlierMethod,
    items: &[T],
    accessor: F,
    opts: OutlierOptions,
) -> Vec<usize>
where
    F: Fn(&T) -> Option<f64>,
{
    let present: Vec<(usize, f64)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| accessor(item).filter(|v| v.is_finite()).map(|v| (i, v)))
        .collect();

    let threshold = opts.threshold.unwrap_or_else(|| method.default_threshold());
    let values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();

    let Some(is_outlier) = fence(method, &values, threshold) else {
        return vec![];
    };

    present
        .into_iter()
        .filter(|(_, v)| is_outlier(*v))
        .map(|(i, _)| i)
        .collect()
}

/// Outlying items themselves, in index order.
pub fn outliers_by<'a, T, F>(
    method: OutlierMethod,
    items: &'a [T],
    accessor: F,
    opts: OutlierOptions,
) -> Vec<&'a T>
where
    F: Fn(&T) -> Option<f64>,
{
    outlier_indexes_by(method, items, accessor, opts)
        .into_iter()
        .map(|i| &items[i])
        .collect()
}

/// Build the predicate for the chosen method, or `None` when the batch is too
/// small to say anything.
fn fence(
    method: OutlierMethod,
    values: &[f64],
    threshold: f64,
) -> Option<Box<dyn Fn(f64) -> bool>> {
    match method {
        OutlierMethod::Sigma => {
            if values.len() < 2 {
                return None;
            }
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let limit = threshold * variance.sqrt();

            let predicate: Box<dyn Fn(f64) -> bool> = Box::new(move |v| (v - mean).abs() > limit);
            Some(predicate)
        }
        OutlierMethod::Iqr => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let q1 = quantile(&sorted, 0.25)?;
            let q3 = quantile(&sorted, 0.75)?;
            let iqr = q3 - q1;
            let (low, high) = (q1 - threshold * iqr, q3 + threshold * iqr);

            let predicate: Box<dyn Fn(f64) -> bool> = Box::new(move |v| v < low || v > high);
            Some(predicate)
        }
    }
}
