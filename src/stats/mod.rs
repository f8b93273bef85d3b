//! Pure numeric utilities over sample batches
//!
//! - [`locate`]: binary search over ascending sequences
//! - [`aggregate`]: reduce a batch of samples to a single scalar
//! - [`outliers`]: flag anomalous samples with the sigma or IQR test
//!
//! None of these functions mutate their input.

pub mod aggregate;
pub mod locate;
pub mod outliers;

pub use aggregate::{AggregationType, aggregate, quantile};
pub use locate::{insertion_point, range_locate, range_locate_by};
pub use outliers::{
    OutlierMethod, OutlierOptions, outlier_indexes, outlier_indexes_by, outliers, outliers_by,
};
