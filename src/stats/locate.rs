//! Binary search over ascending sequences
//!
//! The return convention mirrors the classic `binarySearch` contract: a
//! non-negative value is the index of a match, a negative value `r` encodes the
//! insertion point as `-(r + 1)`.

use crate::error::{MonitorError, MonitorResult};

/// Locate `target` in an ascending slice.
///
/// Returns the index of a matching element (whichever the search lands on
/// first, not necessarily the first occurrence), or `-(insertion_point + 1)`
/// when absent. Fails if the slice is not sorted ascending.
pub fn range_locate<T>(sorted: &[T], target: &T) -> MonitorResult<i64>
where
    T: PartialOrd + Copy,
{
    range_locate_by(sorted, target, |v| *v)
}

/// Same as [`range_locate`], comparing the key extracted from each item.
pub fn range_locate_by<T, K, F>(items: &[T], target: &K, key: F) -> MonitorResult<i64>
where
    K: PartialOrd,
    F: Fn(&T) -> K,
{
    // only NaN-like values are unordered with themselves
    let comparable = target.partial_cmp(target).is_some();
    if !comparable {
        return Err(MonitorError::configuration("cannot locate an unordered value"));
    }

    // NaN keys compare false both ways, so `!(a <= b)` also rejects them
    if let Some(pos) = items.windows(2).position(|w| !(key(&w[0]) <= key(&w[1]))) {
        return Err(MonitorError::configuration(format!(
            "sequence is not sorted ascending at index {}",
            pos + 1
        )));
    }

    let mut low = 0usize;
    let mut high = items.len();

    while low < high {
        let mid = low + (high - low) / 2;
        let candidate = key(&items[mid]);

        if candidate < *target {
            low = mid + 1;
        } else if candidate > *target {
            high = mid;
        } else {
            return Ok(mid as i64);
        }
    }

    Ok(-(low as i64 + 1))
}

/// Turn a locate result into the index at which the target sits or would be
/// inserted.
pub fn insertion_point(located: i64) -> usize {
    if located >= 0 {
        located as usize
    } else {
        (-located - 1) as usize
    }
}
