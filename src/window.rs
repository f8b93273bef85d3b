//! Fixed-length ring of time buckets
//!
//! A window of `duration` milliseconds is split into `ceil(duration / period)`
//! slots. Each slot covers one bucket `floor(ts / period)`; the newest slot is
//! the bucket `current_index`. Advancing the clock works as follows:
//!
//! ```text
//! idx <  current      → Stale     (time never rewinds, nothing changes)
//! idx == current      → Unchanged (still inside the current bucket)
//! idx == current + 1  → Shifted   (oldest slot dropped, fresh slot appended)
//! idx >  current + 1  → Reset     (gap longer than one period, every slot refilled)
//! ```

use std::collections::VecDeque;
use std::fmt;

use crate::error::{MonitorError, MonitorResult};

/// One bucket of a [`SlidingWindow`]
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSlot<V> {
    /// Bucket index, `floor(ts / period)`
    pub index: i64,
    pub value: V,
}

/// How fresh slots are initialised
pub enum SlotDefault<V> {
    /// Clone of a constant
    Value(V),

    /// Built from the bucket index of the slot
    Factory(Box<dyn Fn(i64) -> V + Send + Sync>),
}

impl<V: Clone> SlotDefault<V> {
    pub fn factory(f: impl Fn(i64) -> V + Send + Sync + 'static) -> Self {
        SlotDefault::Factory(Box::new(f))
    }

    fn make(&self, index: i64) -> V {
        match self {
            SlotDefault::Value(v) => v.clone(),
            SlotDefault::Factory(f) => f(index),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for SlotDefault<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            SlotDefault::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// What an [`SlidingWindow::update`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAdvance {
    Stale,
    Unchanged,
    Shifted,
    Reset,
}

#[derive(Debug)]
pub struct SlidingWindow<V> {
    duration: i64,
    period: i64,
    length: usize,
    slots: VecDeque<TimeSlot<V>>,
    current_index: i64,
    default: SlotDefault<V>,
}

impl<V: Clone> SlidingWindow<V> {
    /// Create a window whose newest bucket is index `0`.
    pub fn new(duration_ms: i64, period_ms: i64, default: SlotDefault<V>) -> MonitorResult<Self> {
        Self::starting_at(duration_ms, period_ms, default, 0)
    }

    /// Create a window whose newest bucket contains `now`.
    pub fn starting_at(
        duration_ms: i64,
        period_ms: i64,
        default: SlotDefault<V>,
        now: i64,
    ) -> MonitorResult<Self> {
        if duration_ms <= 0 {
            return Err(MonitorError::configuration(format!(
                "window duration must be positive, got {duration_ms}ms"
            )));
        }
        if period_ms <= 0 {
            return Err(MonitorError::configuration(format!(
                "window period must be positive, got {period_ms}ms"
            )));
        }

        // ceil(duration / period) without overflowing near i64::MAX
        let length = ((duration_ms - 1) / period_ms + 1) as usize;
        let mut window = Self {
            duration: duration_ms,
            period: period_ms,
            length,
            slots: VecDeque::with_capacity(length),
            current_index: now.div_euclid(period_ms),
            default,
        };
        window.fill();

        Ok(window)
    }

    /// Advance the window to wall-clock time `now`.
    pub fn update(&mut self, now: i64) -> WindowAdvance {
        let idx = self.bucket_of(now);

        if idx < self.current_index {
            return WindowAdvance::Stale;
        }

        if idx == self.current_index {
            return WindowAdvance::Unchanged;
        }

        let previous = self.current_index;
        self.current_index = idx;

        if previous.checked_add(1) == Some(idx) {
            self.slots.pop_front();
            self.slots.push_back(TimeSlot {
                index: idx,
                value: self.default.make(idx),
            });
            return WindowAdvance::Shifted;
        }

        self.slots.clear();
        self.fill();
        WindowAdvance::Reset
    }

    fn fill(&mut self) {
        let first = self.current_index.saturating_sub(self.length as i64 - 1);

        for index in first..=self.current_index {
            self.slots.push_back(TimeSlot {
                index,
                value: self.default.make(index),
            });
        }
    }
}

impl<V> SlidingWindow<V> {
    /// Number of slots, fixed at construction.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    pub fn current_index(&self) -> i64 {
        self.current_index
    }

    /// Bucket index a timestamp falls into.
    pub fn bucket_of(&self, ts: i64) -> i64 {
        ts.div_euclid(self.period)
    }

    /// Start timestamp of a bucket.
    pub fn bucket_start(&self, index: i64) -> i64 {
        index.saturating_mul(self.period)
    }

    /// Slot at position `i`, `0` being the oldest.
    pub fn get(&self, i: usize) -> Option<&TimeSlot<V>> {
        self.slots.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut TimeSlot<V>> {
        self.slots.get_mut(i)
    }

    /// Newest slot.
    pub fn current(&self) -> Option<&TimeSlot<V>> {
        self.slots.back()
    }

    pub fn current_mut(&mut self) -> Option<&mut TimeSlot<V>> {
        self.slots.back_mut()
    }

    /// Slot holding the bucket of `ts`, if that bucket is still in the window.
    pub fn slot_for(&self, ts: i64) -> Option<&TimeSlot<V>> {
        self.position_of(ts).and_then(|i| self.slots.get(i))
    }

    pub fn slot_for_mut(&mut self, ts: i64) -> Option<&mut TimeSlot<V>> {
        self.position_of(ts).and_then(|i| self.slots.get_mut(i))
    }

    fn position_of(&self, ts: i64) -> Option<usize> {
        let idx = self.bucket_of(ts);
        let oldest = self.slots.front()?.index;
        if idx < oldest || idx > self.current_index {
            return None;
        }
        Some((idx - oldest) as usize)
    }

    /// Slots from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TimeSlot<V>> {
        self.slots.iter()
    }

    /// Visit every slot from oldest to newest.
    pub fn for_each(&self, mut f: impl FnMut(&TimeSlot<V>)) {
        self.slots.iter().for_each(|slot| f(slot));
    }
}
