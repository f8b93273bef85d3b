//! Exponentially weighted rate tracking
//!
//! Events are counted with [`DecayMeter::update`] and folded into three
//! smoothed rates on every [`DecayMeter::tick`] (fixed 5 second interval):
//!
//! ```text
//! instant = uncounted / TICK_INTERVAL
//! alpha   = 1 - exp(-TICK_INTERVAL / window)
//! rate    = rate + alpha * (instant - rate)
//! ```
//!
//! Rates are stored per millisecond and converted on read.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Interval between two ticks, in milliseconds
pub const TICK_INTERVAL_MS: i64 = 5_000;

/// Upper bound of ticks applied by one [`DecayMeter::tick_if_needed`] call.
/// After this many idle ticks every rate has decayed to practically zero.
const MAX_CATCH_UP_TICKS: i64 = 1_000;

/// The three decay windows of a meter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayWindow {
    /// 1 minute
    Short,
    /// 5 minutes
    Medium,
    /// 15 minutes
    Long,
}

impl DecayWindow {
    pub const ALL: [DecayWindow; 3] = [DecayWindow::Short, DecayWindow::Medium, DecayWindow::Long];

    pub fn default_span(&self) -> Duration {
        match self {
            DecayWindow::Short => Duration::from_secs(60),
            DecayWindow::Medium => Duration::from_secs(5 * 60),
            DecayWindow::Long => Duration::from_secs(15 * 60),
        }
    }
}

impl fmt::Display for DecayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecayWindow::Short => write!(f, "1m"),
            DecayWindow::Medium => write!(f, "5m"),
            DecayWindow::Long => write!(f, "15m"),
        }
    }
}

#[derive(Debug, Clone)]
struct DecayRate {
    alpha: f64,
    /// Events per millisecond
    rate: f64,
}

impl DecayRate {
    fn new(span: Duration) -> Self {
        let span_ms = span.as_millis().max(1) as f64;
        Self {
            alpha: 1.0 - (-(TICK_INTERVAL_MS as f64) / span_ms).exp(),
            rate: 0.0,
        }
    }

    fn tick(&mut self, instant_rate: f64) {
        self.rate += self.alpha * (instant_rate - self.rate);
    }
}

/// Smoothed per-unit-time rate of a bursty event stream
#[derive(Debug, Clone)]
pub struct DecayMeter {
    uncounted: u64,
    count: u64,
    rates: HashMap<DecayWindow, DecayRate>,
    start_time: i64,
    last_tick: i64,
    ticked: bool,
}

impl DecayMeter {
    /// Meter with the default 1/5/15 minute windows, started at `now`.
    pub fn new(now: i64) -> Self {
        Self::with_spans(now, |window| window.default_span())
    }

    /// Meter with custom window spans.
    pub fn with_spans(now: i64, span: impl Fn(DecayWindow) -> Duration) -> Self {
        let rates = DecayWindow::ALL
            .iter()
            .map(|window| (*window, DecayRate::new(span(*window))))
            .collect();

        Self {
            uncounted: 0,
            count: 0,
            rates,
            start_time: now,
            last_tick: now,
            ticked: false,
        }
    }

    /// Record `n` events. No decay is applied until the next tick.
    pub fn update(&mut self, n: u64) {
        self.uncounted = self.uncounted.saturating_add(n);
        self.count = self.count.saturating_add(n);
    }

    /// Fold the events counted since the previous tick into every rate.
    pub fn tick(&mut self) {
        let instant_rate = self.instant_rate();
        for rate in self.rates.values_mut() {
            rate.tick(instant_rate);
        }
        self.uncounted = 0;
        self.ticked = true;
        self.last_tick = self.last_tick.saturating_add(TICK_INTERVAL_MS);
    }

    /// Apply every tick that elapsed between the last tick and `now`.
    /// Returns the number of ticks applied.
    pub fn tick_if_needed(&mut self, now: i64) -> usize {
        let elapsed = now.saturating_sub(self.last_tick);
        if elapsed < TICK_INTERVAL_MS {
            return 0;
        }

        let due = elapsed / TICK_INTERVAL_MS;
        let applied = due.min(MAX_CATCH_UP_TICKS);
        for _ in 0..applied {
            self.tick();
        }

        // skip what the catch-up bound left out, idle ticks only decay
        self.last_tick = self.last_tick.saturating_add((due - applied) * TICK_INTERVAL_MS);
        trace!("applied {applied} of {due} due meter ticks");

        applied as usize
    }

    /// Smoothed rate of `window` expressed per `unit`.
    ///
    /// Before the first tick there is nothing to smooth against, so the
    /// instantaneous rate of the uncounted events is reported instead.
    pub fn rate(&self, window: DecayWindow, unit: Duration) -> f64 {
        let per_ms = if self.ticked {
            self.rates.get(&window).map(|r| r.rate).unwrap_or_default()
        } else {
            self.instant_rate()
        };

        per_ms * unit.as_millis() as f64
    }

    /// Shorthand for the 1 minute rate.
    pub fn one_minute_rate(&self, unit: Duration) -> f64 {
        self.rate(DecayWindow::Short, unit)
    }

    /// Average rate since the meter was started.
    pub fn mean_rate(&self, now: i64, unit: Duration) -> f64 {
        let elapsed = now.saturating_sub(self.start_time);
        if elapsed <= 0 {
            return 0.0;
        }
        self.count as f64 / elapsed as f64 * unit.as_millis() as f64
    }

    /// Total events recorded.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn last_tick(&self) -> i64 {
        self.last_tick
    }

    fn instant_rate(&self) -> f64 {
        self.uncounted as f64 / TICK_INTERVAL_MS as f64
    }
}
