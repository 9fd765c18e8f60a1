//! Real-time pacing of the root clock.
//!
//! When enabled, the root scheduler may only advance to a tick once enough
//! wall-clock time has passed since the last baseline: simulated hours run at
//! `factor` times wall-clock hours. Every pause, resume and settings change
//! moves the baseline to "now", so stopped intervals earn no simulated time.

use std::time::{Duration, Instant};

use crate::time::{deadline, Tick, TimeScale};

#[derive(Debug, Clone)]
pub(crate) struct Pacer {
    enabled: bool,
    factor: f64,
    interval: Duration,
    baseline: Option<(Tick, Instant)>,
}

impl Pacer {
    pub(crate) fn new(enabled: bool, factor: f64, interval: Duration) -> Self {
        Self {
            enabled,
            factor: sanitize_factor(factor),
            interval,
            baseline: None,
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub(crate) fn factor(&self) -> f64 {
        self.factor
    }

    /// Sleep increment between pacing checks.
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    pub(crate) fn configure(&mut self, enabled: bool, factor: f64) {
        self.enabled = enabled;
        self.factor = sanitize_factor(factor);
        self.baseline = None;
    }

    /// Forget the wall/sim correlation; the next check starts a new one.
    pub(crate) fn reset(&mut self) {
        self.baseline = None;
    }

    /// Latest tick the clock may show at `now`, establishing the baseline at
    /// `current` if there is none.
    pub(crate) fn allowed(&mut self, scale: &TimeScale, current: Tick, now: Instant) -> Tick {
        let (base_tick, base_wall) = *self.baseline.get_or_insert((current, now));
        let elapsed = now.saturating_duration_since(base_wall).as_secs_f64();
        let earned = (elapsed * scale.ticks_per_wall_second(self.factor)).floor() as Tick;
        deadline(base_tick, earned.max(0))
    }
}

fn sanitize_factor(factor: f64) -> f64 {
    if factor > 0.0 && factor.is_finite() {
        factor
    } else {
        tracing::warn!(factor, "invalid real-time factor; using 1.0");
        1.0
    }
}
