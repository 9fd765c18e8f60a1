//! Integer simulation clock, priorities, and the tick/hour scale.
//!
//! The kernel's clock is always an integer [`Tick`]. Conversions to simulated
//! hours exist only for display and real-time pacing, through an explicit
//! [`TimeScale`] carried by the simulation context.

/// Absolute simulation time in ticks.
pub type Tick = i64;

/// Event priority. Lower numbers run earlier within the same tick.
pub type Priority = i32;

/// Highest regular priority.
pub const PRIO_HIGHEST: Priority = 0;

/// Priority used when the caller has no preference.
pub const PRIO_DEFAULT: Priority = 5;

/// Lowest regular priority a caller may pass.
pub const PRIO_LOWEST: Priority = 10;

/// Reserved: runs after every regular event of the instant, same-priority
/// ties in stack order (most recently scheduled first).
pub const PRIO_LAST_LIFO: Priority = 11;

/// Reserved: runs after every other event already queued for the instant,
/// ties in queue order (first scheduled first).
pub const PRIO_LAST_FIFO: Priority = 12;

/// Largest representable tick. Deadlines saturate here instead of wrapping.
pub const MAX_TICK: Tick = Tick::MAX;

/// `now + delay`, saturating at [`MAX_TICK`].
///
/// ```
/// use kairos_kernel::time::{deadline, MAX_TICK};
///
/// assert_eq!(deadline(10, 5), 15);
/// assert_eq!(deadline(MAX_TICK - 1, 1_000), MAX_TICK);
/// ```
pub fn deadline(now: Tick, delay: Tick) -> Tick {
    now.saturating_add(delay)
}

// ---------------------------------------------------------------------------
// TimeScale
// ---------------------------------------------------------------------------

/// Converts between integer ticks and simulated hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeScale {
    ticks_per_hour: f64,
}

impl TimeScale {
    /// # Panics
    ///
    /// Panics if `ticks_per_hour` is not positive and finite.
    pub fn new(ticks_per_hour: f64) -> Self {
        assert!(
            ticks_per_hour > 0.0 && ticks_per_hour.is_finite(),
            "ticks_per_hour must be positive and finite, got {ticks_per_hour}"
        );
        Self { ticks_per_hour }
    }

    pub fn ticks_per_hour(&self) -> f64 {
        self.ticks_per_hour
    }

    /// Simulated hours represented by `tick`.
    pub fn hours(&self, tick: Tick) -> f64 {
        tick as f64 / self.ticks_per_hour
    }

    /// Nearest tick for a duration in simulated hours, saturating at the
    /// representable range.
    pub fn ticks(&self, hours: f64) -> Tick {
        // `as` saturates for out-of-range floats.
        (hours * self.ticks_per_hour).round() as Tick
    }

    /// Simulated ticks earned per wall-clock second when simulated hours run
    /// at `factor` times wall-clock hours.
    pub fn ticks_per_wall_second(&self, factor: f64) -> f64 {
        self.ticks_per_hour * factor / 3600.0
    }
}

impl Default for TimeScale {
    /// One million ticks per simulated hour.
    fn default() -> Self {
        Self::new(1_000_000.0)
    }
}
