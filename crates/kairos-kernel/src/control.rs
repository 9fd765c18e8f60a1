//! Run states and debug stop conditions.
//!
//! The run state belongs to the simulation as a whole. Every scheduler polls
//! it once per loop iteration; only the root acts on time-based stops.

use std::fmt;

use crate::time::Tick;

/// Externally requested execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Parked; nothing runs until resumed.
    Stopped,
    /// Run freely until paused, idle, or failed.
    Running,
    /// Fire one event, then stop.
    RunOneEvent,
    /// Run until the root clock reaches the given tick. Events at that tick
    /// have not fired yet when the run stops.
    RunUntilTime(Tick),
    /// Advance to the next tick that has work, then stop before firing it.
    RunUntilNextEventTime,
}

impl RunState {
    pub fn is_running(self) -> bool {
        self != RunState::Stopped
    }
}

/// Why the run last stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `pause` was requested.
    Paused,
    /// A single-event step completed.
    StepComplete,
    /// A run-until-time target was reached.
    ReachedTime,
    /// The clock moved to the next event time.
    ReachedNextEventTime,
    /// Nothing is scheduled anywhere.
    Idle,
    /// The clock reached the largest representable tick.
    EndOfTime,
    /// A record did not match the trace being verified.
    TraceMismatch,
    /// An action returned an error.
    ActionFailed,
    /// A fatal error ended the run.
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Paused => "paused",
            StopReason::StepComplete => "step complete",
            StopReason::ReachedTime => "reached target time",
            StopReason::ReachedNextEventTime => "reached next event time",
            StopReason::Idle => "idle",
            StopReason::EndOfTime => "end of time",
            StopReason::TraceMismatch => "trace mismatch",
            StopReason::ActionFailed => "action failed",
            StopReason::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Shared run-state bookkeeping, guarded by the kernel mutex.
#[derive(Debug)]
pub(crate) struct Control {
    pub(crate) state: RunState,
    pub(crate) pause_requested: bool,
    pub(crate) pending_stop: Option<StopReason>,
    pub(crate) last_stop: Option<StopReason>,
    /// Message of the fatal error that ended the run, if any.
    pub(crate) failure: Option<String>,
    pub(crate) events_fired: u64,
}

impl Control {
    pub(crate) fn new() -> Self {
        Self {
            state: RunState::Stopped,
            pause_requested: false,
            pending_stop: None,
            last_stop: None,
            failure: None,
            events_fired: 0,
        }
    }

    /// Enter `state` from a stop. Clears stale stop requests.
    pub(crate) fn start(&mut self, state: RunState) {
        self.state = state;
        self.pause_requested = false;
        self.pending_stop = None;
        self.last_stop = None;
    }

    /// Request a stop at the root's next poll. The first request wins.
    pub(crate) fn request_stop(&mut self, reason: StopReason) {
        self.pending_stop.get_or_insert(reason);
    }

    /// The stop the root should take now, if any. `now` is the root clock.
    pub(crate) fn take_stop(&mut self, now: Tick) -> Option<StopReason> {
        if self.failure.is_some() {
            return Some(StopReason::Failed);
        }
        if std::mem::take(&mut self.pause_requested) {
            return Some(StopReason::Paused);
        }
        if let Some(reason) = self.pending_stop.take() {
            return Some(reason);
        }
        match self.state {
            RunState::RunUntilTime(t) if now >= t => Some(StopReason::ReachedTime),
            _ => None,
        }
    }

    /// A pause or requested stop, for a child scheduler to take where it
    /// is. Fatal failures and time-based stops are left to the root.
    pub(crate) fn take_request(&mut self) -> Option<StopReason> {
        if std::mem::take(&mut self.pause_requested) {
            return Some(StopReason::Paused);
        }
        self.pending_stop.take()
    }

    /// The tick the root may not advance past in the current mode.
    pub(crate) fn time_limit(&self) -> Option<Tick> {
        match self.state {
            RunState::RunUntilTime(t) => Some(t),
            _ => None,
        }
    }
}
