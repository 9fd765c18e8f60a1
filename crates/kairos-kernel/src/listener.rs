//! Callbacks from the kernel to the surrounding simulation.
//!
//! Listeners run on whichever kernel thread holds control, with the kernel
//! mutex released. They may call controller methods such as
//! [`Kernel::pause`](crate::Kernel::pause) but must not block waiting for the
//! run to stop.

use std::fmt;

use kairos_trace::TraceMismatch;

use crate::control::{RunState, StopReason};
use crate::time::Tick;

/// An error returned by an action, as reported to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionFailure {
    /// Simulated time at which the action failed.
    pub tick: Tick,
    /// Name of the scheduler the process belonged to.
    pub manager: String,
    /// Name of the action's owner.
    pub owner: String,
    pub action: String,
    /// Rendered error chain.
    pub message: String,
    /// Whether the error was an invariant violation that ended the run.
    pub fatal: bool,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} failed at tick {} on '{}': {}",
            self.owner, self.action, self.tick, self.manager, self.message
        )
    }
}

/// Observer of run progress. Every method has a no-op default.
pub trait SimulationListener: Send + Sync {
    /// The root clock moved. During real-time pacing this is also called with
    /// intermediate ticks between events.
    fn time_advanced(&self, _tick: Tick, _hours: f64) {}

    /// The run started in `state`, or stopped ([`RunState::Stopped`]).
    fn run_state_changed(&self, _state: RunState) {}

    /// The run stopped at `tick` for `reason`.
    fn run_stopped(&self, _reason: StopReason, _tick: Tick) {}

    fn action_failed(&self, _failure: &ActionFailure) {}

    fn trace_mismatch(&self, _mismatch: &TraceMismatch) {}
}

/// Listener that reports run progress through `tracing`. Failures and trace
/// mismatches are already logged by the kernel itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl SimulationListener for TracingListener {
    fn time_advanced(&self, tick: Tick, hours: f64) {
        tracing::trace!(tick, hours, "time advanced");
    }

    fn run_state_changed(&self, state: RunState) {
        tracing::info!(?state, "run state changed");
    }

    fn run_stopped(&self, reason: StopReason, tick: Tick) {
        tracing::info!(%reason, tick, "run stopped");
    }
}

/// Deferred listener call, queued under the lock and delivered outside it.
#[derive(Debug, Clone)]
pub(crate) enum Notice {
    TimeAdvanced(Tick),
    StateChanged(RunState),
    Stopped(StopReason, Tick),
    ActionFailed(ActionFailure),
    TraceMismatch(TraceMismatch),
}

impl Notice {
    pub(crate) fn deliver(&self, listener: &dyn SimulationListener, hours_per_tick: impl Fn(Tick) -> f64) {
        match self {
            Notice::TimeAdvanced(tick) => listener.time_advanced(*tick, hours_per_tick(*tick)),
            Notice::StateChanged(state) => listener.run_state_changed(*state),
            Notice::Stopped(reason, tick) => listener.run_stopped(*reason, *tick),
            Notice::ActionFailed(failure) => listener.action_failed(failure),
            Notice::TraceMismatch(mismatch) => listener.trace_mismatch(mismatch),
        }
    }
}
