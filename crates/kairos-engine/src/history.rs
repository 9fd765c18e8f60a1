//! A listener that keeps a serializable log of what happened to the run.

use std::sync::Arc;

use kairos_kernel::listener::{ActionFailure, SimulationListener};
use kairos_kernel::time::Tick;
use kairos_kernel::{RunState, StopReason};
use kairos_trace::TraceMismatch;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One entry of the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        mode: String,
    },
    Stopped {
        tick: Tick,
        reason: String,
    },
    ActionFailed {
        tick: Tick,
        manager: String,
        owner: String,
        action: String,
        message: String,
        fatal: bool,
    },
    /// A trace record disagreed with the recording. Records are rendered in
    /// the trace file format.
    TraceMismatch {
        expected: Option<String>,
        actual: String,
    },
}

/// Collects [`RunEvent`]s. Clock ticks are not recorded unless
/// `with_time` is set, since pacing can report many of them.
#[derive(Debug, Default)]
pub struct RunHistory {
    events: Mutex<Vec<RunEvent>>,
    times: Option<Mutex<Vec<Tick>>>,
}

impl RunHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Also keep every root clock value reported by the kernel.
    pub fn with_time() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::default(),
            times: Some(Mutex::default()),
        })
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn times(&self) -> Vec<Tick> {
        self.times.as_ref().map(|t| t.lock().clone()).unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RunEvent::ActionFailed { .. }))
            .cloned()
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.events.lock())
    }

    fn push(&self, event: RunEvent) {
        self.events.lock().push(event);
    }
}

impl SimulationListener for RunHistory {
    fn time_advanced(&self, tick: Tick, _hours: f64) {
        if let Some(times) = &self.times {
            times.lock().push(tick);
        }
    }

    fn run_state_changed(&self, state: RunState) {
        if state.is_running() {
            self.push(RunEvent::Started {
                mode: format!("{state:?}"),
            });
        }
    }

    fn run_stopped(&self, reason: StopReason, tick: Tick) {
        self.push(RunEvent::Stopped {
            tick,
            reason: reason.to_string(),
        });
    }

    fn action_failed(&self, failure: &ActionFailure) {
        self.push(RunEvent::ActionFailed {
            tick: failure.tick,
            manager: failure.manager.clone(),
            owner: failure.owner.clone(),
            action: failure.action.clone(),
            message: failure.message.clone(),
            fatal: failure.fatal,
        });
    }

    fn trace_mismatch(&self, mismatch: &TraceMismatch) {
        self.push(RunEvent::TraceMismatch {
            expected: mismatch.expected.as_ref().map(ToString::to_string),
            actual: mismatch.actual.to_string(),
        });
    }
}
