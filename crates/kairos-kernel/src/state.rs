//! The single mutex-guarded kernel state shared by every kernel thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use kairos_trace::TraceLine;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::control::{Control, StopReason};
use crate::error::SimError;
use crate::handoff::{ThreadKey, ThreadRole, ThreadSlot};
use crate::listener::{Notice, SimulationListener};
use crate::manager::{ManagerId, ManagerState};
use crate::process::{ProcessId, ProcessState};
use crate::realtime::Pacer;
use crate::time::TimeScale;
use crate::trace::{TraceMode, TraceState};

/// Owned jointly by the [`Kernel`](crate::Kernel) handle and every kernel
/// thread.
pub(crate) struct Shared {
    pub(crate) state: Mutex<KernelState>,
    /// Signalled whenever the run stops.
    pub(crate) stopped: Condvar,
    pub(crate) handles: Mutex<Vec<(ThreadKey, JoinHandle<()>)>>,
}

impl Shared {
    pub(crate) fn new(state: KernelState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            stopped: Condvar::new(),
            handles: Mutex::new(Vec::new()),
        })
    }
}

pub(crate) struct KernelState {
    pub(crate) threads: Vec<ThreadSlot>,
    pub(crate) managers: Vec<ManagerState>,
    pub(crate) processes: Vec<ProcessState>,
    /// Idle pooled processes, reused most-recently-freed first.
    pub(crate) free: Vec<ProcessId>,
    pub(crate) control: Control,
    pub(crate) trace: TraceState,
    pub(crate) pacer: Pacer,
    pub(crate) scale: TimeScale,
    pub(crate) listeners: Vec<Arc<dyn SimulationListener>>,
    pub(crate) notices: Vec<Notice>,
    /// The scheduler thread parked in the last stop; resuming wakes it.
    pub(crate) stopped_thread: Option<ThreadKey>,
    /// Bumped by `initialize` so advances begun before it are dropped.
    pub(crate) generation: u64,
    pub(crate) shutdown: bool,
}

impl KernelState {
    pub(crate) fn new(scale: TimeScale, pacer: Pacer, trace: TraceMode) -> Self {
        Self {
            threads: vec![ThreadSlot::new(ThreadRole::Controller)],
            managers: Vec::new(),
            processes: Vec::new(),
            free: Vec::new(),
            control: Control::new(),
            trace: TraceState::new(trace),
            pacer,
            scale,
            listeners: Vec::new(),
            notices: Vec::new(),
            stopped_thread: None,
            generation: 0,
            shutdown: false,
        }
    }

    pub(crate) fn manager(&self, id: ManagerId) -> Result<&ManagerState, SimError> {
        self.managers.get(id.0).ok_or(SimError::UnknownManager(id.0))
    }

    /// Record a fatal error. Only the first one is kept.
    pub(crate) fn fail(&mut self, err: &SimError) {
        if self.control.failure.is_none() {
            tracing::error!(error = %err, "fatal simulation error; run stopped");
            self.control.failure = Some(err.to_string());
        }
    }

    /// Queue a listener notice, if anyone is listening.
    pub(crate) fn notify(&mut self, notice: Notice) {
        if !self.listeners.is_empty() {
            self.notices.push(notice);
        }
    }

    /// Append a trace line for a transition on `manager` at its current time.
    pub(crate) fn record(&mut self, manager: ManagerId, line: impl FnOnce() -> TraceLine) {
        if !self.trace.is_active() {
            return;
        }
        let root_tick = self.managers[ManagerId::ROOT.0].horizon();
        let mgr = &self.managers[manager.0];
        match self.trace.push(&mgr.name, mgr.current, root_tick, line()) {
            Ok(None) => {}
            Ok(Some(mismatch)) => {
                let expected = mismatch
                    .expected
                    .as_ref()
                    .map_or_else(|| "<end of recording>".to_owned(), ToString::to_string);
                tracing::warn!(
                    expected = %expected,
                    actual = %mismatch.actual,
                    "trace verification mismatch; pausing"
                );
                self.control.request_stop(StopReason::TraceMismatch);
                self.notify(Notice::TraceMismatch(mismatch));
            }
            Err(e) => self.fail(&SimError::Trace(e)),
        }
    }
}

/// Record `err` if it is fatal, then hand it back.
pub(crate) fn check<T>(state: &mut KernelState, result: Result<T, SimError>) -> Result<T, SimError> {
    if let Err(err) = &result {
        if err.is_fatal() {
            state.fail(err);
        }
    }
    result
}

/// Deliver queued notices with the kernel mutex released.
pub(crate) fn flush_notices(guard: &mut MutexGuard<'_, KernelState>) {
    if guard.notices.is_empty() {
        return;
    }
    let notices = std::mem::take(&mut guard.notices);
    let listeners = guard.listeners.clone();
    let scale = guard.scale;
    MutexGuard::unlocked(guard, || {
        for notice in &notices {
            for listener in &listeners {
                notice.deliver(listener.as_ref(), |tick| scale.hours(tick));
            }
        }
    });
}
