//! The controller-side handle: build a scheduler tree, queue work, and drive
//! the run.

use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kairos_trace::{EventTraceRecord, TraceSummary};

use crate::action::Action;
use crate::context::{KernelConfig, SimContext};
use crate::control::{Control, RunState, StopReason};
use crate::error::{SimError, SimResult};
use crate::event::EventKind;
use crate::handoff::{wake, CONTROLLER};
use crate::inspect::{snapshot, EventRow};
use crate::listener::{Notice, SimulationListener};
use crate::manager::{spawn_manager, ManagerId};
use crate::process::{
    hand_off, recycle, schedule_new, schedule_single, terminate_process, validate_delay, ProcessFlags, ProcessId,
};
use crate::realtime::Pacer;
use crate::state::{check, KernelState, Shared};
use crate::time::{deadline, Priority, Tick, TimeScale};
use crate::trace::{TraceMode, VerifyStats};

/// How long shutdown waits for a running simulation to pause.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A discrete-event simulation kernel.
///
/// The kernel starts paused with a single root scheduler. Work is queued with
/// [`schedule_process`](Self::schedule_process) while paused; the run is then
/// driven from this handle while actions run on pooled kernel threads, one at
/// a time.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicI64, Ordering};
/// use kairos_kernel::prelude::*;
///
/// let kernel = Kernel::new(KernelConfig::default(), TraceMode::Off).unwrap();
/// let seen = Arc::new(AtomicI64::new(-1));
/// let served = Arc::clone(&seen);
/// let clerk = NamedOwner::shared("Clerk");
/// kernel
///     .schedule_process(ManagerId::ROOT, 10, PRIO_DEFAULT, Action::new(clerk, "serve", move |ctx| {
///         ctx.wait(5, PRIO_DEFAULT)?;
///         served.store(ctx.now(), Ordering::SeqCst);
///         Ok(())
///     }))
///     .unwrap();
///
/// assert_eq!(kernel.run().unwrap(), StopReason::Idle);
/// assert_eq!(seen.load(Ordering::SeqCst), 15);
/// assert_eq!(kernel.current_time(), 15);
/// ```
pub struct Kernel {
    shared: Arc<Shared>,
    scale: TimeScale,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Kernel")
            .field("managers", &state.managers.len())
            .field("processes", &state.processes.len())
            .field("run_state", &state.control.state)
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub fn new(config: KernelConfig, trace: TraceMode) -> SimResult<Self> {
        let pacer = Pacer::new(config.real_time, config.real_time_factor, config.pacing_interval);
        let shared = Shared::new(KernelState::new(config.scale, pacer, trace));
        {
            let mut guard = shared.state.lock();
            spawn_manager(&shared, &mut guard, config.root_name.clone(), None)?;
        }
        tracing::info!(
            root = %config.root_name,
            ticks_per_hour = config.scale.ticks_per_hour(),
            real_time = config.real_time,
            "kernel created"
        );
        Ok(Self {
            shared,
            scale: config.scale,
        })
    }

    pub fn root(&self) -> ManagerId {
        ManagerId::ROOT
    }

    pub fn context(&self) -> SimContext {
        SimContext {
            scale: self.scale,
            root: ManagerId::ROOT,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn SimulationListener>) {
        self.shared.state.lock().listeners.push(listener);
    }

    // -----------------------------------------------------------------------
    // Building and queueing (paused only)
    // -----------------------------------------------------------------------

    /// Create a child scheduler under `parent`. Its clock starts at the
    /// parent's current time.
    pub fn add_manager(&self, parent: ManagerId, name: impl Into<String>) -> SimResult<ManagerId> {
        let name = name.into();
        self.with_paused(|state| spawn_manager(&self.shared, state, name, Some(parent)))
    }

    /// Queue `action` on a new process `delay` ticks after `manager`'s
    /// current time.
    #[track_caller]
    pub fn schedule_process(
        &self,
        manager: ManagerId,
        delay: Tick,
        priority: Priority,
        action: Action,
    ) -> SimResult<ProcessId> {
        let source = Location::caller();
        self.with_paused(|state| {
            check(state, validate_delay(delay))?;
            let at = deadline(state.manager(manager)?.horizon(), delay);
            schedule_new(&self.shared, state, manager, at, priority, action, source)
        })
    }

    /// Queue `action` on a new process at absolute tick `at`.
    #[track_caller]
    pub fn schedule_process_at(
        &self,
        manager: ManagerId,
        at: Tick,
        priority: Priority,
        action: Action,
    ) -> SimResult<ProcessId> {
        let source = Location::caller();
        self.with_paused(|state| schedule_new(&self.shared, state, manager, at, priority, action, source))
    }

    /// Queue `action` unless an identical unstarted process is already
    /// queued. Returns whether a new process was queued.
    #[track_caller]
    pub fn schedule_single_process(
        &self,
        manager: ManagerId,
        delay: Tick,
        priority: Priority,
        action: Action,
    ) -> SimResult<bool> {
        let source = Location::caller();
        self.with_paused(|state| {
            check(state, validate_delay(delay))?;
            let at = deadline(state.manager(manager)?.horizon(), delay);
            schedule_single(&self.shared, state, manager, at, priority, action, source).map(|p| p.is_some())
        })
    }

    /// Kill a queued or waiting process while paused.
    pub fn terminate(&mut self, target: ProcessId) -> SimResult<()> {
        let mut guard = self.shared.state.lock();
        ensure_paused(&guard)?;
        terminate_process(&mut guard, CONTROLLER, target)
    }

    /// Unwind every queued and waiting process, clear all lists and reset
    /// all clocks to zero. Schedulers, listeners and the trace sink are kept.
    pub fn initialize(&mut self) -> SimResult<()> {
        let mut guard = self.shared.state.lock();
        ensure_paused(&guard)?;
        guard.trace.suppressed = true;

        for index in 0..guard.managers.len() {
            let events: Vec<_> = guard.managers[index].fel.drain().collect();
            let waiting = std::mem::take(&mut guard.managers[index].cond_wait);
            for event in events {
                match event.kind() {
                    EventKind::Start => recycle(&mut guard, event.process()),
                    EventKind::Resume => unwind(&mut guard, event.process()),
                }
            }
            for pid in waiting {
                unwind(&mut guard, pid);
            }
        }

        for mgr in guard.managers.iter_mut() {
            mgr.reset();
        }
        guard.control = Control::new();
        guard.generation += 1;
        guard.pacer.reset();
        guard.trace.discard_open();
        guard.trace.suppressed = false;
        tracing::info!(pooled = guard.processes.len(), "simulation initialized");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    /// Leave the paused state in `mode` without waiting.
    pub fn start(&self, mode: RunState) -> SimResult<()> {
        if mode == RunState::Stopped {
            self.pause();
            return Ok(());
        }
        let mut guard = self.shared.state.lock();
        if let Some(message) = &guard.control.failure {
            return Err(SimError::RunFailed(message.clone()));
        }
        if guard.shutdown {
            return Err(SimError::RunFailed("kernel shut down".to_owned()));
        }
        ensure_paused(&guard)?;
        guard.control.start(mode);
        guard.pacer.reset();
        guard.notify(Notice::StateChanged(mode));
        let tick = guard.managers[ManagerId::ROOT.0].horizon();
        tracing::info!(?mode, tick, "run started");
        let root = guard.managers[ManagerId::ROOT.0].thread;
        let holder = guard.stopped_thread.take().unwrap_or(root);
        wake(&mut guard, holder);
        Ok(())
    }

    pub fn resume(&self) -> SimResult<()> {
        self.start(RunState::Running)
    }

    /// Ask the run to stop at the next scheduler poll. Returns immediately.
    pub fn pause(&self) {
        let mut guard = self.shared.state.lock();
        if guard.control.state.is_running() {
            guard.control.pause_requested = true;
            let root = guard.managers[ManagerId::ROOT.0].thread;
            guard.threads[root.0].signal.notify_one();
        }
    }

    /// Block until the run is stopped and return why.
    pub fn wait_for_pause(&self) -> StopReason {
        let mut guard = self.shared.state.lock();
        while guard.control.state != RunState::Stopped {
            self.shared.stopped.wait(&mut guard);
        }
        guard.control.last_stop.unwrap_or(StopReason::Paused)
    }

    /// Like [`wait_for_pause`](Self::wait_for_pause), giving up after
    /// `timeout`.
    pub fn wait_for_pause_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let until = Instant::now() + timeout;
        let mut guard = self.shared.state.lock();
        while guard.control.state != RunState::Stopped {
            if self.shared.stopped.wait_until(&mut guard, until).timed_out() {
                break;
            }
        }
        (guard.control.state == RunState::Stopped).then(|| guard.control.last_stop.unwrap_or(StopReason::Paused))
    }

    /// Run until the simulation stops on its own or is paused.
    pub fn run(&self) -> SimResult<StopReason> {
        self.run_in(RunState::Running)
    }

    /// Run until the root clock reaches `tick`. Events at `tick` itself have
    /// not fired when this returns.
    pub fn run_until(&self, tick: Tick) -> SimResult<StopReason> {
        self.run_in(RunState::RunUntilTime(tick))
    }

    /// Fire exactly one event.
    pub fn step_event(&self) -> SimResult<StopReason> {
        self.run_in(RunState::RunOneEvent)
    }

    /// Advance to the next tick that has work, without firing it.
    pub fn step_to_next_time(&self) -> SimResult<StopReason> {
        self.run_in(RunState::RunUntilNextEventTime)
    }

    fn run_in(&self, mode: RunState) -> SimResult<StopReason> {
        self.start(mode)?;
        match self.wait_for_pause() {
            StopReason::Failed => Err(SimError::RunFailed(self.failure().unwrap_or_default())),
            reason => Ok(reason),
        }
    }

    pub fn set_real_time(&self, enabled: bool, factor: f64) {
        let mut guard = self.shared.state.lock();
        guard.pacer.configure(enabled, factor);
        tracing::info!(enabled, factor = guard.pacer.factor(), "real-time pacing changed");
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Current time of the root scheduler. While a step has stopped inside a
    /// child, this is the time the root is advancing to.
    pub fn current_time(&self) -> Tick {
        self.shared.state.lock().managers[ManagerId::ROOT.0].horizon()
    }

    /// Current time in simulated hours.
    pub fn current_hours(&self) -> f64 {
        self.scale.hours(self.current_time())
    }

    pub fn manager_time(&self, manager: ManagerId) -> SimResult<Tick> {
        Ok(self.shared.state.lock().manager(manager)?.current)
    }

    /// The target time most recently assigned to `manager` by its parent.
    pub fn manager_target(&self, manager: ManagerId) -> SimResult<Tick> {
        Ok(self.shared.state.lock().manager(manager)?.target)
    }

    pub fn manager_id(&self, name: &str) -> Option<ManagerId> {
        let state = self.shared.state.lock();
        state.managers.iter().position(|m| m.name == name).map(ManagerId)
    }

    pub fn manager_name(&self, manager: ManagerId) -> SimResult<String> {
        Ok(self.shared.state.lock().manager(manager)?.name.clone())
    }

    pub fn children(&self, manager: ManagerId) -> SimResult<Vec<ManagerId>> {
        Ok(self.shared.state.lock().manager(manager)?.children.clone())
    }

    /// Children still advancing toward the current target.
    pub fn active_child_count(&self, manager: ManagerId) -> SimResult<usize> {
        Ok(self.shared.state.lock().manager(manager)?.active_child_count)
    }

    pub fn pending_events(&self, manager: ManagerId) -> SimResult<usize> {
        Ok(self.shared.state.lock().manager(manager)?.fel.len())
    }

    /// Processes on `manager`'s conditional-wait list.
    pub fn waiting_processes(&self, manager: ManagerId) -> SimResult<usize> {
        Ok(self.shared.state.lock().manager(manager)?.cond_wait.len())
    }

    /// Snapshot of `manager`'s future-event list in firing order.
    pub fn inspect(&self, manager: ManagerId) -> SimResult<Vec<EventRow>> {
        let state = self.shared.state.lock();
        Ok(snapshot(&state.manager(manager)?.fel, &state.scale))
    }

    /// Flags of a process that is in use, `None` if it is idle in the pool.
    pub fn process_flags(&self, process: ProcessId) -> Option<ProcessFlags> {
        let state = self.shared.state.lock();
        state.processes.get(process.0).filter(|p| p.in_use).map(|p| p.flags)
    }

    /// Size of the process pool (idle and busy).
    pub fn pooled_processes(&self) -> usize {
        self.shared.state.lock().processes.len()
    }

    pub fn run_state(&self) -> RunState {
        self.shared.state.lock().control.state
    }

    pub fn last_stop(&self) -> Option<StopReason> {
        self.shared.state.lock().control.last_stop
    }

    /// The fatal error that ended the run, if any.
    pub fn failure(&self) -> Option<String> {
        self.shared.state.lock().control.failure.clone()
    }

    pub fn events_fired(&self) -> u64 {
        self.shared.state.lock().control.events_fired
    }

    // -----------------------------------------------------------------------
    // Trace
    // -----------------------------------------------------------------------

    /// Record count and digest of everything written so far in record mode.
    pub fn trace_summary(&self) -> Option<TraceSummary> {
        self.shared.state.lock().trace.summary()
    }

    pub fn verify_stats(&self) -> Option<VerifyStats> {
        self.shared.state.lock().trace.verify_stats()
    }

    /// In verify mode, the number of recorded blocks this run never produced.
    pub fn unmatched_trace_records(&self) -> SimResult<Option<usize>> {
        Ok(self.shared.state.lock().trace.unmatched_remaining()?)
    }

    /// Records kept by [`TraceMode::Capture`].
    pub fn captured_trace(&self) -> Vec<EventTraceRecord> {
        self.shared.state.lock().trace.captured().to_vec()
    }

    pub fn flush_trace(&self) -> SimResult<()> {
        Ok(self.shared.state.lock().trace.flush()?)
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Pause the run, then wake and join every kernel thread one at a time.
    /// Suspended processes observe [`SimError::Killed`] while unwinding.
    pub fn shutdown(&mut self) {
        let stopped = {
            let mut guard = self.shared.state.lock();
            if guard.shutdown {
                return;
            }
            if guard.control.state.is_running() {
                guard.control.pause_requested = true;
                let root = guard.managers[ManagerId::ROOT.0].thread;
                guard.threads[root.0].signal.notify_one();
            }
            let until = Instant::now() + SHUTDOWN_GRACE;
            while guard.control.state != RunState::Stopped {
                if self.shared.stopped.wait_until(&mut guard, until).timed_out() {
                    break;
                }
            }
            if let Err(e) = guard.trace.flush() {
                tracing::warn!(error = %e, "failed to flush trace during shutdown");
            }
            guard.shutdown = true;
            guard.control.state == RunState::Stopped
        };

        let handles = std::mem::take(&mut *self.shared.handles.lock());
        if !stopped {
            tracing::warn!(threads = handles.len(), "run did not pause; detaching kernel threads");
            return;
        }
        for (key, handle) in handles {
            wake(&mut self.shared.state.lock(), key);
            if handle.join().is_err() {
                tracing::warn!(thread = key.0, "kernel thread panicked during shutdown");
            }
        }
        tracing::debug!("kernel shut down");
    }

    fn with_paused<T>(&self, f: impl FnOnce(&mut KernelState) -> SimResult<T>) -> SimResult<T> {
        let mut guard = self.shared.state.lock();
        ensure_paused(&guard)?;
        f(&mut guard)
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn ensure_paused(state: &KernelState) -> SimResult<()> {
    if state.control.state != RunState::Stopped {
        return Err(SimError::NotPaused);
    }
    Ok(())
}

/// Kill a suspended process from the controller and wait for it to unwind.
fn unwind(guard: &mut parking_lot::MutexGuard<'_, KernelState>, pid: ProcessId) {
    let process = &mut guard.processes[pid.0];
    process.flags.terminate = true;
    process.cond_chained = false;
    process.next = Some(CONTROLLER);
    let thread = process.thread;
    hand_off(guard, CONTROLLER, thread);
}
