//! Pooled processes and the operations a running process may call.
//!
//! A process is a parked OS thread that runs one [`Action`] at a time. It is
//! either idle in the pool, queued as the payload of an event, waiting on the
//! conditional list, or holding control. Only the thread holding control may
//! touch scheduler state, and it gives control away only at the suspension
//! points below.

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Arc;
use std::thread;

use kairos_trace::TraceKind;
use parking_lot::MutexGuard;

use crate::action::{Action, ActionBody, ActionLabel};
use crate::context::SimContext;
use crate::control::StopReason;
use crate::error::{ActionResult, SimError, SimResult};
use crate::event::{Event, EventKind, InsertMode};
use crate::handoff::{park, switch_to, ThreadKey, ThreadRole, ThreadSlot};
use crate::listener::{ActionFailure, Notice};
use crate::manager::ManagerId;
use crate::owner::NamedOwner;
use crate::state::{check, KernelState, Shared};
use crate::time::{deadline, Priority, Tick, PRIO_LAST_FIFO, PRIO_LAST_LIFO};
use crate::trace::line;

// ---------------------------------------------------------------------------
// Identity and flags
// ---------------------------------------------------------------------------

/// Handle to a pooled process.
///
/// Handles are recycled with the process: once the process finishes its
/// action the same id may be handed out for a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub(crate) usize);

impl ProcessId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status flags of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessFlags {
    /// Holds control right now.
    pub active: bool,
    /// Has been terminated; its next resumption raises [`SimError::Killed`].
    pub terminate: bool,
    /// Is inside a conditional wait that has not been closed yet.
    pub cond_wait: bool,
}

pub(crate) struct ProcessState {
    pub(crate) thread: ThreadKey,
    pub(crate) manager: ManagerId,
    pub(crate) flags: ProcessFlags,
    /// Part of the conditional-evaluation chain currently being walked.
    pub(crate) cond_chained: bool,
    /// Who gets control when this process next suspends or finishes.
    pub(crate) next: Option<ThreadKey>,
    pub(crate) action: Option<Action>,
    pub(crate) label: ActionLabel,
    pub(crate) in_use: bool,
}

impl ProcessState {
    fn idle(thread: ThreadKey, manager: ManagerId) -> Self {
        Self {
            thread,
            manager,
            flags: ProcessFlags::default(),
            cond_chained: false,
            next: None,
            action: None,
            label: idle_label(),
            in_use: false,
        }
    }
}

fn idle_label() -> ActionLabel {
    ActionLabel {
        target: Arc::new(NamedOwner::new("<idle>")),
        name: Arc::from("<none>"),
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Take an idle process from the pool, spawning a new thread if needed, and
/// bind `action` to it.
pub(crate) fn allocate(
    shared: &Arc<Shared>,
    state: &mut KernelState,
    manager: ManagerId,
    action: Action,
) -> SimResult<ProcessId> {
    let pid = match state.free.pop() {
        Some(pid) => pid,
        None => spawn(shared, state, manager)?,
    };
    let process = &mut state.processes[pid.0];
    process.manager = manager;
    process.label = action.label();
    process.action = Some(action);
    process.in_use = true;
    Ok(pid)
}

fn spawn(shared: &Arc<Shared>, state: &mut KernelState, manager: ManagerId) -> SimResult<ProcessId> {
    let pid = ProcessId(state.processes.len());
    let key = ThreadKey(state.threads.len());
    let worker = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("kairos-proc-{}", pid.0))
        .spawn(move || process_main(worker, pid, key))
        .map_err(|e| SimError::Spawn(e.to_string()))?;
    state.threads.push(ThreadSlot::new(ThreadRole::Process(pid)));
    state.processes.push(ProcessState::idle(key, manager));
    shared.handles.lock().push((key, handle));
    tracing::debug!(process = %pid, "spawned process thread");
    Ok(pid)
}

/// Return a process to the pool.
pub(crate) fn recycle(state: &mut KernelState, pid: ProcessId) {
    let process = &mut state.processes[pid.0];
    process.flags = ProcessFlags::default();
    process.cond_chained = false;
    process.next = None;
    process.action = None;
    process.label = idle_label();
    process.in_use = false;
    state.free.push(pid);
}

// ---------------------------------------------------------------------------
// Control transfer
// ---------------------------------------------------------------------------

/// Hand control to `dest`, marking it active if it is a process.
pub(crate) fn hand_off(guard: &mut MutexGuard<'_, KernelState>, me: ThreadKey, dest: ThreadKey) {
    enter(guard, dest);
    switch_to(guard, me, dest);
}

fn enter(state: &mut KernelState, dest: ThreadKey) {
    let ThreadRole::Process(pid) = state.threads[dest.0].role else {
        return;
    };
    let process = &mut state.processes[pid.0];
    process.flags.active = true;
    if std::mem::take(&mut process.cond_chained) {
        let manager = process.manager;
        let label = process.label.clone();
        let now = state.managers[manager.0].current;
        state.record(manager, || line(TraceKind::CondEval, now, None, &label));
    }
}

fn process_main(shared: Arc<Shared>, pid: ProcessId, me: ThreadKey) {
    let mut guard = shared.state.lock();
    loop {
        park(&mut guard, me);
        if guard.shutdown {
            break;
        }
        let action = guard.processes[pid.0].action.take();
        let outcome = match action {
            Some(action) => {
                let ctx = ProcessContext {
                    shared: Arc::clone(&shared),
                    pid,
                    me,
                };
                let body = action.into_body();
                MutexGuard::unlocked(&mut guard, || run_body(body, &ctx))
            }
            None => {
                tracing::error!(process = %pid, "process woken without an action");
                Ok(())
            }
        };
        if guard.shutdown {
            break;
        }
        finish(&mut guard, pid, me, outcome);
    }
    tracing::trace!(process = %pid, "process thread exiting");
}

fn run_body(body: ActionBody, ctx: &ProcessContext) -> ActionResult {
    match panic::catch_unwind(AssertUnwindSafe(|| body(ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            Err(anyhow::anyhow!("action panicked: {message}"))
        }
    }
}

/// Retire a process whose action returned, and pass control on.
fn finish(guard: &mut MutexGuard<'_, KernelState>, pid: ProcessId, me: ThreadKey, outcome: ActionResult) {
    let state: &mut KernelState = &mut **guard;
    let (manager, label, terminated) = {
        let process = &state.processes[pid.0];
        (process.manager, process.label.clone(), process.flags.terminate)
    };
    let now = state.managers[manager.0].current;
    let killed = terminated
        || outcome
            .as_ref()
            .err()
            .and_then(|e| e.downcast_ref::<SimError>())
            .is_some_and(SimError::is_killed);

    let kind = if killed { TraceKind::Killed } else { TraceKind::Exit };
    state.record(manager, || line(kind, now, None, &label));

    match outcome {
        Err(err) if !killed => {
            let fatal = err.downcast_ref::<SimError>().is_some_and(SimError::is_fatal);
            let message = format!("{err:#}");
            if fatal {
                state.fail(&SimError::RunFailed(message.clone()));
            } else {
                tracing::error!(
                    tick = now,
                    owner = label.owner_name(),
                    action = %label.name,
                    error = %message,
                    "action failed; pausing"
                );
                state.control.request_stop(StopReason::ActionFailed);
            }
            let failure = ActionFailure {
                tick: now,
                manager: state.managers[manager.0].name.clone(),
                owner: label.owner_name().to_owned(),
                action: label.name.to_string(),
                message,
                fatal,
            };
            state.notify(Notice::ActionFailed(failure));
        }
        _ => tracing::debug!(process = %pid, action = %label, killed, "process finished"),
    }

    let cond_list = &mut state.managers[manager.0].cond_wait;
    if let Some(idx) = cond_list.iter().position(|p| *p == pid) {
        tracing::warn!(process = %pid, action = %label, "process finished inside an open conditional wait");
        cond_list.remove(idx);
    }

    let next = state.processes[pid.0].next.take();
    let dest = next.unwrap_or(state.managers[manager.0].thread);
    recycle(state, pid);
    hand_off(guard, me, dest);
}

/// Terminate `target` on behalf of the thread `me`.
///
/// A process that never started is recycled on the spot. A suspended one is
/// flagged, removed from wherever it is queued and given control so it can
/// unwind; control comes back to `me` once it has.
pub(crate) fn terminate_process(
    guard: &mut MutexGuard<'_, KernelState>,
    me: ThreadKey,
    target: ProcessId,
) -> SimResult<()> {
    let state: &mut KernelState = &mut **guard;
    let located = locate_for_cancel(state, target);
    let manager = check(state, located)?;
    let now = state.managers[manager.0].current;
    let label = state.processes[target.0].label.clone();

    let cond_list = &mut state.managers[manager.0].cond_wait;
    if let Some(idx) = cond_list.iter().position(|p| *p == target) {
        cond_list.remove(idx);
        splice_chain(state, target);
    } else {
        let removed = state.managers[manager.0].fel.remove_process(target);
        let Some(event) = removed else {
            return check(state, Err(SimError::UnknownProcess(target)));
        };
        if event.kind() == EventKind::Start {
            let priority = event.priority();
            state.record(manager, || line(TraceKind::Terminated, now, Some(priority), &label));
            state.record(manager, || line(TraceKind::Killed, now, None, &label));
            tracing::debug!(process = %target, action = %label, "terminated before start");
            recycle(state, target);
            return Ok(());
        }
    }

    state.record(manager, || line(TraceKind::Terminated, now, None, &label));
    tracing::debug!(process = %target, action = %label, "terminating process");
    let process = &mut state.processes[target.0];
    process.flags.terminate = true;
    process.next = Some(me);
    let thread = process.thread;
    hand_off(guard, me, thread);
    Ok(())
}

/// The manager `target` is queued on, or the fatal error for trying to
/// cancel it.
fn locate_for_cancel(state: &KernelState, target: ProcessId) -> SimResult<ManagerId> {
    let process = state
        .processes
        .get(target.0)
        .filter(|p| p.in_use)
        .ok_or(SimError::UnknownProcess(target))?;
    if process.flags.active {
        return Err(SimError::ActiveProcess(target));
    }
    Ok(process.manager)
}

/// Remove `target` from a conditional-evaluation chain that may be running.
fn splice_chain(state: &mut KernelState, target: ProcessId) {
    let (thread, after) = {
        let process = &mut state.processes[target.0];
        process.cond_chained = false;
        (process.thread, process.next.take())
    };
    for process in state.processes.iter_mut() {
        if process.next == Some(thread) {
            process.next = after;
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessContext
// ---------------------------------------------------------------------------

/// The handle an action body uses to talk to the scheduler.
///
/// Every method must be called from the process's own thread while it holds
/// control. Methods that suspend return `Err(SimError::Killed)` if the
/// process was terminated while suspended; propagate it with `?`.
pub struct ProcessContext {
    shared: Arc<Shared>,
    pid: ProcessId,
    me: ThreadKey,
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext").field("process", &self.pid).finish()
    }
}

impl ProcessContext {
    pub fn process_id(&self) -> ProcessId {
        self.pid
    }

    /// Current time of the scheduler this process belongs to.
    pub fn now(&self) -> Tick {
        self.clock(&self.shared.state.lock())
    }

    pub fn manager(&self) -> ManagerId {
        self.shared.state.lock().processes[self.pid.0].manager
    }

    pub fn sim(&self) -> SimContext {
        let state = self.shared.state.lock();
        SimContext {
            scale: state.scale,
            root: ManagerId::ROOT,
        }
    }

    pub fn flags(&self) -> ProcessFlags {
        self.shared.state.lock().processes[self.pid.0].flags
    }

    /// Suspend for `delay` ticks. A zero delay returns immediately.
    #[track_caller]
    pub fn wait(&self, delay: Tick, priority: Priority) -> SimResult<()> {
        let source = Location::caller();
        let mut guard = self.begin("wait")?;
        let state: &mut KernelState = &mut guard;
        check(state, validate_delay(delay).and_then(|()| validate_priority(priority)))?;
        if delay == 0 {
            return Ok(());
        }
        let now = self.clock(state);
        self.wait_at(&mut guard, deadline(now, delay), priority, source)
    }

    /// [`wait`](Self::wait) for a duration in simulated hours.
    #[track_caller]
    pub fn wait_hours(&self, hours: f64, priority: Priority) -> SimResult<()> {
        let ticks = self.shared.state.lock().scale.ticks(hours);
        self.wait(ticks, priority)
    }

    /// Suspend until every other event of this instant has fired; ties with
    /// other run-last waits resolve first-scheduled first.
    #[track_caller]
    pub fn schedule_last_fifo(&self) -> SimResult<()> {
        let source = Location::caller();
        let mut guard = self.begin("schedule_last_fifo")?;
        let now = self.clock(&guard);
        self.wait_at(&mut guard, now, PRIO_LAST_FIFO, source)
    }

    /// Like [`schedule_last_fifo`](Self::schedule_last_fifo), but ties with
    /// other LIFO run-last waits resolve most-recent first.
    #[track_caller]
    pub fn schedule_last_lifo(&self) -> SimResult<()> {
        let source = Location::caller();
        let mut guard = self.begin("schedule_last_lifo")?;
        let now = self.clock(&guard);
        self.wait_at(&mut guard, now, PRIO_LAST_LIFO, source)
    }

    /// Queue `action` on a new process `delay` ticks from now. The caller
    /// keeps running.
    #[track_caller]
    pub fn schedule_process(&self, delay: Tick, priority: Priority, action: Action) -> SimResult<ProcessId> {
        let source = Location::caller();
        let mut guard = self.begin("schedule_process")?;
        let state: &mut KernelState = &mut guard;
        let manager = state.processes[self.pid.0].manager;
        check(state, validate_delay(delay))?;
        let at = deadline(self.clock(state), delay);
        schedule_new(&self.shared, state, manager, at, priority, action, source)
    }

    /// Queue `action` on a new process at absolute tick `at`.
    #[track_caller]
    pub fn schedule_process_at(&self, at: Tick, priority: Priority, action: Action) -> SimResult<ProcessId> {
        let source = Location::caller();
        let mut guard = self.begin("schedule_process_at")?;
        let state: &mut KernelState = &mut guard;
        let manager = state.processes[self.pid.0].manager;
        schedule_new(&self.shared, state, manager, at, priority, action, source)
    }

    /// Queue `action` on another scheduler, `delay` ticks after this
    /// process's current time.
    ///
    /// An ancestor's clock lags behind its children while they advance, so
    /// the delay counts from whichever is later: this process's clock or the
    /// time the target scheduler has committed to.
    #[track_caller]
    pub fn schedule_process_on(
        &self,
        manager: ManagerId,
        delay: Tick,
        priority: Priority,
        action: Action,
    ) -> SimResult<ProcessId> {
        let source = Location::caller();
        let mut guard = self.begin("schedule_process_on")?;
        let state: &mut KernelState = &mut guard;
        check(state, validate_delay(delay))?;
        let now = state.manager(manager)?.horizon().max(self.clock(state));
        schedule_new(&self.shared, state, manager, deadline(now, delay), priority, action, source)
    }

    /// Like [`schedule_process`](Self::schedule_process), unless an unstarted
    /// process with the same time, priority, owner and action name is already
    /// queued. Returns whether a new process was queued.
    #[track_caller]
    pub fn schedule_single_process(&self, delay: Tick, priority: Priority, action: Action) -> SimResult<bool> {
        let source = Location::caller();
        let mut guard = self.begin("schedule_single_process")?;
        let state: &mut KernelState = &mut guard;
        let manager = state.processes[self.pid.0].manager;
        check(state, validate_delay(delay))?;
        let at = deadline(self.clock(state), delay);
        let pid = schedule_single(&self.shared, state, manager, at, priority, action, source)?;
        Ok(pid.is_some())
    }

    /// Run `action` on a new process right now. The caller resumes when the
    /// new process first suspends or finishes.
    pub fn start_process(&self, action: Action) -> SimResult<ProcessId> {
        let mut guard = self.begin("start_process")?;
        let state: &mut KernelState = &mut guard;
        let manager = state.processes[self.pid.0].manager;
        let started = allocate(&self.shared, state, manager, action);
        let pid = check(state, started)?;
        let label = state.processes[pid.0].label.clone();
        let now = state.managers[manager.0].current;
        state.record(manager, || line(TraceKind::Start, now, None, &label));
        tracing::debug!(process = %pid, action = %label, tick = now, "starting process");

        state.processes[pid.0].next = Some(self.me);
        state.processes[self.pid.0].flags.active = false;
        let thread = state.processes[pid.0].thread;
        hand_off(&mut guard, self.me, thread);
        self.resumed(&guard)?;
        Ok(pid)
    }

    /// Suspend until the next conditional evaluation of this scheduler.
    ///
    /// When resumed, re-test the condition: call `wait_until` again if it
    /// still does not hold, or [`wait_until_ended`](Self::wait_until_ended)
    /// once it does.
    pub fn wait_until(&self) -> SimResult<()> {
        let mut guard = self.shared.state.lock();
        self.ensure_running(&guard)?;
        let state: &mut KernelState = &mut guard;
        let manager = state.processes[self.pid.0].manager;
        state.processes[self.pid.0].flags.cond_wait = true;
        let list = &mut state.managers[manager.0].cond_wait;
        if !list.contains(&self.pid) {
            list.push(self.pid);
        }
        let label = state.processes[self.pid.0].label.clone();
        let now = state.managers[manager.0].current;
        state.record(manager, || line(TraceKind::WaitUntil, now, None, &label));
        tracing::debug!(process = %self.pid, action = %label, tick = now, "wait until");
        self.suspend(&mut guard)
    }

    /// Close a conditional wait. A no-op if the process is not on the
    /// conditional list; otherwise it continues on the run-last FIFO slot of
    /// the current instant.
    #[track_caller]
    pub fn wait_until_ended(&self) -> SimResult<()> {
        let source = Location::caller();
        let mut guard = self.shared.state.lock();
        self.ensure_running(&guard)?;
        let state: &mut KernelState = &mut guard;
        let manager = state.processes[self.pid.0].manager;
        let list = &mut state.managers[manager.0].cond_wait;
        let Some(idx) = list.iter().position(|p| *p == self.pid) else {
            return Ok(());
        };
        list.remove(idx);
        state.processes[self.pid.0].flags.cond_wait = false;
        let now = state.managers[manager.0].horizon();
        let queued = enqueue_resume(state, manager, self.pid, now, PRIO_LAST_FIFO, source);
        check(state, queued)?;
        let label = state.processes[self.pid.0].label.clone();
        state.record(manager, || line(TraceKind::WaitUntilEnded, now, Some(PRIO_LAST_FIFO), &label));
        tracing::debug!(process = %self.pid, action = %label, tick = now, "wait until ended");
        self.suspend(&mut guard)
    }

    /// Fire the pending event of `target` immediately. This process resumes
    /// once `target` suspends or finishes.
    pub fn interrupt(&self, target: ProcessId) -> SimResult<()> {
        let mut guard = self.begin("interrupt")?;
        let state: &mut KernelState = &mut guard;
        let located = locate_for_cancel(state, target);
        let manager = check(state, located)?;
        let Some(event) = state.managers[manager.0].fel.remove_process(target) else {
            return check(state, Err(SimError::UnknownProcess(target)));
        };
        let label = state.processes[target.0].label.clone();
        let now = state.managers[manager.0].current;
        let priority = event.priority();
        state.record(manager, || line(TraceKind::Interrupted, now, Some(priority), &label));
        tracing::debug!(process = %target, action = %label, tick = now, "interrupting process");

        state.processes[target.0].next = Some(self.me);
        state.processes[self.pid.0].flags.active = false;
        let thread = state.processes[target.0].thread;
        hand_off(&mut guard, self.me, thread);
        self.resumed(&guard)
    }

    /// Kill `target`, which must be queued or conditionally waiting. If it
    /// had started, it unwinds with [`SimError::Killed`] before this process
    /// continues.
    pub fn terminate(&self, target: ProcessId) -> SimResult<()> {
        let mut guard = self.begin("terminate")?;
        if target == self.pid {
            return check(&mut guard, Err(SimError::ActiveProcess(target)));
        }
        guard.processes[self.pid.0].flags.active = false;
        let result = terminate_process(&mut guard, self.me, target);
        guard.processes[self.pid.0].flags.active = true;
        result?;
        self.resumed(&guard)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn clock(&self, state: &KernelState) -> Tick {
        let manager = state.processes[self.pid.0].manager;
        state.managers[manager.0].horizon()
    }

    fn ensure_running(&self, state: &KernelState) -> SimResult<()> {
        if state.shutdown || state.processes[self.pid.0].flags.terminate {
            return Err(SimError::Killed);
        }
        if !state.threads[self.me.0].runnable || !state.processes[self.pid.0].flags.active {
            return Err(SimError::NotRunning(self.pid));
        }
        Ok(())
    }

    /// Lock and validate for a scheduling operation, auditing open
    /// conditional waits.
    fn begin(&self, op: &'static str) -> SimResult<MutexGuard<'_, KernelState>> {
        let guard = self.shared.state.lock();
        self.ensure_running(&guard)?;
        let process = &guard.processes[self.pid.0];
        if process.flags.cond_wait {
            tracing::warn!(
                process = %self.pid,
                action = %process.label,
                op,
                backtrace = %Backtrace::force_capture(),
                "scheduling call inside an open conditional wait"
            );
        }
        Ok(guard)
    }

    fn wait_at(
        &self,
        guard: &mut MutexGuard<'_, KernelState>,
        at: Tick,
        priority: Priority,
        source: &'static Location<'static>,
    ) -> SimResult<()> {
        let state: &mut KernelState = &mut **guard;
        let manager = state.processes[self.pid.0].manager;
        let queued = enqueue_resume(state, manager, self.pid, at, priority, source);
        check(state, queued)?;
        let label = state.processes[self.pid.0].label.clone();
        state.record(manager, || line(TraceKind::Wait, at, Some(priority), &label));
        tracing::debug!(process = %self.pid, action = %label, until = at, priority, "wait");
        self.suspend(guard)
    }

    /// Give control to the process's `next` link, or to its scheduler.
    fn suspend(&self, guard: &mut MutexGuard<'_, KernelState>) -> SimResult<()> {
        let state: &mut KernelState = &mut **guard;
        let process = &mut state.processes[self.pid.0];
        process.flags.active = false;
        let next = process.next.take();
        let manager = process.manager;
        let dest = next.unwrap_or(state.managers[manager.0].thread);
        hand_off(guard, self.me, dest);
        self.resumed(guard)
    }

    fn resumed(&self, state: &KernelState) -> SimResult<()> {
        if state.shutdown || state.processes[self.pid.0].flags.terminate {
            return Err(SimError::Killed);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduling helpers
// ---------------------------------------------------------------------------

pub(crate) fn validate_delay(delay: Tick) -> SimResult<()> {
    if delay < 0 {
        return Err(SimError::NegativeDelay { delay });
    }
    Ok(())
}

pub(crate) fn validate_priority(priority: Priority) -> SimResult<()> {
    if !(0..=PRIO_LAST_FIFO).contains(&priority) {
        return Err(SimError::InvalidPriority { priority });
    }
    Ok(())
}

/// Queue a resume of the suspended (or suspending) process `pid`.
fn enqueue_resume(
    state: &mut KernelState,
    manager: ManagerId,
    pid: ProcessId,
    at: Tick,
    priority: Priority,
    source: &'static Location<'static>,
) -> SimResult<()> {
    let label = &state.processes[pid.0].label;
    let mgr = &mut state.managers[manager.0];
    let horizon = mgr.horizon();
    let event = Event::new(
        at,
        priority,
        mgr.current,
        Arc::clone(&label.target),
        Arc::clone(&label.name),
        pid,
        EventKind::Resume,
        source,
    );
    mgr.fel
        .insert(event, InsertMode::for_priority(priority), horizon, &mgr.name)
        .map(drop)
}

/// Queue `action` on a fresh process at `at`, which must not lie behind the
/// scheduler's horizon.
pub(crate) fn schedule_new(
    shared: &Arc<Shared>,
    state: &mut KernelState,
    manager: ManagerId,
    at: Tick,
    priority: Priority,
    action: Action,
    source: &'static Location<'static>,
) -> SimResult<ProcessId> {
    check(state, validate_priority(priority))?;
    let mgr = state.manager(manager)?;
    let (now, horizon) = (mgr.current, mgr.horizon());
    if at < horizon {
        let err = SimError::TimeTravel {
            manager: mgr.name.clone(),
            at,
            now: horizon,
        };
        return check(state, Err(err));
    }

    let allocated = allocate(shared, state, manager, action);
    let pid = check(state, allocated)?;
    let label = state.processes[pid.0].label.clone();
    let event = Event::new(
        at,
        priority,
        now,
        Arc::clone(&label.target),
        Arc::clone(&label.name),
        pid,
        EventKind::Start,
        source,
    );
    let mgr = &mut state.managers[manager.0];
    if let Err(err) = mgr.fel.insert(event, InsertMode::for_priority(priority), horizon, &mgr.name) {
        recycle(state, pid);
        return check(state, Err(err));
    }
    state.record(manager, || line(TraceKind::Schedule, at, Some(priority), &label));
    tracing::debug!(process = %pid, action = %label, at, priority, "process scheduled");
    Ok(pid)
}

/// [`schedule_new`], unless an unstarted process with the same time,
/// priority, owner and action name is already queued on `manager`.
pub(crate) fn schedule_single(
    shared: &Arc<Shared>,
    state: &mut KernelState,
    manager: ManagerId,
    at: Tick,
    priority: Priority,
    action: Action,
    source: &'static Location<'static>,
) -> SimResult<Option<ProcessId>> {
    let duplicate = state
        .manager(manager)?
        .fel
        .has_duplicate_start(at, priority, action.target(), action.name());
    if duplicate {
        tracing::debug!(
            owner = action.target().name(),
            action = action.name(),
            at,
            priority,
            "duplicate process not scheduled"
        );
        return Ok(None);
    }
    schedule_new(shared, state, manager, at, priority, action, source).map(Some)
}
