//! Schedulers (event managers) and their main loop.
//!
//! Schedulers form a tree. Each runs on its own thread and owns a future-event
//! list and a conditional-wait list. The root paces the run and decides
//! time-based stops; children only ever advance to the target time their
//! parent assigns, one child at a time, and report back when they reach it.
//! Any scheduler parks on a pause or a pending stop, so a single-event step
//! stops inside a child as well.
//!
//! One loop iteration, in order:
//!
//! 1. take any pending stop and park until resumed;
//! 2. fire the next event if it is due at the current tick;
//! 3. let children catch up with work due at the current tick;
//! 4. evaluate the conditional-wait chain once per quiescent instant;
//! 5. report to the parent once the target time is reached;
//! 6. commit to the next event time in the subtree, advance children there,
//!    then move the own clock there.
//!
//! A child is quiescent at its target when it reports, so nothing it wakes
//! can schedule behind the time its ancestors have committed to.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use kairos_trace::{TraceKind, TraceLine};
use parking_lot::MutexGuard;

use crate::control::{RunState, StopReason};
use crate::error::{SimError, SimResult};
use crate::event::FutureEventList;
use crate::handoff::{park, switch_to, ThreadKey, ThreadRole, ThreadSlot};
use crate::listener::Notice;
use crate::process::{hand_off, ProcessId};
use crate::state::{flush_notices, KernelState, Shared};
use crate::time::{Tick, MAX_TICK};

/// Handle to a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagerId(pub(crate) usize);

impl ManagerId {
    /// The root scheduler, created with the kernel.
    pub const ROOT: ManagerId = ManagerId(0);

    pub fn index(self) -> usize {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

pub(crate) struct ManagerState {
    pub(crate) name: String,
    pub(crate) parent: Option<ManagerId>,
    pub(crate) children: Vec<ManagerId>,
    pub(crate) current: Tick,
    /// Ceiling assigned by the parent; `MAX_TICK` for the root.
    pub(crate) target: Tick,
    /// Tick the clock moves to once the children currently advancing have
    /// reported.
    pub(crate) committed: Tick,
    pub(crate) fel: FutureEventList,
    /// Conditionally waiting processes, in the order they started waiting.
    pub(crate) cond_wait: Vec<ProcessId>,
    /// Something may have changed since the conditions were last evaluated
    /// at this instant.
    pub(crate) conds_pending: bool,
    pub(crate) active_child_count: usize,
    pub(crate) pending_children: VecDeque<ManagerId>,
    pub(crate) thread: ThreadKey,
}

impl ManagerState {
    pub(crate) fn reset(&mut self) {
        self.current = 0;
        self.target = if self.parent.is_none() { MAX_TICK } else { 0 };
        self.committed = 0;
        self.fel = FutureEventList::new();
        self.cond_wait.clear();
        self.conds_pending = false;
        self.active_child_count = 0;
        self.pending_children.clear();
    }

    /// The earliest tick new work may be queued at. Ahead of `current`
    /// while children advance toward a committed time.
    pub(crate) fn horizon(&self) -> Tick {
        self.current.max(self.committed)
    }
}

/// Create a scheduler and its parked thread.
pub(crate) fn spawn_manager(
    shared: &Arc<Shared>,
    state: &mut KernelState,
    name: String,
    parent: Option<ManagerId>,
) -> SimResult<ManagerId> {
    if state.managers.iter().any(|m| m.name == name) {
        return Err(SimError::DuplicateManager(name));
    }
    let current = match parent {
        Some(parent) => state.manager(parent)?.horizon(),
        None => 0,
    };
    let id = ManagerId(state.managers.len());
    let key = ThreadKey(state.threads.len());
    let worker = Arc::clone(shared);
    let handle = thread::Builder::new()
        .name(format!("kairos-mgr-{name}"))
        .spawn(move || manager_main(worker, id, key))
        .map_err(|e| SimError::Spawn(e.to_string()))?;

    state.threads.push(ThreadSlot::new(ThreadRole::Manager(id)));
    state.managers.push(ManagerState {
        name,
        parent,
        children: Vec::new(),
        current,
        target: if parent.is_none() { MAX_TICK } else { current },
        committed: current,
        fel: FutureEventList::new(),
        cond_wait: Vec::new(),
        conds_pending: false,
        active_child_count: 0,
        pending_children: VecDeque::new(),
        thread: key,
    });
    if let Some(parent) = parent {
        state.managers[parent.0].children.push(id);
    }
    shared.handles.lock().push((key, handle));
    tracing::debug!(manager = %state.managers[id.0].name, ?parent, "scheduler created");
    Ok(id)
}

/// Earliest pending event in the subtree rooted at `id`.
pub(crate) fn subtree_earliest(state: &KernelState, id: ManagerId) -> Option<Tick> {
    let mgr = &state.managers[id.0];
    mgr.children
        .iter()
        .filter_map(|&child| subtree_earliest(state, child))
        .chain(mgr.fel.next_time())
        .min()
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn manager_main(shared: Arc<Shared>, id: ManagerId, me: ThreadKey) {
    let mut guard = shared.state.lock();
    park(&mut guard, me);
    loop {
        if guard.shutdown {
            break;
        }
        let (current, target, is_root) = {
            let mgr = &guard.managers[id.0];
            (mgr.current, mgr.target, mgr.parent.is_none())
        };

        if is_root {
            if let Some(reason) = guard.control.take_stop(current) {
                stop(&shared, &mut guard, id, me, reason);
                continue;
            }
        } else if guard.control.failure.is_some() {
            report_to_parent(&mut guard, id, me);
            continue;
        } else if let Some(reason) = guard.control.take_request() {
            stop(&shared, &mut guard, id, me, reason);
            continue;
        }

        if guard.managers[id.0].fel.next_time() == Some(current) {
            fire_next(&mut guard, id, me);
            continue;
        }

        if children_due(&guard, id, current) {
            advance_children(&mut guard, id, me, current);
            continue;
        }

        let mgr = &guard.managers[id.0];
        if mgr.conds_pending && !mgr.cond_wait.is_empty() {
            evaluate_conditions(&mut guard, id, me);
            continue;
        }

        if current == target {
            if is_root {
                stop(&shared, &mut guard, id, me, StopReason::EndOfTime);
            } else {
                report_to_parent(&mut guard, id, me);
            }
            continue;
        }

        let Some(next) = next_time(&guard, id) else {
            stop(&shared, &mut guard, id, me, StopReason::Idle);
            continue;
        };
        if is_root && guard.pacer.is_enabled() && !pace(&mut guard, id, me, next) {
            continue;
        }
        let generation = guard.generation;
        guard.managers[id.0].committed = next;
        advance_children(&mut guard, id, me, next);
        if guard.shutdown {
            break;
        }
        if guard.generation != generation {
            // Initialized while a child held a stop; the commitment is void.
            continue;
        }
        if let Err(err) = check_advance(&guard.managers[id.0], next) {
            guard.fail(&err);
            continue;
        }

        let state: &mut KernelState = &mut guard;
        let mgr = &mut state.managers[id.0];
        mgr.current = next;
        mgr.conds_pending = true;
        tracing::trace!(manager = %mgr.name, tick = next, "clock advanced");
        if is_root {
            state.notify(Notice::TimeAdvanced(next));
            if state.control.state == RunState::RunUntilNextEventTime {
                state.control.request_stop(StopReason::ReachedNextEventTime);
            }
        }
    }
    tracing::trace!(manager = id.0, "scheduler thread exiting");
}

/// The clock may only move forward, and never past an event of its own.
fn check_advance(mgr: &ManagerState, next: Tick) -> SimResult<()> {
    if next < mgr.current {
        return Err(SimError::TimeTravel {
            manager: mgr.name.clone(),
            at: next,
            now: mgr.current,
        });
    }
    match mgr.fel.next_time() {
        Some(at) if at < next => Err(SimError::TimeTravel {
            manager: mgr.name.clone(),
            at,
            now: next,
        }),
        _ => Ok(()),
    }
}

/// Whether some scheduler below `id` has work at or before `now`.
fn children_due(state: &KernelState, id: ManagerId, now: Tick) -> bool {
    state.managers[id.0]
        .children
        .iter()
        .any(|&child| subtree_earliest(state, child).is_some_and(|t| t <= now))
}

/// Where the clock goes next: the earliest event in the subtree, bounded by
/// the target time and, on the root, by a run-until limit. `None` means the
/// root has nothing left to do.
fn next_time(state: &KernelState, id: ManagerId) -> Option<Tick> {
    let mgr = &state.managers[id.0];
    let earliest = subtree_earliest(state, id);
    let limit = if mgr.parent.is_none() {
        state.control.time_limit()
    } else {
        Some(mgr.target)
    };
    let next = match (earliest, limit) {
        (Some(e), Some(l)) => e.min(l),
        (Some(e), None) => e,
        (None, Some(l)) => l,
        (None, None) => return None,
    };
    Some(next.min(mgr.target))
}

fn fire_next(guard: &mut MutexGuard<'_, KernelState>, id: ManagerId, me: ThreadKey) {
    let state: &mut KernelState = &mut **guard;
    let Some(event) = state.managers[id.0].fel.pop_next() else {
        return;
    };
    state.managers[id.0].conds_pending = true;
    state.control.events_fired += 1;
    if state.control.state == RunState::RunOneEvent {
        state.control.request_stop(StopReason::StepComplete);
    }
    state.record(id, || {
        TraceLine::new(
            TraceKind::Event,
            event.time(),
            Some(event.priority()),
            event.caller().name(),
            event.caller().display_name(),
            event.action(),
        )
    });
    tracing::debug!(
        manager = %state.managers[id.0].name,
        tick = event.time(),
        priority = event.priority(),
        owner = event.caller().name(),
        action = event.action(),
        "event fired"
    );
    let thread = state.processes[event.process().0].thread;
    hand_off(guard, me, thread);
}

/// Hand control down the chain of conditionally waiting processes. Each one
/// re-tests its condition and passes control to the next; the last returns
/// it here.
fn evaluate_conditions(guard: &mut MutexGuard<'_, KernelState>, id: ManagerId, me: ThreadKey) {
    let state: &mut KernelState = &mut **guard;
    let mgr = &mut state.managers[id.0];
    mgr.conds_pending = false;
    let chain = mgr.cond_wait.clone();
    let Some(&first) = chain.first() else {
        return;
    };
    tracing::trace!(manager = %mgr.name, waiting = chain.len(), "evaluating conditions");
    for pair in chain.windows(2) {
        let next_thread = state.processes[pair[1].0].thread;
        state.processes[pair[0].0].next = Some(next_thread);
    }
    for pid in &chain {
        state.processes[pid.0].cond_chained = true;
    }
    if let Some(last) = chain.last() {
        state.processes[last.0].next = None;
    }
    let thread = state.processes[first.0].thread;
    hand_off(guard, me, thread);
}

/// Hand control to each child in turn; the last one to reach `next` wakes
/// this scheduler again.
fn advance_children(guard: &mut MutexGuard<'_, KernelState>, id: ManagerId, me: ThreadKey, next: Tick) {
    let state: &mut KernelState = &mut **guard;
    let children = state.managers[id.0].children.clone();
    let Some((&first, rest)) = children.split_first() else {
        return;
    };
    for child in &children {
        state.managers[child.0].target = next;
    }
    let mgr = &mut state.managers[id.0];
    mgr.active_child_count = children.len();
    mgr.pending_children = rest.iter().copied().collect();
    let thread = state.managers[first.0].thread;
    switch_to(guard, me, thread);
}

fn report_to_parent(guard: &mut MutexGuard<'_, KernelState>, id: ManagerId, me: ThreadKey) {
    let state: &mut KernelState = &mut **guard;
    let Some(parent) = state.managers[id.0].parent else {
        return;
    };
    let mgr = &mut state.managers[parent.0];
    mgr.active_child_count = mgr.active_child_count.saturating_sub(1);
    let dest = match mgr.pending_children.pop_front() {
        Some(sibling) => state.managers[sibling.0].thread,
        None => mgr.thread,
    };
    tracing::trace!(manager = id.0, tick = state.managers[id.0].current, "caught up with parent");
    switch_to(guard, me, dest);
}

/// Sleep until wall-clock time allows the root clock to reach `next`.
/// Returns `false` if a stop was requested meanwhile.
fn pace(guard: &mut MutexGuard<'_, KernelState>, id: ManagerId, me: ThreadKey, next: Tick) -> bool {
    let signal = Arc::clone(&guard.threads[me.0].signal);
    let mut reported = guard.managers[id.0].current;
    loop {
        let state: &mut KernelState = &mut **guard;
        if state.shutdown || state.control.pause_requested || state.control.pending_stop.is_some() {
            return false;
        }
        let current = state.managers[id.0].current;
        let allowed = state.pacer.allowed(&state.scale, current, Instant::now());
        if allowed >= next {
            return true;
        }
        if allowed > reported {
            reported = allowed;
            state.notify(Notice::TimeAdvanced(allowed));
            flush_notices(guard);
        }
        let interval = guard.pacer.interval();
        signal.wait_for(guard, interval);
    }
}

/// Stop the run and park this scheduler until it is resumed. Listeners hear
/// about the stop once the kernel already counts as paused.
fn stop(shared: &Shared, guard: &mut MutexGuard<'_, KernelState>, id: ManagerId, me: ThreadKey, reason: StopReason) {
    let state: &mut KernelState = &mut **guard;
    let tick = state.managers[id.0].current;
    if let Err(e) = state.trace.flush() {
        state.fail(&SimError::Trace(e));
    }
    state.control.state = RunState::Stopped;
    state.control.last_stop = Some(reason);
    state.stopped_thread = Some(me);
    state.pacer.reset();
    state.threads[me.0].runnable = false;
    tracing::info!(%reason, tick, manager = %state.managers[id.0].name, events = state.control.events_fired, "run stopped");
    state.notify(Notice::Stopped(reason, tick));
    state.notify(Notice::StateChanged(RunState::Stopped));
    flush_notices(guard);

    shared.stopped.notify_all();
    park(guard, me);
}
