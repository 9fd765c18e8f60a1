//! The hand-off protocol: exactly one kernel thread runnable at a time.
//!
//! Every kernel thread (the controller, one per scheduler, one per pooled
//! process) owns a [`ThreadSlot`] holding a `runnable` flag and its own
//! condition variable. All slots live inside the single kernel mutex. To
//! transfer control a thread marks the target runnable, signals it, clears
//! its own flag and blocks until someone sets it again. Waits always loop on
//! the flag, so spurious wake-ups are harmless.

use std::sync::Arc;

use parking_lot::{Condvar, MutexGuard};

use crate::manager::ManagerId;
use crate::process::ProcessId;
use crate::state::KernelState;

/// Index of a thread slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ThreadKey(pub(crate) usize);

/// The thread that owns the [`Kernel`](crate::Kernel) handle. It only joins
/// the hand-off chain while unwinding processes during `initialize`.
pub(crate) const CONTROLLER: ThreadKey = ThreadKey(0);

/// What a thread slot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadRole {
    Controller,
    Manager(ManagerId),
    Process(ProcessId),
}

#[derive(Debug)]
pub(crate) struct ThreadSlot {
    pub(crate) role: ThreadRole,
    pub(crate) runnable: bool,
    pub(crate) signal: Arc<Condvar>,
}

impl ThreadSlot {
    pub(crate) fn new(role: ThreadRole) -> Self {
        Self {
            role,
            runnable: false,
            signal: Arc::new(Condvar::new()),
        }
    }
}

/// Block until `me` is marked runnable.
pub(crate) fn park(guard: &mut MutexGuard<'_, KernelState>, me: ThreadKey) {
    let signal = Arc::clone(&guard.threads[me.0].signal);
    while !guard.threads[me.0].runnable {
        signal.wait(guard);
    }
}

/// Mark `target` runnable and signal it. The caller keeps running.
pub(crate) fn wake(state: &mut KernelState, target: ThreadKey) {
    let slot = &mut state.threads[target.0];
    slot.runnable = true;
    slot.signal.notify_one();
}

/// Give up control to `target` and block until control comes back.
///
/// Queued listener notices are delivered first, while this thread still
/// holds the runnable privilege.
pub(crate) fn switch_to(guard: &mut MutexGuard<'_, KernelState>, me: ThreadKey, target: ThreadKey) {
    debug_assert_ne!(me, target, "hand-off to self");
    crate::state::flush_notices(guard);
    tracing::trace!(from = me.0, to = target.0, "hand-off");
    guard.threads[me.0].runnable = false;
    wake(guard, target);
    park(guard, me);
}
