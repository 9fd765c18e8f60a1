//! Kairos Kernel -- discrete-event scheduling with suspendable processes.
//!
//! The kernel advances an integer simulation clock by firing scheduled
//! events in a strict `(time, priority, tie-break)` order. Each event resumes
//! a *process*: a pooled OS thread running a user [`Action`]. Processes
//! behave like cooperative coroutines. They give up control only at
//! suspension points ([`ProcessContext::wait`], conditional waits,
//! interrupts) and exactly one kernel thread is ever runnable, so action
//! bodies never race with each other or with the scheduler.
//!
//! Schedulers ([`ManagerId`]) form a tree. Children advance to the time
//! their parent assigns and report back before the parent moves its own
//! clock, so a child can never run ahead of the root.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use kairos_kernel::prelude::*;
//!
//! let kernel = Kernel::new(KernelConfig::default(), TraceMode::Off).unwrap();
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! for (name, priority) in [("a", 5), ("b", 1), ("c", 5)] {
//!     let log = Arc::clone(&log);
//!     let owner = NamedOwner::shared(name);
//!     let action = Action::new(owner, "fire", move |_ctx| {
//!         log.lock().unwrap().push(name);
//!         Ok(())
//!     });
//!     kernel.schedule_process(ManagerId::ROOT, 0, priority, action).unwrap();
//! }
//!
//! kernel.run().unwrap();
//! // Lowest priority number first, then equal priorities most-recent first.
//! assert_eq!(*log.lock().unwrap(), vec!["b", "c", "a"]);
//! ```

#![deny(unsafe_code)]

pub mod action;
pub mod context;
pub mod control;
pub mod error;
pub mod event;
mod handoff;
pub mod inspect;
pub mod kernel;
pub mod listener;
pub mod manager;
pub mod owner;
pub mod process;
mod realtime;
mod state;
pub mod time;
pub mod trace;

pub use action::{Action, ActionLabel};
pub use context::{KernelConfig, SimContext};
pub use control::{RunState, StopReason};
pub use error::{ActionResult, SimError, SimResult};
pub use kernel::Kernel;
pub use manager::ManagerId;
pub use process::{ProcessContext, ProcessFlags, ProcessId};

/// Re-export the trace crate for convenience.
pub use kairos_trace;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for writing simulations.
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::context::{KernelConfig, SimContext};
    pub use crate::control::{RunState, StopReason};
    pub use crate::error::{ActionResult, SimError, SimResult};
    pub use crate::inspect::EventRow;
    pub use crate::kernel::Kernel;
    pub use crate::listener::{ActionFailure, SimulationListener, TracingListener};
    pub use crate::manager::ManagerId;
    pub use crate::owner::{NamedOwner, Owner, OwnerRef};
    pub use crate::process::{ProcessContext, ProcessFlags, ProcessId};
    pub use crate::time::{
        Priority, Tick, TimeScale, MAX_TICK, PRIO_DEFAULT, PRIO_HIGHEST, PRIO_LAST_FIFO, PRIO_LAST_LIFO,
        PRIO_LOWEST,
    };
    pub use crate::trace::{TraceMode, VerifyStats};
}
