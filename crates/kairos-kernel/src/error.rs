//! Kernel error taxonomy.
//!
//! - **Fatal** errors are invariant violations by calling code (time travel,
//!   negative delay, touching the active process, unknown process). The
//!   kernel records them at the point of detection and stops the run for
//!   good, whatever the caller does with the returned error.
//! - [`SimError::Killed`] is controlled termination: it unwinds one process
//!   and is turned into pool recycling at the process boundary.
//! - Everything else is an ordinary error returned to the caller.

use crate::process::ProcessId;
use crate::time::{Priority, Tick};

pub type SimResult<T> = Result<T, SimError>;

/// Result type of an action body. Any error type converts via `?`; kernel
/// errors are recognised again at the process boundary by downcasting.
pub type ActionResult = anyhow::Result<()>;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// An event was scheduled before the manager's current time.
    #[error("time travel: event at tick {at} scheduled on '{manager}' whose clock is at {now}")]
    TimeTravel {
        manager: String,
        at: Tick,
        now: Tick,
    },

    #[error("negative scheduling delay {delay}")]
    NegativeDelay { delay: Tick },

    #[error("priority {priority} outside the schedulable range")]
    InvalidPriority { priority: Priority },

    /// Interrupt/terminate aimed at a process that currently holds control.
    #[error("process {0} is active and cannot be interrupted or terminated")]
    ActiveProcess(ProcessId),

    /// Interrupt/terminate aimed at a process found in no queue.
    #[error("process {0} is not queued on any scheduler")]
    UnknownProcess(ProcessId),

    /// A worker thread could not be spawned.
    #[error("failed to spawn kernel thread: {0}")]
    Spawn(String),

    /// The trace sink failed.
    #[error("trace sink failed: {0}")]
    Trace(#[from] kairos_trace::TraceError),

    /// The run already failed fatally and can no longer be resumed.
    #[error("run failed: {0}")]
    RunFailed(String),

    /// The calling process was terminated; unwind to the process boundary.
    #[error("process killed")]
    Killed,

    /// A controller-only operation was attempted while the run is active.
    #[error("operation requires the simulation to be paused")]
    NotPaused,

    /// A process operation was invoked by a thread that does not hold control.
    #[error("process {0} does not hold control")]
    NotRunning(ProcessId),

    #[error("unknown scheduler {0}")]
    UnknownManager(usize),

    #[error("a scheduler named '{0}' already exists")]
    DuplicateManager(String),
}

impl SimError {
    /// Whether this error is an invariant violation that ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SimError::TimeTravel { .. }
                | SimError::NegativeDelay { .. }
                | SimError::InvalidPriority { .. }
                | SimError::ActiveProcess(_)
                | SimError::UnknownProcess(_)
                | SimError::Spawn(_)
                | SimError::Trace(_)
                | SimError::RunFailed(_)
        )
    }

    pub fn is_killed(&self) -> bool {
        matches!(self, SimError::Killed)
    }
}
