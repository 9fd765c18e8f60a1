//! Kairos Engine -- drives a discrete-event simulation built on
//! [`kairos_kernel`].
//!
//! The engine adds what a host application needs around the kernel:
//!
//! - [`SimConfig`]: serde-backed settings, loadable from JSON;
//! - [`Simulation`]: builds the kernel and scheduler tree from a config,
//!   opens the trace file and exposes run control by scheduler name;
//! - [`RunHistory`]: a listener keeping a serializable log of the run;
//! - [`logging::init`]: `tracing` subscriber bootstrap.

#![deny(unsafe_code)]

pub mod config;
pub mod history;
pub mod logging;
pub mod simulation;

pub use config::{ChildConfig, ConfigError, SimConfig, TraceConfig};
pub use history::{RunEvent, RunHistory};
pub use simulation::{RunReport, Simulation, TraceReport};

/// Re-export the kernel and trace crates for convenience.
pub use kairos_kernel;
pub use kairos_trace;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Everything needed to configure a simulation and write actions for it.
pub mod prelude {
    pub use crate::config::{SimConfig, TraceConfig};
    pub use crate::history::{RunEvent, RunHistory};
    pub use crate::simulation::{RunReport, Simulation, TraceReport};
    pub use kairos_kernel::prelude::*;
}
