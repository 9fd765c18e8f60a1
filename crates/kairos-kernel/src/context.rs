//! Explicit simulation context and kernel settings.

use std::time::Duration;

use crate::manager::ManagerId;
use crate::time::TimeScale;

/// What every component needs to know about the simulation it runs in.
///
/// Handed out by the kernel rather than kept in globals, so several
/// independent simulations can share a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimContext {
    pub scale: TimeScale,
    pub root: ManagerId,
}

/// Construction-time settings for a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    /// Name of the root scheduler.
    pub root_name: String,
    pub scale: TimeScale,
    pub real_time: bool,
    /// Simulated hours per wall-clock hour when pacing.
    pub real_time_factor: f64,
    /// Sleep increment of the real-time pacer.
    pub pacing_interval: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            root_name: "DefaultEventManager".to_owned(),
            scale: TimeScale::default(),
            real_time: false,
            real_time_factor: 1.0,
            pacing_interval: Duration::from_millis(20),
        }
    }
}

impl KernelConfig {
    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    pub fn with_scale(mut self, scale: TimeScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_real_time(mut self, factor: f64) -> Self {
        self.real_time = true;
        self.real_time_factor = factor;
        self
    }

    pub fn with_pacing_interval(mut self, interval: Duration) -> Self {
        self.pacing_interval = interval;
        self
    }
}
