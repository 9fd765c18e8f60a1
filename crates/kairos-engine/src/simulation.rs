//! The driver facade: builds a kernel from a [`SimConfig`] and runs it.
//!
//! # Example
//!
//! ```
//! use kairos_engine::prelude::*;
//!
//! let config = SimConfig::default().with_ticks_per_hour(60.0).with_child("line", None);
//! let sim = Simulation::new(config).unwrap();
//! let line = sim.manager("line").unwrap();
//!
//! let press = NamedOwner::shared("Press");
//! sim.schedule_at_hours(line, 1.5, PRIO_DEFAULT, Action::new(press, "stamp", |ctx| {
//!     ctx.wait(30, PRIO_DEFAULT)?;
//!     Ok(())
//! }))
//! .unwrap();
//!
//! assert_eq!(sim.run().unwrap(), StopReason::Idle);
//! let report = sim.report().unwrap();
//! assert_eq!(report.tick, 120);
//! assert_eq!(report.hours, 2.0);
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kairos_kernel::listener::{SimulationListener, TracingListener};
use kairos_kernel::prelude::*;
use kairos_kernel::time::deadline;
use kairos_trace::{TraceVerifier, TraceWriter};
use serde::{Deserialize, Serialize};

use crate::config::{SimConfig, TraceConfig};
use crate::history::RunHistory;

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Where a simulation stands, for logs and regression fixtures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Why the run last stopped; `None` if it never ran.
    pub last_stop: Option<String>,
    pub tick: Tick,
    pub hours: f64,
    pub events_fired: u64,
    /// The fatal error that ended the run, if any.
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceReport>,
}

/// Trace-sink counters at the time of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TraceReport {
    Recorded {
        records: u64,
        /// BLAKE3 hex digest of the written records.
        digest: String,
    },
    Verified {
        matched: u64,
        mismatched: u64,
        /// Recorded blocks this run has not produced (yet).
        unmatched: usize,
    },
    Captured {
        records: usize,
    },
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// A kernel plus the scheduler names and run history of one simulation.
pub struct Simulation {
    kernel: Kernel,
    config: SimConfig,
    managers: BTreeMap<String, ManagerId>,
    history: Arc<RunHistory>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("root", &self.config.root_name)
            .field("managers", &self.managers.len())
            .field("kernel", &self.kernel)
            .finish()
    }
}

impl Simulation {
    /// Validate `config`, open the trace sink and build the scheduler tree.
    pub fn new(config: SimConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid simulation config")?;
        let trace = open_trace(&config.trace)?;
        let kernel = Kernel::new(config.kernel_config(), trace).context("failed to start kernel")?;

        let mut managers = BTreeMap::new();
        managers.insert(config.root_name.clone(), ManagerId::ROOT);
        for child in &config.children {
            let parent = match &child.parent {
                Some(name) => managers
                    .get(name)
                    .copied()
                    .with_context(|| format!("scheduler '{}' names unknown parent '{name}'", child.name))?,
                None => ManagerId::ROOT,
            };
            let id = kernel
                .add_manager(parent, child.name.clone())
                .with_context(|| format!("failed to create scheduler '{}'", child.name))?;
            managers.insert(child.name.clone(), id);
        }

        let history = RunHistory::new();
        kernel.add_listener(history.clone());
        if config.log_progress {
            kernel.add_listener(Arc::new(TracingListener));
        }
        tracing::info!(
            root = %config.root_name,
            schedulers = managers.len(),
            trace = ?config.trace,
            "simulation built"
        );
        Ok(Self {
            kernel,
            config,
            managers,
            history,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::new(SimConfig::from_path(path)?)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn scale(&self) -> TimeScale {
        self.kernel.context().scale
    }

    pub fn history(&self) -> &Arc<RunHistory> {
        &self.history
    }

    pub fn add_listener(&self, listener: Arc<dyn SimulationListener>) {
        self.kernel.add_listener(listener);
    }

    // -----------------------------------------------------------------------
    // Schedulers
    // -----------------------------------------------------------------------

    pub fn root(&self) -> ManagerId {
        ManagerId::ROOT
    }

    /// Look up a scheduler by name.
    pub fn manager(&self, name: &str) -> anyhow::Result<ManagerId> {
        self.managers
            .get(name)
            .copied()
            .with_context(|| format!("unknown scheduler '{name}'"))
    }

    /// Scheduler names, sorted.
    pub fn manager_names(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    /// Create a child scheduler under the scheduler named `parent`.
    pub fn add_manager(&mut self, parent: &str, name: impl Into<String>) -> anyhow::Result<ManagerId> {
        let name = name.into();
        let parent_id = self.manager(parent)?;
        let id = self
            .kernel
            .add_manager(parent_id, name.clone())
            .with_context(|| format!("failed to create scheduler '{name}' under '{parent}'"))?;
        self.managers.insert(name, id);
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    #[track_caller]
    pub fn schedule(&self, manager: ManagerId, delay: Tick, priority: Priority, action: Action) -> SimResult<ProcessId> {
        self.kernel.schedule_process(manager, delay, priority, action)
    }

    /// Schedule `action` at an absolute time in simulated hours.
    #[track_caller]
    pub fn schedule_at_hours(
        &self,
        manager: ManagerId,
        hours: f64,
        priority: Priority,
        action: Action,
    ) -> SimResult<ProcessId> {
        let at = self.scale().ticks(hours);
        self.kernel.schedule_process_at(manager, at, priority, action)
    }

    #[track_caller]
    pub fn schedule_single(&self, manager: ManagerId, delay: Tick, priority: Priority, action: Action) -> SimResult<bool> {
        self.kernel.schedule_single_process(manager, delay, priority, action)
    }

    pub fn terminate(&mut self, process: ProcessId) -> SimResult<()> {
        self.kernel.terminate(process)
    }

    // -----------------------------------------------------------------------
    // Run control
    // -----------------------------------------------------------------------

    pub fn run(&self) -> SimResult<StopReason> {
        self.kernel.run()
    }

    pub fn run_until(&self, tick: Tick) -> SimResult<StopReason> {
        self.kernel.run_until(tick)
    }

    /// Run for `hours` of simulated time from the current root time.
    pub fn run_for_hours(&self, hours: f64) -> SimResult<StopReason> {
        let until = deadline(self.kernel.current_time(), self.scale().ticks(hours));
        self.kernel.run_until(until)
    }

    pub fn step_event(&self) -> SimResult<StopReason> {
        self.kernel.step_event()
    }

    pub fn step_to_next_time(&self) -> SimResult<StopReason> {
        self.kernel.step_to_next_time()
    }

    /// Start running without waiting; pair with [`pause`](Self::pause) and
    /// [`wait_for_pause`](Self::wait_for_pause).
    pub fn start(&self, mode: RunState) -> SimResult<()> {
        self.kernel.start(mode)
    }

    pub fn pause(&self) {
        self.kernel.pause();
    }

    pub fn wait_for_pause(&self) -> StopReason {
        self.kernel.wait_for_pause()
    }

    pub fn set_real_time(&mut self, enabled: bool, factor: f64) {
        self.config.real_time = enabled;
        self.config.real_time_factor = factor;
        self.kernel.set_real_time(enabled, factor);
    }

    /// Unwind all processes and reset every clock to zero.
    pub fn initialize(&mut self) -> SimResult<()> {
        self.kernel.initialize()
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    pub fn current_time(&self) -> Tick {
        self.kernel.current_time()
    }

    pub fn current_hours(&self) -> f64 {
        self.kernel.current_hours()
    }

    /// Pending events of the scheduler named `manager`, in firing order.
    pub fn inspect(&self, manager: &str) -> anyhow::Result<Vec<EventRow>> {
        let id = self.manager(manager)?;
        Ok(self.kernel.inspect(id)?)
    }

    pub fn report(&self) -> anyhow::Result<RunReport> {
        let trace = match &self.config.trace {
            TraceConfig::Off => None,
            TraceConfig::Record { .. } => self.kernel.trace_summary().map(|s| TraceReport::Recorded {
                records: s.records,
                digest: s.digest,
            }),
            TraceConfig::Verify { .. } => {
                let unmatched = self
                    .kernel
                    .unmatched_trace_records()
                    .context("failed to read the recorded trace")?
                    .unwrap_or_default();
                self.kernel.verify_stats().map(|s| TraceReport::Verified {
                    matched: s.matched,
                    mismatched: s.mismatched,
                    unmatched,
                })
            }
            TraceConfig::Capture => Some(TraceReport::Captured {
                records: self.kernel.captured_trace().len(),
            }),
        };
        Ok(RunReport {
            last_stop: self.kernel.last_stop().map(|r| r.to_string()),
            tick: self.kernel.current_time(),
            hours: self.kernel.current_hours(),
            events_fired: self.kernel.events_fired(),
            failure: self.kernel.failure(),
            trace,
        })
    }

    /// Stop the kernel, flush the trace and return the final report.
    pub fn finish(mut self) -> anyhow::Result<RunReport> {
        if self.kernel.run_state().is_running() {
            self.kernel.pause();
            self.kernel.wait_for_pause();
        }
        self.kernel.flush_trace().context("failed to flush trace")?;
        let report = self.report()?;
        self.kernel.shutdown();
        tracing::info!(tick = report.tick, events = report.events_fired, "simulation finished");
        Ok(report)
    }
}

fn open_trace(config: &TraceConfig) -> anyhow::Result<TraceMode> {
    Ok(match config {
        TraceConfig::Off => TraceMode::Off,
        TraceConfig::Record { path } => TraceMode::Record(
            TraceWriter::create(path).with_context(|| format!("failed to create trace {}", path.display()))?,
        ),
        TraceConfig::Verify { path } => TraceMode::Verify(
            TraceVerifier::open(path).with_context(|| format!("failed to open trace {}", path.display()))?,
        ),
        TraceConfig::Capture => TraceMode::Capture,
    })
}
