//! Serializable simulation settings.
//!
//! A [`SimConfig`] describes everything needed to build a
//! [`Simulation`](crate::Simulation): the time scale, real-time pacing, the
//! scheduler tree and where the event trace goes. It round-trips through JSON
//! so runs can be reproduced from a checked-in file.
//!
//! ```
//! use kairos_engine::config::{SimConfig, TraceConfig};
//!
//! let config = SimConfig::from_json(r#"{
//!     "ticks_per_hour": 3600.0,
//!     "children": [{ "name": "line" }, { "name": "cell", "parent": "line" }],
//!     "trace": { "mode": "record", "path": "run.trc" }
//! }"#).unwrap();
//!
//! assert_eq!(config.root_name, "DefaultEventManager");
//! assert_eq!(config.children.len(), 2);
//! assert!(matches!(config.trace, TraceConfig::Record { .. }));
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use kairos_kernel::time::TimeScale;
use kairos_kernel::KernelConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A configuration that parses but cannot describe a valid simulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("ticks_per_hour must be positive and finite, got {0}")]
    InvalidScale(f64),

    #[error("real_time_factor must be positive and finite, got {0}")]
    InvalidRealTimeFactor(f64),

    #[error("pacing_interval_ms must be at least 1")]
    InvalidPacingInterval,

    #[error("scheduler name '{0}' is used more than once")]
    DuplicateScheduler(String),

    /// A child names a parent that is neither the root nor an earlier child.
    #[error("scheduler '{child}' names unknown parent '{parent}'")]
    UnknownParent { child: String, parent: String },
}

// ---------------------------------------------------------------------------
// TraceConfig / ChildConfig
// ---------------------------------------------------------------------------

/// Where the event trace goes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TraceConfig {
    #[default]
    Off,
    /// Write every record to `path`, replacing any existing file.
    Record { path: PathBuf },
    /// Check every record against the trace previously recorded at `path`.
    Verify { path: PathBuf },
    /// Keep records in memory.
    Capture,
}

/// A child scheduler created with the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildConfig {
    pub name: String,
    /// Name of the parent scheduler; the root when absent. Parents must be
    /// listed before their children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Settings for building a [`Simulation`](crate::Simulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub root_name: String,
    /// Ticks per simulated hour.
    pub ticks_per_hour: f64,
    pub real_time: bool,
    /// Simulated hours per wall-clock hour while pacing.
    pub real_time_factor: f64,
    pub pacing_interval_ms: u64,
    pub trace: TraceConfig,
    pub children: Vec<ChildConfig>,
    /// Attach a listener that logs run progress through `tracing`.
    pub log_progress: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            root_name: "DefaultEventManager".to_owned(),
            ticks_per_hour: 1_000_000.0,
            real_time: false,
            real_time_factor: 1.0,
            pacing_interval_ms: 20,
            trace: TraceConfig::Off,
            children: Vec::new(),
            log_progress: true,
        }
    }
}

impl SimConfig {
    /// Parse and validate a JSON document. Missing fields take their
    /// defaults.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text).context("failed to parse simulation config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read simulation config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("invalid simulation config {}", path.display()))
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize simulation config")
    }

    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    pub fn with_ticks_per_hour(mut self, ticks_per_hour: f64) -> Self {
        self.ticks_per_hour = ticks_per_hour;
        self
    }

    pub fn with_real_time(mut self, factor: f64) -> Self {
        self.real_time = true;
        self.real_time_factor = factor;
        self
    }

    pub fn with_pacing_interval_ms(mut self, millis: u64) -> Self {
        self.pacing_interval_ms = millis;
        self
    }

    pub fn with_trace(mut self, trace: TraceConfig) -> Self {
        self.trace = trace;
        self
    }

    /// Add a child scheduler under `parent` (the root when `None`).
    pub fn with_child(mut self, name: impl Into<String>, parent: Option<&str>) -> Self {
        self.children.push(ChildConfig {
            name: name.into(),
            parent: parent.map(str::to_owned),
        });
        self
    }

    pub fn with_log_progress(mut self, enabled: bool) -> Self {
        self.log_progress = enabled;
        self
    }

    /// Check value ranges and the scheduler tree.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ticks_per_hour > 0.0 && self.ticks_per_hour.is_finite()) {
            return Err(ConfigError::InvalidScale(self.ticks_per_hour));
        }
        if !(self.real_time_factor > 0.0 && self.real_time_factor.is_finite()) {
            return Err(ConfigError::InvalidRealTimeFactor(self.real_time_factor));
        }
        if self.pacing_interval_ms == 0 {
            return Err(ConfigError::InvalidPacingInterval);
        }

        let mut known: HashSet<&str> = HashSet::from([self.root_name.as_str()]);
        for child in &self.children {
            if let Some(parent) = &child.parent {
                if !known.contains(parent.as_str()) {
                    return Err(ConfigError::UnknownParent {
                        child: child.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
            if !known.insert(child.name.as_str()) {
                return Err(ConfigError::DuplicateScheduler(child.name.clone()));
            }
        }
        Ok(())
    }

    pub fn scale(&self) -> TimeScale {
        TimeScale::new(self.ticks_per_hour)
    }

    /// The kernel settings this config implies. Call [`validate`](Self::validate)
    /// first; an invalid scale panics here.
    pub fn kernel_config(&self) -> KernelConfig {
        let mut config = KernelConfig::default()
            .with_root_name(self.root_name.clone())
            .with_scale(self.scale())
            .with_pacing_interval(Duration::from_millis(self.pacing_interval_ms));
        if self.real_time {
            config = config.with_real_time(self.real_time_factor);
        } else {
            config.real_time_factor = self.real_time_factor;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(SimConfig::from_json("{}").unwrap(), SimConfig::default());
    }

    #[test]
    fn json_round_trip_keeps_tree_and_trace() {
        let config = SimConfig::default()
            .with_ticks_per_hour(60.0)
            .with_child("line", None)
            .with_child("cell", Some("line"))
            .with_trace(TraceConfig::Verify { path: "golden.trc".into() });
        let text = config.to_json().unwrap();
        assert!(text.contains("\"mode\": \"verify\""));
        assert_eq!(SimConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn children_must_follow_their_parent() {
        let config = SimConfig::default().with_child("cell", Some("line")).with_child("line", None);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownParent {
                child: "cell".into(),
                parent: "line".into()
            })
        );
    }

    #[test]
    fn child_cannot_reuse_the_root_name() {
        let config = SimConfig::default().with_child("DefaultEventManager", None);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateScheduler(_))));
    }

    #[test]
    fn bad_ranges_are_rejected() {
        assert!(SimConfig::from_json(r#"{ "ticks_per_hour": 0.0 }"#).is_err());
        assert!(SimConfig::from_json(r#"{ "real_time_factor": -1.0 }"#).is_err());
        assert!(SimConfig::from_json(r#"{ "pacing_interval_ms": 0 }"#).is_err());
    }

    #[test]
    fn kernel_config_carries_pacing() {
        let kernel = SimConfig::default()
            .with_real_time(120.0)
            .with_pacing_interval_ms(5)
            .kernel_config();
        assert!(kernel.real_time);
        assert_eq!(kernel.real_time_factor, 120.0);
        assert_eq!(kernel.pacing_interval, Duration::from_millis(5));
    }

    #[test]
    fn from_path_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = SimConfig::from_path(&path).unwrap_err();
        assert!(format!("{err:#}").contains("sim.json"));
    }

    proptest! {
        #[test]
        fn any_chain_of_children_validates(depth in 1usize..12, fan in 1usize..4) {
            let mut config = SimConfig::default();
            let mut parent: Option<String> = None;
            for level in 0..depth {
                for branch in 0..fan {
                    config = config.with_child(format!("s{level}-{branch}"), parent.as_deref());
                }
                parent = Some(format!("s{level}-0"));
            }
            prop_assert_eq!(config.validate(), Ok(()));
            let text = config.to_json().unwrap();
            prop_assert_eq!(SimConfig::from_json(&text).unwrap(), config);
        }
    }
}
