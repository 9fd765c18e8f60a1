//! Kernel side of the event trace: turns scheduling transitions into
//! [`TraceLine`]s and routes completed records to the configured sink.

use kairos_trace::{
    EventTraceRecord, TraceError, TraceKind, TraceLine, TraceMismatch, TraceSummary, TraceVerifier,
    TraceWriter, Verdict,
};

use crate::action::ActionLabel;
use crate::time::{Priority, Tick};

/// Where completed trace records go.
#[derive(Debug, Default)]
pub enum TraceMode {
    #[default]
    Off,
    /// Append every record to a trace file.
    Record(TraceWriter),
    /// Match every record against a recorded trace.
    Verify(TraceVerifier),
    /// Keep records in memory; see [`Kernel::captured_trace`](crate::Kernel::captured_trace).
    Capture,
}

impl TraceMode {
    pub fn is_off(&self) -> bool {
        matches!(self, TraceMode::Off)
    }
}

/// Verify-mode counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifyStats {
    pub matched: u64,
    pub mismatched: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TraceState {
    mode: TraceMode,
    open: EventTraceRecord,
    captured: Vec<EventTraceRecord>,
    /// Set while `initialize` unwinds processes; those transitions are not
    /// part of any run.
    pub(crate) suppressed: bool,
}

impl TraceState {
    pub(crate) fn new(mode: TraceMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.mode.is_off() && !self.suppressed
    }

    /// Append one transition line stamped with `manager`'s clock. Returns a
    /// mismatch when a completed record disagrees with the trace being
    /// verified, which is buffered up to `root_tick`.
    pub(crate) fn push(
        &mut self,
        manager: &str,
        tick: Tick,
        root_tick: Tick,
        line: TraceLine,
    ) -> Result<Option<TraceMismatch>, TraceError> {
        if !self.is_active() {
            return Ok(None);
        }
        let Some(record) = self.open.push(manager, tick, line) else {
            return Ok(None);
        };
        match &mut self.mode {
            TraceMode::Off => Ok(None),
            TraceMode::Record(writer) => writer.write_record(&record).map(|()| None),
            TraceMode::Verify(verifier) => match verifier.check_at(&record, root_tick)? {
                Verdict::Matched => Ok(None),
                Verdict::Mismatch(mismatch) => Ok(Some(mismatch)),
            },
            TraceMode::Capture => {
                self.captured.push(record);
                Ok(None)
            }
        }
    }

    /// Drop any half-built record.
    pub(crate) fn discard_open(&mut self) {
        if !self.open.is_empty() {
            tracing::debug!(lines = self.open.len(), "discarding unbalanced trace record");
        }
        self.open = EventTraceRecord::new();
    }

    pub(crate) fn flush(&mut self) -> Result<(), TraceError> {
        match &mut self.mode {
            TraceMode::Record(writer) => writer.flush(),
            _ => Ok(()),
        }
    }

    pub(crate) fn summary(&self) -> Option<TraceSummary> {
        match &self.mode {
            TraceMode::Record(writer) => Some(writer.summary()),
            _ => None,
        }
    }

    pub(crate) fn verify_stats(&self) -> Option<VerifyStats> {
        match &self.mode {
            TraceMode::Verify(verifier) => Some(VerifyStats {
                matched: verifier.matched(),
                mismatched: verifier.mismatched(),
            }),
            _ => None,
        }
    }

    pub(crate) fn unmatched_remaining(&mut self) -> Result<Option<usize>, TraceError> {
        match &mut self.mode {
            TraceMode::Verify(verifier) => verifier.unmatched_remaining().map(Some),
            _ => Ok(None),
        }
    }

    pub(crate) fn captured(&self) -> &[EventTraceRecord] {
        &self.captured
    }
}

/// Build the line for a transition of the action labelled `label`.
pub(crate) fn line(kind: TraceKind, tick: Tick, priority: Option<Priority>, label: &ActionLabel) -> TraceLine {
    TraceLine::new(
        kind,
        tick,
        priority,
        label.owner_name(),
        label.target.display_name(),
        label.name.as_ref(),
    )
}
