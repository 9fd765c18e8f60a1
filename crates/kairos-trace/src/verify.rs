//! Verify-mode sink: matches a live run against a recorded trace.
//!
//! The recorded trace is pulled into a rolling buffer keyed by the root
//! scheduler's time: it is filled through the root clock, or through the
//! record's own tick when a child running ahead of the root produced it.
//! Records are emitted in non-decreasing root time, so the buffer holds at
//! most the records of the current instant plus one look-ahead block.
//!
//! Matching is two-stage: a cheap structural comparison
//! ([`EventTraceRecord::basic_matches`]) picks the candidate, and a full
//! line-by-line comparison decides. Matched records leave the buffer.

use std::collections::VecDeque;
use std::path::Path;

use crate::reader::TraceReader;
use crate::record::EventTraceRecord;
use crate::TraceError;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Details of a record that did not match the recorded trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceMismatch {
    /// The closest recorded record: the structural match if one exists,
    /// otherwise the oldest buffered record. `None` once the recording is
    /// exhausted.
    pub expected: Option<EventTraceRecord>,
    /// The record produced by the live run.
    pub actual: EventTraceRecord,
}

/// Outcome of checking one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Matched,
    Mismatch(TraceMismatch),
}

// ---------------------------------------------------------------------------
// TraceVerifier
// ---------------------------------------------------------------------------

/// Compares completed records against a previously recorded trace.
#[derive(Debug)]
pub struct TraceVerifier {
    reader: TraceReader,
    buffer: VecDeque<EventTraceRecord>,
    exhausted: bool,
    matched: u64,
    mismatched: u64,
}

impl TraceVerifier {
    pub fn new(reader: TraceReader) -> Self {
        Self {
            reader,
            buffer: VecDeque::new(),
            exhausted: false,
            matched: 0,
            mismatched: 0,
        }
    }

    /// Verify against a trace file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        Ok(Self::new(TraceReader::open(path)?))
    }

    /// Check one completed record, buffering through its own tick.
    pub fn check(&mut self, actual: &EventTraceRecord) -> Result<Verdict, TraceError> {
        self.check_at(actual, actual.tick())
    }

    /// Check one completed record produced while the root clock reads
    /// `root_tick`.
    pub fn check_at(&mut self, actual: &EventTraceRecord, root_tick: i64) -> Result<Verdict, TraceError> {
        self.fill_through(root_tick.max(actual.tick()))?;

        let exact = self
            .buffer
            .iter()
            .position(|r| r.basic_matches(actual) && r.matches(actual));
        if let Some(idx) = exact {
            self.buffer.remove(idx);
            self.matched += 1;
            return Ok(Verdict::Matched);
        }

        self.mismatched += 1;
        let expected = self
            .buffer
            .iter()
            .find(|r| r.basic_matches(actual))
            .or_else(|| self.buffer.front())
            .cloned();
        Ok(Verdict::Mismatch(TraceMismatch {
            expected,
            actual: actual.clone(),
        }))
    }

    /// Buffer recorded blocks until one lies beyond `tick`.
    fn fill_through(&mut self, tick: i64) -> Result<(), TraceError> {
        while !self.exhausted && self.buffer.back().map_or(true, |r| r.tick() <= tick) {
            match self.reader.next_record()? {
                Some(record) => self.buffer.push_back(record),
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    /// Records matched so far.
    pub fn matched(&self) -> u64 {
        self.matched
    }

    /// Records that failed to match so far.
    pub fn mismatched(&self) -> u64 {
        self.mismatched
    }

    /// Number of recorded blocks currently held in the rolling buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Count recorded blocks the live run never produced. Drains the
    /// remainder of the recording.
    pub fn unmatched_remaining(&mut self) -> Result<usize, TraceError> {
        self.fill_through(i64::MAX)?;
        Ok(self.buffer.len())
    }
}
