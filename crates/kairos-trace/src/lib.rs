//! Kairos Trace -- replayable audit log of scheduler transitions.
//!
//! Every time the kernel hands control from one execution context to another
//! it appends a tab-delimited [`TraceLine`] to the current
//! [`EventTraceRecord`]. Records nest: entering a process raises the record's
//! depth, yielding lowers it, and a record is complete only once it returns
//! to depth zero. Completed records are consumed in one of two ways:
//!
//! - **Trace mode**: [`TraceWriter`] appends each record verbatim to a log.
//! - **Verify mode**: [`TraceVerifier`] matches each record against a
//!   previously recorded log, read incrementally through a [`TraceReader`].
//!
//! # File format
//!
//! One record per blank-line-terminated block. The first line is
//! `<managerName>\t<absoluteTick>`, every following line is
//! `<kind>\t<tick>\t<priority>\t<owner>\t<ownerDisplay>\t<action>`.
//!
//! ```
//! use kairos_trace::{EventTraceRecord, TraceKind, TraceLine};
//!
//! let mut record = EventTraceRecord::new();
//! let fired = TraceLine::new(TraceKind::Event, 10, Some(5), "Server", "Server", "serve");
//! assert!(record.push("root", 10, fired).is_none()); // still inside the process
//!
//! let waited = TraceLine::new(TraceKind::Wait, 25, Some(5), "Server", "Server", "serve");
//! let complete = record.push("root", 10, waited).expect("balanced record");
//! assert_eq!(complete.lines()[0], "root\t10");
//! assert_eq!(complete.len(), 3);
//! assert!(record.is_empty());
//! ```

#![deny(unsafe_code)]

pub mod reader;
pub mod record;
pub mod verify;
pub mod writer;

pub use reader::TraceReader;
pub use record::{EventTraceRecord, TraceKind, TraceLine};
pub use verify::{TraceMismatch, TraceVerifier, Verdict};
pub use writer::{TraceSummary, TraceWriter};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while writing or reading trace files.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The underlying reader or writer failed.
    #[error("trace i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record header was not `<manager>\t<tick>`.
    #[error("malformed trace header at line {line}: {text:?}")]
    MalformedHeader {
        /// 1-based line number in the trace file.
        line: usize,
        /// The offending text.
        text: String,
    },

    /// A transition line did not carry the six expected fields.
    #[error("malformed trace line {line}: {text:?}")]
    MalformedLine {
        /// 1-based line number in the trace file.
        line: usize,
        /// The offending text.
        text: String,
    },
}
