//! Trace-mode sink: appends completed records to a log.
//!
//! Alongside the text, the writer feeds every byte it emits into a BLAKE3
//! hasher, so two runs can be compared by [`TraceSummary`] without re-reading
//! either file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::record::EventTraceRecord;
use crate::TraceError;

// ---------------------------------------------------------------------------
// TraceSummary
// ---------------------------------------------------------------------------

/// Record count and content digest of everything written so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSummary {
    /// Number of records written.
    pub records: u64,
    /// BLAKE3 hex digest of the written bytes.
    pub digest: String,
}

impl TraceSummary {
    /// Summarize an existing trace file. The digest equals the one the writer
    /// reported when the file was produced.
    pub fn of_file(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let mut reader = crate::TraceReader::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut records = 0;
        while let Some(record) = reader.next_record()? {
            hasher.update(record.to_string().as_bytes());
            records += 1;
        }
        Ok(Self {
            records,
            digest: hasher.finalize().to_hex().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// TraceWriter
// ---------------------------------------------------------------------------

/// Writes completed [`EventTraceRecord`]s verbatim.
pub struct TraceWriter {
    sink: Box<dyn Write + Send>,
    hasher: blake3::Hasher,
    records: u64,
}

impl std::fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceWriter")
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

impl TraceWriter {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            hasher: blake3::Hasher::new(),
            records: 0,
        }
    }

    /// Create (or truncate) a trace file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }

    /// Append one completed record as a blank-line-terminated block.
    pub fn write_record(&mut self, record: &EventTraceRecord) -> Result<(), TraceError> {
        let block = record.to_string();
        self.sink.write_all(block.as_bytes())?;
        self.hasher.update(block.as_bytes());
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TraceError> {
        self.sink.flush()?;
        Ok(())
    }

    /// Summary of everything written so far.
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            records: self.records,
            digest: self.hasher.finalize().to_hex().to_string(),
        }
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "failed to flush trace file on drop");
        }
    }
}
