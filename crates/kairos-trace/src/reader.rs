//! Incremental reader for trace files.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::record::EventTraceRecord;
use crate::TraceError;

/// Reads blank-line-terminated [`EventTraceRecord`] blocks one at a time.
///
/// The reader never loads more than one block ahead, so a verifier can keep
/// its buffer bounded by simulated time instead of file size.
pub struct TraceReader {
    source: Box<dyn BufRead + Send>,
    line_no: usize,
}

impl std::fmt::Debug for TraceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceReader")
            .field("line_no", &self.line_no)
            .finish_non_exhaustive()
    }
}

impl TraceReader {
    pub fn new(source: impl BufRead + Send + 'static) -> Self {
        Self {
            source: Box::new(source),
            line_no: 0,
        }
    }

    /// Open a trace file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }

    /// Read the next record, or `None` at end of input.
    ///
    /// Leading blank lines are skipped; a final block without a terminating
    /// blank line is still returned.
    pub fn next_record(&mut self) -> Result<Option<EventTraceRecord>, TraceError> {
        let mut lines = Vec::new();
        let mut first_line_no = 0;
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.source.read_line(&mut buf)? == 0 {
                break;
            }
            self.line_no += 1;
            let text = buf.trim_end_matches(['\n', '\r']);
            if text.is_empty() {
                if lines.is_empty() {
                    continue;
                }
                break;
            }
            if lines.is_empty() {
                first_line_no = self.line_no;
            }
            lines.push(text.to_owned());
        }
        if lines.is_empty() {
            return Ok(None);
        }
        EventTraceRecord::from_lines(lines, first_line_no).map(Some)
    }

    /// Read every remaining record.
    pub fn read_all(&mut self) -> Result<Vec<EventTraceRecord>, TraceError> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}
