//! Trace lines and the nested [`EventTraceRecord`] that groups them.
//!
//! A record covers one top-level scheduling transition: a manager firing an
//! event and everything the resumed process (and any process it hands control
//! to) does until control returns to the manager. The nesting depth is kept
//! explicitly so the record knows when it is balanced.

use std::borrow::Cow;
use std::fmt;

use crate::TraceError;

// ---------------------------------------------------------------------------
// TraceKind
// ---------------------------------------------------------------------------

/// The kind of scheduling transition a [`TraceLine`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceKind {
    /// A manager popped an event and resumed its process.
    Event,
    /// A new process was queued on the future-event list.
    Schedule,
    /// A new process was started immediately by the running process.
    Start,
    /// A queued event was retired early and its process resumed.
    Interrupted,
    /// A queued or waiting process was marked for termination and woken.
    Terminated,
    /// A waiting process was woken to re-test its condition.
    CondEval,
    /// The running process suspended itself until a future tick.
    Wait,
    /// The running process suspended itself on a condition.
    WaitUntil,
    /// The running process closed its conditional wait.
    WaitUntilEnded,
    /// The running process finished its action.
    Exit,
    /// A terminated process unwound and was recycled.
    Killed,
}

impl TraceKind {
    /// Every kind, in declaration order.
    pub const ALL: [TraceKind; 11] = [
        TraceKind::Event,
        TraceKind::Schedule,
        TraceKind::Start,
        TraceKind::Interrupted,
        TraceKind::Terminated,
        TraceKind::CondEval,
        TraceKind::Wait,
        TraceKind::WaitUntil,
        TraceKind::WaitUntilEnded,
        TraceKind::Exit,
        TraceKind::Killed,
    ];

    /// The label written to the trace file.
    pub fn as_str(self) -> &'static str {
        match self {
            TraceKind::Event => "Event",
            TraceKind::Schedule => "Schedule",
            TraceKind::Start => "Start",
            TraceKind::Interrupted => "Interrupted",
            TraceKind::Terminated => "Terminated",
            TraceKind::CondEval => "CondEval",
            TraceKind::Wait => "Wait",
            TraceKind::WaitUntil => "WaitUntil",
            TraceKind::WaitUntilEnded => "WaitUntilEnded",
            TraceKind::Exit => "Exit",
            TraceKind::Killed => "Killed",
        }
    }

    /// Parse a label written by [`as_str`](Self::as_str).
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == label)
    }

    /// How this transition moves the nesting depth: `+1` when control enters a
    /// process, `-1` when a process yields, `0` otherwise.
    pub fn depth_delta(self) -> i32 {
        match self {
            TraceKind::Event
            | TraceKind::Start
            | TraceKind::Interrupted
            | TraceKind::Terminated
            | TraceKind::CondEval => 1,
            TraceKind::Wait
            | TraceKind::WaitUntil
            | TraceKind::WaitUntilEnded
            | TraceKind::Exit
            | TraceKind::Killed => -1,
            TraceKind::Schedule => 0,
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TraceLine
// ---------------------------------------------------------------------------

/// One tab-delimited transition line.
///
/// `priority` is absent for transitions that are not tied to an event
/// (process exit, kill); it is written as `-`. Tabs, line breaks and
/// backslashes inside names are written as `\t`, `\n`, `\r` and `\\`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub kind: TraceKind,
    pub tick: i64,
    pub priority: Option<i32>,
    pub owner: String,
    pub owner_display: String,
    pub action: String,
}

impl TraceLine {
    pub fn new(
        kind: TraceKind,
        tick: i64,
        priority: Option<i32>,
        owner: impl Into<String>,
        owner_display: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            tick,
            priority,
            owner: owner.into(),
            owner_display: owner_display.into(),
            action: action.into(),
        }
    }

    /// Parse a line produced by the `Display` impl. `line_no` is only used
    /// for error reporting.
    pub fn parse(text: &str, line_no: usize) -> Result<Self, TraceError> {
        let malformed = || TraceError::MalformedLine {
            line: line_no,
            text: text.to_owned(),
        };
        let fields: Vec<&str> = text.split('\t').collect();
        let [kind, tick, priority, owner, display, action] = fields[..] else {
            return Err(malformed());
        };
        let kind = TraceKind::parse(kind).ok_or_else(malformed)?;
        let tick = tick.parse().map_err(|_| malformed())?;
        let priority = match priority {
            "-" => None,
            p => Some(p.parse().map_err(|_| malformed())?),
        };
        Ok(Self::new(
            kind,
            tick,
            priority,
            unescape(owner),
            unescape(display),
            unescape(action),
        ))
    }
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t", self.kind, self.tick)?;
        match self.priority {
            Some(p) => write!(f, "{p}")?,
            None => f.write_str("-")?,
        }
        write!(
            f,
            "\t{}\t{}\t{}",
            escape(&self.owner),
            escape(&self.owner_display),
            escape(&self.action)
        )
    }
}

/// Make a name safe for a tab-delimited, line-oriented field.
pub(crate) fn escape(field: &str) -> Cow<'_, str> {
    if !field.contains(['\\', '\t', '\n', '\r']) {
        return Cow::Borrowed(field);
    }
    let mut out = String::with_capacity(field.len() + 4);
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Inverse of [`escape`]. Unknown escapes are kept as written.
pub(crate) fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// EventTraceRecord
// ---------------------------------------------------------------------------

/// An ordered group of trace lines describing one balanced, nested scheduling
/// transition.
///
/// Line 0 is always the header `<manager>\t<tick>`, written by the first
/// [`push`](Self::push) into an empty record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTraceRecord {
    manager: String,
    tick: i64,
    lines: Vec<String>,
    depth: u32,
}

impl EventTraceRecord {
    /// Create an empty record at depth zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transition line.
    ///
    /// If the record is empty, the header for `manager` at `tick` is written
    /// first. Returns the completed record (leaving `self` empty and ready for
    /// the next transition) when the depth returns to zero.
    pub fn push(&mut self, manager: &str, tick: i64, line: TraceLine) -> Option<EventTraceRecord> {
        if self.lines.is_empty() {
            self.manager = manager.to_owned();
            self.tick = tick;
            self.lines.push(format!("{}\t{tick}", escape(manager)));
        }
        let delta = line.kind.depth_delta();
        self.lines.push(line.to_string());
        if delta > 0 {
            self.depth += 1;
        } else if delta < 0 {
            if self.depth == 0 {
                tracing::debug!(kind = %line.kind, "trace exit without a matching enter");
            }
            self.depth = self.depth.saturating_sub(1);
        }
        (self.depth == 0).then(|| std::mem::take(self))
    }

    /// Rebuild a record from the raw lines of one block (header first).
    /// `first_line_no` is the 1-based file line of the header.
    pub fn from_lines(lines: Vec<String>, first_line_no: usize) -> Result<Self, TraceError> {
        let header = lines.first().ok_or(TraceError::MalformedHeader {
            line: first_line_no,
            text: String::new(),
        })?;
        let malformed = || TraceError::MalformedHeader {
            line: first_line_no,
            text: header.clone(),
        };
        let (manager, tick) = header.split_once('\t').ok_or_else(malformed)?;
        let tick = tick.parse().map_err(|_| malformed())?;
        for (offset, text) in lines.iter().enumerate().skip(1) {
            TraceLine::parse(text, first_line_no + offset)?;
        }
        Ok(Self {
            manager: unescape(manager),
            tick,
            lines,
            depth: 0,
        })
    }

    /// Name of the manager that opened this record.
    pub fn manager(&self) -> &str {
        &self.manager
    }

    /// The manager's clock when the record was opened.
    pub fn tick(&self) -> i64 {
        self.tick
    }

    /// Current nesting depth (zero for complete records).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// All lines including the header.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Owner name of the first transition line, i.e. the target whose
    /// activation opened the record.
    pub fn target_name(&self) -> Option<&str> {
        self.first_field(3)
    }

    /// Action name of the first transition line.
    pub fn action_name(&self) -> Option<&str> {
        self.first_field(5)
    }

    fn first_field(&self, index: usize) -> Option<&str> {
        self.lines.get(1)?.split('\t').nth(index)
    }

    /// Cheap structural comparison: same line count, same tick, same target
    /// and same action.
    pub fn basic_matches(&self, other: &EventTraceRecord) -> bool {
        self.len() == other.len()
            && self.tick == other.tick
            && self.target_name() == other.target_name()
            && self.action_name() == other.action_name()
    }

    /// Full line-by-line comparison.
    pub fn matches(&self, other: &EventTraceRecord) -> bool {
        self.lines == other.lines
    }
}

impl fmt::Display for EventTraceRecord {
    /// Writes the record as a blank-line-terminated block.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        writeln!(f)
    }
}
