//! Read-only snapshot of a future-event list for diagnostic displays.

use std::fmt;

use crate::event::{EventKind, FutureEventList};
use crate::time::{Priority, Tick, TimeScale};

/// One pending event, in firing order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub tick: Tick,
    /// `tick` in simulated hours.
    pub hours: f64,
    pub priority: Priority,
    pub owner: String,
    pub region: Option<String>,
    /// Action name.
    pub description: String,
    /// `file:line` of the call that scheduled the event.
    pub source: String,
    pub state: EventKind,
}

impl fmt::Display for EventRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            EventKind::Start => "start",
            EventKind::Resume => "resume",
        };
        write!(
            f,
            "{:>12} {:>10.4}h p{:<2} {:<20} {:<12} {:<20} {:<7} {}",
            self.tick,
            self.hours,
            self.priority,
            self.owner,
            self.region.as_deref().unwrap_or("-"),
            self.description,
            state,
            self.source
        )
    }
}

pub(crate) fn snapshot(fel: &FutureEventList, scale: &TimeScale) -> Vec<EventRow> {
    fel.iter()
        .map(|event| EventRow {
            tick: event.time(),
            hours: scale.hours(event.time()),
            priority: event.priority(),
            owner: event.caller().name().to_owned(),
            region: event.caller().region().map(str::to_owned),
            description: event.action().to_owned(),
            source: format!("{}:{}", event.source().file(), event.source().line()),
            state: event.kind(),
        })
        .collect()
}
