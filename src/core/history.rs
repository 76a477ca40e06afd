//! Event history tracking.
//!
//! Every [`State`](super::State) carries the events that produced it, in
//! sequence order. Histories are immutable values: recording returns a new
//! history and leaves the original untouched.

use super::event::EventSource;
use crate::store::MachineEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ordered history of persisted machine events.
///
/// # Example
///
/// ```rust
/// use eventchart::core::EventHistory;
///
/// let history = EventHistory::new();
/// assert!(history.is_empty());
/// assert!(history.duration().is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventHistory {
    events: Vec<MachineEvent>,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<MachineEvent>) -> Self {
        Self { events }
    }

    /// Record an event, returning a new history.
    pub fn record(&self, event: MachineEvent) -> Self {
        let mut events = self.events.clone();
        events.push(event);
        Self { events }
    }

    /// Record several events at once, returning a new history.
    pub fn extend(&self, more: impl IntoIterator<Item = MachineEvent>) -> Self {
        let mut events = self.events.clone();
        events.extend(more);
        Self { events }
    }

    pub fn events(&self) -> &[MachineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first(&self) -> Option<&MachineEvent> {
        self.events.first()
    }

    pub fn last(&self) -> Option<&MachineEvent> {
        self.events.last()
    }

    /// Distinct machine values in the order they were reached.
    ///
    /// Consecutive events that leave the active set unchanged collapse into
    /// one entry.
    pub fn path(&self) -> Vec<&[String]> {
        let mut path: Vec<&[String]> = Vec::new();
        for event in &self.events {
            let value = event.machine_value.as_slice();
            if path.last() != Some(&value) {
                path.push(value);
            }
        }
        path
    }

    /// Time between the first and the last event.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.events.first()?, self.events.last()?);
        last.created_at
            .signed_duration_since(first.created_at)
            .to_std()
            .ok()
    }

    /// Events sent by callers, without engine lifecycle records.
    pub fn external(&self) -> impl Iterator<Item = &MachineEvent> {
        self.events
            .iter()
            .filter(|event| event.source == EventSource::External)
    }
}
