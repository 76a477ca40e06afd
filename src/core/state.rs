//! Runtime state of a machine instance.
//!
//! A [`State`] is an immutable snapshot: the set of active nodes, the
//! context and the events that led here. Sending an event never mutates a
//! state; it produces a new one.

use super::context::ContextManager;
use super::history::EventHistory;
use uuid::Uuid;

/// Snapshot of a machine instance.
///
/// `value` holds the fully qualified ids of the active leaf nodes in
/// document order. Outside parallel regions there is exactly one; inside an
/// active parallel node there is one per region.
///
/// # Example
///
/// ```rust
/// use eventchart::core::{ContextManager, EventHistory, State};
///
/// let state = State::new(
///     "light",
///     ".",
///     vec!["light.green".to_string()],
///     ContextManager::new(),
///     EventHistory::new(),
/// );
///
/// assert!(state.matches("green"));
/// assert!(state.matches("light.green"));
/// assert!(!state.is_in_parallel_state());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct State {
    machine_id: String,
    delimiter: String,
    value: Vec<String>,
    context: ContextManager,
    history: EventHistory,
}

impl State {
    pub fn new(
        machine_id: impl Into<String>,
        delimiter: impl Into<String>,
        value: Vec<String>,
        context: ContextManager,
        history: EventHistory,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            delimiter: delimiter.into(),
            value,
            context,
            history,
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn value(&self) -> &[String] {
        &self.value
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    /// Id of the first event of this instance, once one was recorded.
    pub fn root_event_id(&self) -> Option<Uuid> {
        self.history.first().map(|event| event.root_event_id)
    }

    /// Sequence number of the latest recorded event (0 when none).
    pub fn last_sequence(&self) -> u64 {
        self.history
            .last()
            .map(|event| event.sequence_number)
            .unwrap_or(0)
    }

    /// Whether `id` is active.
    ///
    /// `id` may be fully qualified or relative to the machine root, and may
    /// name a compound or parallel ancestor of an active leaf.
    pub fn matches(&self, id: &str) -> bool {
        let qualified = self.qualify(id);
        self.value.iter().any(|active| {
            active == &qualified
                || active
                    .strip_prefix(qualified.as_str())
                    .is_some_and(|rest| rest.starts_with(self.delimiter.as_str()))
        })
    }

    /// Whether every id in `ids` is active simultaneously.
    pub fn matches_all<I, S>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter().all(|id| self.matches(id.as_ref()))
    }

    /// Whether more than one leaf is active.
    pub fn is_in_parallel_state(&self) -> bool {
        self.value.len() > 1
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, ContextManager, EventHistory) {
        (self.value, self.context, self.history)
    }

    fn qualify(&self, id: &str) -> String {
        let root_prefix = format!("{}{}", self.machine_id, self.delimiter);
        if id == self.machine_id || id.starts_with(&root_prefix) {
            id.to_string()
        } else {
            format!("{root_prefix}{id}")
        }
    }
}
