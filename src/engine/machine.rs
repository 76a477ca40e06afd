//! Machine instances backed by an event store.

use super::error::{MachineError, TransitionError};
use super::interpreter::Interpreter;
use super::lifecycle::Lifecycle;
use crate::core::{
    deep_merge, BehaviorKind, ContextManager, EventEnvelope, EventHistory, Invocation, State,
};
use crate::definition::MachineDefinition;
use crate::store::{replay, seal, ChainPosition, EventStore, MachineEvent, StoreError};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Result of [`Machine::send`].
#[derive(Clone, Debug, PartialEq)]
pub struct SendOutcome {
    /// The state after the event. Equal to the input when nothing matched.
    pub state: State,
    /// Whether a transition branch was selected.
    pub transitioned: bool,
    /// Events recorded by this send, in sequence order.
    pub events: Vec<MachineEvent>,
}

/// Runs instances of one definition against one store.
///
/// `Machine` holds no instance state. Every call takes a [`State`] and
/// returns a new one; the store keeps the authoritative chain. Writers of
/// the same instance are serialized by a per-root lock.
///
/// # Example
///
/// ```rust
/// use eventchart::definition::MachineBuilder;
/// use eventchart::engine::Machine;
/// use serde_json::json;
///
/// let definition = MachineBuilder::new(json!({
///     "id": "light",
///     "initial": "green",
///     "states": {
///         "green": { "on": { "TIMER": "yellow" } },
///         "yellow": { "on": { "TIMER": "red" } },
///         "red": { "on": { "TIMER": "green" } }
///     }
/// }))
/// .build_shared()
/// .unwrap();
///
/// let machine = Machine::in_memory(definition);
/// let state = machine.start().unwrap();
/// let outcome = machine.send(&state, "TIMER").unwrap();
///
/// assert!(outcome.state.matches("yellow"));
///
/// let restored = machine.restore(state.root_event_id().unwrap()).unwrap();
/// assert_eq!(restored.value(), outcome.state.value());
/// ```
#[derive(Clone, Debug)]
pub struct Machine {
    definition: Arc<MachineDefinition>,
    store: EventStore,
}

impl Machine {
    pub fn new(definition: Arc<MachineDefinition>, store: EventStore) -> Self {
        Self { definition, store }
    }

    /// Machine backed by a fresh in-memory store.
    pub fn in_memory(definition: Arc<MachineDefinition>) -> Self {
        Self::new(definition, EventStore::in_memory())
    }

    pub fn definition(&self) -> &Arc<MachineDefinition> {
        &self.definition
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Start a new instance with the configured initial context.
    pub fn start(&self) -> Result<State, MachineError> {
        self.start_with_context(Map::new())
    }

    /// Start a new instance, deep-merging `overrides` into the initial
    /// context before it is validated.
    pub fn start_with_context(&self, overrides: Map<String, Value>) -> Result<State, MachineError> {
        let definition = self.definition.as_ref();
        let mut data = definition.initial_context().data().clone();
        deep_merge(&mut data, &overrides);
        let context = self.attach_schema(ContextManager::from_map(data));

        let step = Interpreter::new(definition).start(context, definition.version())?;
        let events = seal(
            definition.id(),
            step.drafts,
            ChainPosition::default(),
            Utc::now(),
        );
        if definition.should_persist() {
            self.store.append(&events, true)?;
        }

        let root = events.first().map(|event| event.root_event_id);
        tracing::debug!(
            machine = definition.id(),
            root = ?root,
            events = events.len(),
            "machine started"
        );

        Ok(State::new(
            definition.id(),
            definition.delimiter(),
            step.value,
            step.context,
            EventHistory::from_events(events),
        ))
    }

    /// Send an event to the instance `state` belongs to.
    ///
    /// With persistence enabled the root's lock is held for the whole call.
    /// If another writer advanced the chain since `state` was taken, the
    /// latest state is restored first and the event applies to it.
    pub fn send(
        &self,
        state: &State,
        event: impl Into<EventEnvelope>,
    ) -> Result<SendOutcome, MachineError> {
        let event = event.into();
        let persist = self.definition.should_persist();

        let root = match state.root_event_id() {
            Some(root) if persist => root,
            _ => return self.apply(state.clone(), &event, persist),
        };

        let _guard = self
            .store
            .lock(root)
            .map_err(|source| MachineError::AlreadyRunning { root, source })?;

        let current = match self.store.latest_sequence(root)? {
            Some(latest) if latest > state.last_sequence() => {
                tracing::debug!(
                    machine = self.definition.id(),
                    root = %root,
                    held = state.last_sequence(),
                    latest,
                    "refreshing stale state"
                );
                self.restore(root)?
            }
            _ => state.clone(),
        };

        self.apply(current, &event, true)
    }

    fn apply(
        &self,
        state: State,
        event: &EventEnvelope,
        persist: bool,
    ) -> Result<SendOutcome, MachineError> {
        let definition = self.definition.as_ref();
        let step = Interpreter::new(definition).send(state.value(), state.context().clone(), event)?;
        if !step.transitioned {
            return Ok(SendOutcome {
                state,
                transitioned: false,
                events: Vec::new(),
            });
        }

        let root = state.root_event_id();
        let events = seal(
            definition.id(),
            step.drafts,
            ChainPosition {
                root,
                last_sequence: state.last_sequence(),
                context: root.map(|_| state.context().data()),
            },
            Utc::now(),
        );
        if persist {
            self.store.append(&events, event.transactional)?;
        }

        tracing::debug!(
            machine = definition.id(),
            event = %event.event_type,
            sequence = events.last().map(|e| e.sequence_number).unwrap_or_default(),
            persisted = persist,
            "event processed"
        );

        let (_, _, history) = state.into_parts();
        let next = State::new(
            definition.id(),
            definition.delimiter(),
            step.value,
            step.context,
            history.extend(events.iter().cloned()),
        );
        Ok(SendOutcome {
            state: next,
            transitioned: true,
            events,
        })
    }

    /// Rebuild an instance from its stored chain, live or archived.
    pub fn restore(&self, root: Uuid) -> Result<State, MachineError> {
        let mut events = self.store.load_chain(root)?;
        events.sort_by_key(|event| event.sequence_number);
        let snapshot = replay(&events)?;

        if snapshot.machine_id != self.definition.id() {
            return Err(StoreError::Corrupt {
                root,
                reason: format!(
                    "chain belongs to machine '{}', not '{}'",
                    snapshot.machine_id,
                    self.definition.id()
                ),
            }
            .into());
        }

        Ok(State::new(
            self.definition.id(),
            self.definition.delimiter(),
            snapshot.value,
            self.attach_schema(ContextManager::from_map(snapshot.context)),
            EventHistory::from_events(events),
        ))
    }

    /// Output of the active final state's `result` behavior.
    ///
    /// `None` when no active final state declares one.
    pub fn result(&self, state: &State) -> Result<Option<Value>, MachineError> {
        let definition = self.definition.as_ref();
        let Some(reference) = state
            .value()
            .iter()
            .filter_map(|id| definition.find(id))
            .map(|handle| definition.node(handle))
            .filter(|node| node.is_final())
            .find_map(|node| node.result())
        else {
            return Ok(None);
        };

        let outcome = definition
            .behaviors()
            .get_result(&reference.name)
            .ok_or_else(|| TransitionError::MissingBehavior {
                kind: BehaviorKind::Result,
                name: reference.name.clone(),
            })?;

        let event = state
            .history()
            .external()
            .last()
            .map(|event| EventEnvelope {
                payload: event.payload.clone(),
                ..EventEnvelope::new(event.event_type.clone())
            })
            .unwrap_or_else(|| EventEnvelope::internal(Lifecycle::new(definition.id()).finish()));
        let invocation = Invocation {
            event: &event,
            value: state.value(),
            args: &reference.args,
        };

        let value = outcome
            .compute(state.context(), &invocation)
            .map_err(|source| TransitionError::ResultFailed {
                result: reference.name.clone(),
                source,
            })?;
        Ok(Some(value))
    }

    fn attach_schema(&self, context: ContextManager) -> ContextManager {
        match self.definition.schema() {
            Some(schema) => context.with_schema(Arc::clone(schema)),
            None => context,
        }
    }
}

/// A single running instance that keeps its own current state.
///
/// # Example
///
/// ```rust
/// use eventchart::definition::MachineBuilder;
/// use eventchart::engine::{Machine, MachineRuntime};
/// use serde_json::json;
///
/// let definition = MachineBuilder::new(json!({
///     "id": "door",
///     "initial": "closed",
///     "states": {
///         "closed": { "on": { "OPEN": "open" } },
///         "open": { "on": { "CLOSE": "closed" } }
///     }
/// }))
/// .build_shared()
/// .unwrap();
///
/// let mut door = MachineRuntime::start(Machine::in_memory(definition)).unwrap();
/// assert!(door.send("OPEN").unwrap());
/// assert!(door.state().matches("open"));
/// ```
#[derive(Clone, Debug)]
pub struct MachineRuntime {
    machine: Machine,
    state: State,
}

impl MachineRuntime {
    pub fn start(machine: Machine) -> Result<Self, MachineError> {
        let state = machine.start()?;
        Ok(Self { machine, state })
    }

    /// Resume a stored instance.
    pub fn resume(machine: Machine, root: Uuid) -> Result<Self, MachineError> {
        let state = machine.restore(root)?;
        Ok(Self { machine, state })
    }

    /// Send an event and keep the resulting state.
    ///
    /// Returns whether a transition was taken.
    pub fn send(&mut self, event: impl Into<EventEnvelope>) -> Result<bool, MachineError> {
        let outcome = self.machine.send(&self.state, event)?;
        self.state = outcome.state;
        Ok(outcome.transitioned)
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn result(&self) -> Result<Option<Value>, MachineError> {
        self.machine.result(&self.state)
    }

    pub fn into_state(self) -> State {
        self.state
    }
}
