//! Pluggable behaviors: guards, actions, calculators and results.
//!
//! A machine definition refers to behaviors by name; the implementations
//! live in a [`BehaviorRegistry`]. Every behavior receives its inputs
//! explicitly through an [`Invocation`]: the triggering event, the active
//! state value and the arguments written in the reference
//! (`"addValue:5"` passes `["5"]`).
//!
//! - **Guards** are pure predicates and must not mutate the context.
//! - **Calculators** run before guards and may prepare derived values.
//! - **Actions** run during exit, transition and entry and may raise events.
//! - **Results** compute the output of a final state.

use super::context::ContextManager;
use super::event::EventEnvelope;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by an action, calculator or result behavior.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct BehaviorError(String);

impl BehaviorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The closed set of behavior kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    Guard,
    Action,
    Calculator,
    Result,
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Guard => "guard",
            Self::Action => "action",
            Self::Calculator => "calculator",
            Self::Result => "result",
        };
        f.write_str(name)
    }
}

/// Inputs handed to a behavior.
#[derive(Clone, Copy, Debug)]
pub struct Invocation<'a> {
    /// The event being processed.
    pub event: &'a EventEnvelope,
    /// Active state ids at the time of the call.
    pub value: &'a [String],
    /// Arguments from the behavior reference.
    pub args: &'a [String],
}

impl<'a> Invocation<'a> {
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).map(String::as_str)
    }

    /// Parse an argument into `T`.
    pub fn arg_as<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.arg(index)?.parse().ok()
    }

    pub fn payload(&self, key: &str) -> Option<&'a Value> {
        self.event.payload_value(key)
    }
}

/// Inputs handed to an action, plus the ability to raise events.
///
/// Raised events are queued and processed after the current step settles,
/// in the order they were raised.
pub struct ActionScope<'a> {
    invocation: Invocation<'a>,
    raised: &'a mut Vec<EventEnvelope>,
}

impl<'a> ActionScope<'a> {
    pub(crate) fn new(invocation: Invocation<'a>, raised: &'a mut Vec<EventEnvelope>) -> Self {
        Self { invocation, raised }
    }

    pub fn invocation(&self) -> &Invocation<'a> {
        &self.invocation
    }

    pub fn event(&self) -> &'a EventEnvelope {
        self.invocation.event
    }

    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.invocation.arg(index)
    }

    pub fn arg_as<T: std::str::FromStr>(&self, index: usize) -> Option<T> {
        self.invocation.arg_as(index)
    }

    pub fn payload(&self, key: &str) -> Option<&'a Value> {
        self.invocation.payload(key)
    }

    /// Queue an event for processing once the current step has settled.
    pub fn raise(&mut self, event: impl Into<EventEnvelope>) {
        self.raised.push(event.into());
    }
}

type GuardFn = dyn Fn(&ContextManager, &Invocation<'_>) -> bool + Send + Sync;
type ActionFn =
    dyn Fn(&mut ContextManager, &mut ActionScope<'_>) -> Result<(), BehaviorError> + Send + Sync;
type CalculatorFn =
    dyn Fn(&mut ContextManager, &Invocation<'_>) -> Result<(), BehaviorError> + Send + Sync;
type ResultFn = dyn Fn(&ContextManager, &Invocation<'_>) -> Result<Value, BehaviorError> + Send + Sync;

/// Pure predicate that permits or blocks a transition branch.
///
/// # Example
///
/// ```rust
/// use eventchart::core::{ContextManager, EventEnvelope, Guard, Invocation};
///
/// let positive = Guard::new(|ctx: &ContextManager, _: &Invocation<'_>| {
///     ctx.get_as::<i64>("count").unwrap_or(0) > 0
/// });
///
/// let event = EventEnvelope::new("GO");
/// let invocation = Invocation { event: &event, value: &[], args: &[] };
///
/// let mut context = ContextManager::new();
/// context.set("count", 0);
/// assert!(!positive.check(&context, &invocation));
///
/// context.set("count", 2);
/// assert!(positive.check(&context, &invocation));
/// ```
#[derive(Clone)]
pub struct Guard {
    predicate: Arc<GuardFn>,
}

impl Guard {
    /// Create a guard from a pure predicate function.
    ///
    /// The predicate must be deterministic and thread-safe.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&ContextManager, &Invocation<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    pub fn check(&self, context: &ContextManager, invocation: &Invocation<'_>) -> bool {
        (self.predicate)(context, invocation)
    }
}

/// Side-effecting step run on entry, exit or transition.
#[derive(Clone)]
pub struct Action {
    run: Arc<ActionFn>,
}

impl Action {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&mut ContextManager, &mut ActionScope<'_>) -> Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        Self { run: Arc::new(run) }
    }

    pub fn execute(
        &self,
        context: &mut ContextManager,
        scope: &mut ActionScope<'_>,
    ) -> Result<(), BehaviorError> {
        (self.run)(context, scope)
    }
}

/// Context-preparing step run before a branch's guards.
#[derive(Clone)]
pub struct Calculator {
    run: Arc<CalculatorFn>,
}

impl Calculator {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&mut ContextManager, &Invocation<'_>) -> Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        Self { run: Arc::new(run) }
    }

    pub fn calculate(
        &self,
        context: &mut ContextManager,
        invocation: &Invocation<'_>,
    ) -> Result<(), BehaviorError> {
        (self.run)(context, invocation)
    }
}

/// Output of a final state.
#[derive(Clone)]
pub struct Outcome {
    compute: Arc<ResultFn>,
}

impl Outcome {
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn(&ContextManager, &Invocation<'_>) -> Result<Value, BehaviorError> + Send + Sync + 'static,
    {
        Self {
            compute: Arc::new(compute),
        }
    }

    pub fn compute(
        &self,
        context: &ContextManager,
        invocation: &Invocation<'_>,
    ) -> Result<Value, BehaviorError> {
        (self.compute)(context, invocation)
    }
}

/// Named behavior implementations available to a machine definition.
#[derive(Clone, Default)]
pub struct BehaviorRegistry {
    guards: HashMap<String, Guard>,
    actions: HashMap<String, Action>,
    calculators: HashMap<String, Calculator>,
    results: HashMap<String, Outcome>,
}

impl BehaviorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ContextManager, &Invocation<'_>) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Guard::new(predicate));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut ContextManager, &mut ActionScope<'_>) -> Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        self.actions.insert(name.into(), Action::new(run));
        self
    }

    pub fn calculator<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut ContextManager, &Invocation<'_>) -> Result<(), BehaviorError>
            + Send
            + Sync
            + 'static,
    {
        self.calculators.insert(name.into(), Calculator::new(run));
        self
    }

    pub fn result<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&ContextManager, &Invocation<'_>) -> Result<Value, BehaviorError> + Send + Sync + 'static,
    {
        self.results.insert(name.into(), Outcome::new(compute));
        self
    }

    /// Merge another registry into this one; entries in `other` win.
    pub fn merge(mut self, other: BehaviorRegistry) -> Self {
        self.guards.extend(other.guards);
        self.actions.extend(other.actions);
        self.calculators.extend(other.calculators);
        self.results.extend(other.results);
        self
    }

    pub fn get_guard(&self, name: &str) -> Option<&Guard> {
        self.guards.get(name)
    }

    pub fn get_action(&self, name: &str) -> Option<&Action> {
        self.actions.get(name)
    }

    pub fn get_calculator(&self, name: &str) -> Option<&Calculator> {
        self.calculators.get(name)
    }

    pub fn get_result(&self, name: &str) -> Option<&Outcome> {
        self.results.get(name)
    }

    pub fn contains(&self, kind: BehaviorKind, name: &str) -> bool {
        match kind {
            BehaviorKind::Guard => self.guards.contains_key(name),
            BehaviorKind::Action => self.actions.contains_key(name),
            BehaviorKind::Calculator => self.calculators.contains_key(name),
            BehaviorKind::Result => self.results.contains_key(name),
        }
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("guards", &sorted_names(&self.guards))
            .field("actions", &sorted_names(&self.actions))
            .field("calculators", &sorted_names(&self.calculators))
            .field("results", &sorted_names(&self.results))
            .finish()
    }
}

fn sorted_names<T>(map: &HashMap<String, T>) -> Vec<&str> {
    let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}
