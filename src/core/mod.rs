//! Core value types.
//!
//! This module contains the pure values a machine works with:
//! - Context with schema validation and incremental diffs
//! - Event envelopes
//! - Named behaviors and their registry
//! - Immutable runtime state and event history
//!
//! Nothing in here performs I/O.

mod behavior;
mod context;
mod event;
mod history;
mod schema;
mod state;

pub use behavior::{
    Action, ActionScope, BehaviorError, BehaviorKind, BehaviorRegistry, Calculator, Guard,
    Invocation, Outcome,
};
pub use context::{deep_merge, ContextDelta, ContextManager};
pub use event::{EventEnvelope, EventSource, ALWAYS};
pub use history::EventHistory;
pub use schema::{Schema, SchemaViolation, ValueKind};
pub use state::State;
