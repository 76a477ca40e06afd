//! Eventchart: hierarchical, event-sourced state machines
//!
//! Eventchart follows a "pure core, imperative shell" split. Machine
//! definitions are immutable trees of states; interpreting an event is a
//! pure function from (configuration, context, event) to a new
//! configuration, context and a list of recorded events. The shell seals
//! those records into an append-only chain per instance, persists them
//! under a per-instance lock, and can archive inactive chains.
//!
//! # Core Concepts
//!
//! - **Definition**: Atomic, compound, parallel and final states with
//!   guarded, multi-branch transitions, built from a JSON configuration
//! - **Behaviors**: Named guards, actions, calculators and result
//!   behaviors registered on the definition
//! - **State**: Immutable snapshot of active states, context and history
//! - **Event store**: Every processed event stored with an incremental
//!   context delta; any instance can be rebuilt by replaying its chain
//! - **Archival**: Inactive chains compressed into a single record and
//!   transparently restored when read or written
//!
//! # Example
//!
//! ```rust
//! use eventchart::engine::Machine;
//! use eventchart::machine;
//!
//! let definition = machine! {
//!     "id": "counter",
//!     "initial": "active",
//!     "context": { "count": 0 },
//!     "states": {
//!         "active": {
//!             "on": {
//!                 "INC": { "actions": "increment" },
//!                 "DONE": "finished"
//!             }
//!         },
//!         "finished": { "type": "final" }
//!     }
//! }
//! .action("increment", |ctx, _| {
//!     let count = ctx.get_as::<i64>("count").unwrap_or(0);
//!     ctx.set("count", count + 1);
//!     Ok(())
//! })
//! .build_shared()
//! .unwrap();
//!
//! let machine = Machine::in_memory(definition);
//! let state = machine.start().unwrap();
//! let state = machine.send(&state, "INC").unwrap().state;
//! let state = machine.send(&state, "DONE").unwrap().state;
//!
//! assert!(state.matches("finished"));
//! assert_eq!(state.context().get_as::<i64>("count"), Some(1));
//! ```

pub mod archive;
pub mod commands;
pub mod config;
pub mod core;
pub mod definition;
pub mod diagram;
pub mod engine;
pub mod store;

// Re-export commonly used types
pub use crate::config::EngineConfig;
pub use crate::core::{BehaviorRegistry, ContextManager, EventEnvelope, State};
pub use crate::definition::{MachineBuilder, MachineDefinition};
pub use crate::engine::{Machine, MachineError, MachineRuntime, SendOutcome};
pub use crate::store::EventStore;

#[doc(hidden)]
pub use serde_json as __serde_json;
