//! The effectful shell around the pure interpreter.
//!
//! [`Interpreter`] turns a configuration, a context and an event into a new
//! configuration, context and a list of recorded drafts without touching
//! storage. [`Machine`] seals those drafts into events, persists them under
//! the instance's lock and hands back the next [`State`](crate::core::State).

pub mod error;
pub mod interpreter;
pub mod lifecycle;
pub mod machine;
pub mod resolver;

pub use error::{ErrorCategory, MachineError, TransitionError};
pub use interpreter::{Interpreter, Step};
pub use lifecycle::Lifecycle;
pub use machine::{Machine, MachineRuntime, SendOutcome};
pub use resolver::{Resolution, TransitionResolver};
