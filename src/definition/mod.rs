//! Declarative machine definitions.
//!
//! A configuration (a JSON value, usually written with [`machine!`](crate::machine))
//! is validated as a whole and compiled into an immutable arena of
//! [`StateNode`]s. Every problem is reported at once in
//! [`DefinitionError::Invalid`]; nothing runs against an invalid tree.

pub mod build;
pub mod error;
pub mod macros;
pub mod node;
pub mod validate;

pub use build::{MachineBuilder, MachineDefinition};
pub use error::{ConfigError, DefinitionError};
pub use node::{BehaviorRef, NodeId, StateKind, StateNode, Transition, TransitionBranch};
pub use validate::check_config;
