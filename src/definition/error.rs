//! Errors reported while building a machine definition.

use crate::core::BehaviorKind;
use thiserror::Error;

/// A single problem found in a machine configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("machine configuration must be a JSON object")]
    NotAnObject,

    #[error("machine configuration requires a non-empty string 'id'")]
    MissingId,

    #[error("unknown root key '{key}'")]
    UnknownRootKey { key: String },

    #[error("state '{state}': unknown key '{key}'")]
    UnknownStateKey { state: String, key: String },

    #[error("state '{state}': field '{field}' {reason}")]
    InvalidField {
        state: String,
        field: String,
        reason: String,
    },

    #[error("state '{state}': unknown type '{found}'")]
    InvalidType { state: String, found: String },

    #[error("state '{state}': compound state requires child states")]
    EmptyCompound { state: String },

    #[error("state '{state}': atomic state cannot declare child states")]
    AtomicWithChildren { state: String },

    #[error("state '{state}': compound state requires exactly one 'initial' child")]
    MissingInitial { state: String },

    #[error("state '{state}': initial '{initial}' is not a child state")]
    UnknownInitial { state: String, initial: String },

    #[error("state '{state}': parallel state cannot declare 'initial'")]
    InitialOnParallel { state: String },

    #[error("state '{state}': child '{child}' of a parallel state must be a region with child states")]
    ParallelChildNotRegion { state: String, child: String },

    #[error("InvalidFinalStateDefinition: final state '{state}' cannot declare 'states' or 'on'")]
    InvalidFinalStateDefinition { state: String },

    #[error("state '{state}': 'result' is only allowed on final states")]
    ResultOnNonFinal { state: String },

    #[error("state '{state}': malformed transition for '{event}': {reason}")]
    InvalidTransition {
        state: String,
        event: String,
        reason: String,
    },

    #[error("state '{state}': unguarded branch for '{event}' must be the last branch")]
    UnguardedBranchNotLast { state: String, event: String },

    #[error("state '{state}': target '{target}' for '{event}' does not exist")]
    UnknownTarget {
        state: String,
        event: String,
        target: String,
    },

    #[error("state '{state}': duplicate state id '{id}'")]
    DuplicateId { state: String, id: String },

    #[error("state '{state}': {kind} '{name}' is not registered")]
    UnknownBehavior {
        state: String,
        kind: BehaviorKind,
        name: String,
    },

    #[error("invalid context schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("invalid payload schema for event '{event}': {reason}")]
    InvalidEventSchema { event: String, reason: String },
}

/// Errors that can occur when building a machine definition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("invalid machine definition: {}", join(.0))]
    Invalid(Vec<ConfigError>),
}

impl DefinitionError {
    /// Every problem found, in discovery order.
    pub fn errors(&self) -> &[ConfigError] {
        match self {
            Self::Invalid(errors) => errors,
        }
    }
}

fn join(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
