//! Errors raised while running a machine.

use crate::core::{BehaviorError, BehaviorKind, SchemaViolation};
use crate::definition::DefinitionError;
use crate::store::{LockError, StoreError};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors that abort a single interpretation step.
///
/// Nothing is persisted when a step fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("no transition definition found for event '{event}'")]
    NoTransitionDefinition { event: String },

    #[error("calculator '{calculator}' failed: {source}")]
    CalculatorFailed {
        calculator: String,
        #[source]
        source: BehaviorError,
    },

    #[error("action '{action}' failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: BehaviorError,
    },

    #[error("result behavior '{result}' failed: {source}")]
    ResultFailed {
        result: String,
        #[source]
        source: BehaviorError,
    },

    #[error("{kind} '{name}' is not registered")]
    MissingBehavior { kind: BehaviorKind, name: String },

    #[error("context validation failed: {}", join(.violations))]
    ContextInvalid { violations: Vec<SchemaViolation> },

    #[error("payload of '{event}' is invalid: {}", join(.violations))]
    PayloadInvalid {
        event: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("unknown state '{id}'")]
    UnknownState { id: String },
}

impl TransitionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ContextInvalid { .. } | Self::PayloadInvalid { .. } => ErrorCategory::Validation,
            Self::UnknownState { .. } => ErrorCategory::Restoration,
            _ => ErrorCategory::Transition,
        }
    }
}

fn join(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Broad classes of failures callers can branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    Transition,
    Validation,
    Concurrency,
    Restoration,
    Storage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Transition => "transition",
            Self::Validation => "validation",
            Self::Concurrency => "concurrency",
            Self::Restoration => "restoration",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`Machine`](super::Machine) operations.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("machine already running (root {root})")]
    AlreadyRunning {
        root: Uuid,
        #[source]
        source: LockError,
    },

    #[error("machine state not found for root {0}")]
    NotFound(Uuid),

    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl MachineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Definition(_) => ErrorCategory::Configuration,
            Self::Transition(err) => err.category(),
            Self::AlreadyRunning { .. } => ErrorCategory::Concurrency,
            Self::NotFound(_) => ErrorCategory::Restoration,
            Self::Store(StoreError::Corrupt { .. }) => ErrorCategory::Restoration,
            Self::Store(_) => ErrorCategory::Storage,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }
}

impl From<StoreError> for MachineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(root) => Self::NotFound(root),
            other => Self::Store(other),
        }
    }
}
