//! Event store error types.

use crate::archive::CodecError;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while reading or writing event chains
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live events and no archive exist for the root
    #[error("machine state not found for root {0}")]
    NotFound(Uuid),

    /// Sequence numbers must strictly increase per root
    #[error("sequence conflict for root {root}: expected > {last}, got {found}")]
    SequenceConflict { root: Uuid, last: u64, found: u64 },

    /// Stored events cannot be replayed
    #[error("corrupt event chain for root {root}: {reason}")]
    Corrupt { root: Uuid, reason: String },

    /// Archive payload could not be encoded or decoded
    #[error("archive codec failed: {0}")]
    Codec(#[from] CodecError),

    /// The backing storage rejected the operation
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Errors from the per-root lock provider
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LockError {
    #[error("lock '{key}' not acquired within {waited_ms} ms")]
    Timeout { key: String, waited_ms: u64 },
}
