//! Archival error types.

use super::codec::CodecError;
use crate::store::{LockError, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while archiving or restoring a chain
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archival is disabled")]
    Disabled,

    #[error("root {0} is locked by a running machine")]
    Locked(Uuid, #[source] LockError),

    #[error("archive of root {0} does not match its live events")]
    VerificationFailed(Uuid),

    #[error("no archive found for root {0}")]
    NotArchived(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
