//! Archival of inactive event chains.
//!
//! Chains without recent activity are serialized, compressed and stored as
//! a single [`ArchiveRecord`]; their live rows are deleted afterwards. The
//! [`EventStore`](crate::store::EventStore) reads archives transparently and
//! moves them back to live storage when an archived instance is written to.

pub mod codec;
pub mod error;
pub mod record;
pub mod scheduler;
pub mod service;

pub use codec::{decode_events, encode_events, CodecError, CompressionCodec, EncodedEvents, ZlibCodec};
pub use error::ArchiveError;
pub use record::{ArchiveRecord, ArchiveRepository, MemoryArchiveRepository, RestoreMark};
pub use scheduler::{archive_job, ArchivalEnv, ArchiveJob, ArchiveScheduler, SweepFailure, SweepReport};
pub use service::{ArchivalService, ArchiveOutcome, ArchiveStats, SkipReason};
