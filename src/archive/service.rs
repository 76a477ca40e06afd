//! Archiving inactive chains and restoring them.

use super::codec::{decode_events, encode_events};
use super::error::ArchiveError;
use super::record::ArchiveRecord;
use crate::config::ArchivalConfig;
use crate::store::{EventStore, MachineEvent, RootActivity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Why a root was left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    RecentlyActive,
    RestoreCooldown,
    Locked,
}

/// Result of archiving one root.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Archived {
        root: Uuid,
        event_count: usize,
        original_size: usize,
        compressed_size: usize,
    },
    /// Only an archive exists; nothing to do.
    AlreadyArchived { root: Uuid },
    /// An earlier run wrote the archive but did not delete the live rows.
    Repaired { root: Uuid, removed: usize },
    /// Neither live events nor an archive exist.
    Missing { root: Uuid },
    Skipped { root: Uuid, reason: SkipReason },
}

impl ArchiveOutcome {
    pub fn root(&self) -> Uuid {
        match self {
            Self::Archived { root, .. }
            | Self::AlreadyArchived { root }
            | Self::Repaired { root, .. }
            | Self::Missing { root }
            | Self::Skipped { root, .. } => *root,
        }
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, Self::Archived { .. } | Self::Repaired { .. })
    }
}

/// Aggregate figures over every archive record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ArchiveStats {
    pub archives: usize,
    pub archived_events: usize,
    pub original_bytes: usize,
    pub compressed_bytes: usize,
    pub savings_ratio: f64,
    pub total_restores: u64,
}

/// Moves inactive chains between live storage and the archive table.
#[derive(Clone, Debug)]
pub struct ArchivalService {
    store: EventStore,
    config: ArchivalConfig,
}

impl ArchivalService {
    pub fn new(store: EventStore, config: ArchivalConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn config(&self) -> &ArchivalConfig {
        &self.config
    }

    /// Roots due for archival, oldest activity first, at most
    /// `dispatch_limit` of them.
    pub fn eligible_roots(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ArchiveError> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for activity in self.store.events().activity()? {
            if self.skip_reason(&activity, now)?.is_none() {
                candidates.push(activity);
            }
        }
        candidates.sort_by_key(|activity| activity.last_event_at);

        Ok(candidates
            .into_iter()
            .take(self.config.dispatch_limit)
            .map(|activity| activity.root_event_id)
            .collect())
    }

    /// Archive `root` if it is still eligible at `now`.
    pub fn archive_if_eligible(
        &self,
        root: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        if !self.config.enabled {
            return Ok(ArchiveOutcome::Skipped {
                root,
                reason: SkipReason::Disabled,
            });
        }

        let activity = self
            .store
            .events()
            .activity()?
            .into_iter()
            .find(|activity| activity.root_event_id == root);

        if let Some(activity) = activity {
            if let Some(reason) = self.skip_reason(&activity, now)? {
                tracing::debug!(root = %root, ?reason, "archival skipped");
                return Ok(ArchiveOutcome::Skipped { root, reason });
            }
        }
        self.archive_root(root, now)
    }

    /// Archive `root` under its lock regardless of activity.
    ///
    /// The archive is written and read back before the live rows are
    /// deleted, so a crash in between leaves both; the next run finishes
    /// the job.
    pub fn archive_root(&self, root: Uuid, now: DateTime<Utc>) -> Result<ArchiveOutcome, ArchiveError> {
        if !self.config.enabled {
            return Err(ArchiveError::Disabled);
        }
        let _guard = self
            .store
            .lock(root)
            .map_err(|e| ArchiveError::Locked(root, e))?;

        let live = self.store.events().query(root)?;
        let existing = self.store.archives().get(root)?;

        let carried_restores = match (live.is_empty(), existing) {
            (true, Some(_)) => return Ok(ArchiveOutcome::AlreadyArchived { root }),
            (true, None) => return Ok(ArchiveOutcome::Missing { root }),
            (false, Some(record)) => {
                if self.decode(&record)? == live {
                    let removed = self.store.events().delete(root)?;
                    tracing::info!(root = %root, removed, "finished interrupted archival");
                    return Ok(ArchiveOutcome::Repaired { root, removed });
                }
                // Live rows moved on after the archive was written.
                self.store.archives().delete(root)?;
                tracing::warn!(root = %root, "discarded stale archive");
                record.restore_count
            }
            (false, None) => self
                .store
                .archives()
                .restore_mark(root)?
                .map(|mark| mark.restore_count)
                .unwrap_or(0),
        };

        let record = self.build_record(root, &live, carried_restores, now)?;
        let (original_size, compressed_size) = (record.original_size, record.compressed_size);
        self.store.archives().insert(record)?;

        let written = self
            .store
            .archives()
            .get(root)?
            .ok_or(ArchiveError::VerificationFailed(root))?;
        if self.decode(&written)? != live {
            self.store.archives().delete(root)?;
            return Err(ArchiveError::VerificationFailed(root));
        }

        self.store.events().delete(root)?;
        tracing::info!(
            root = %root,
            events = live.len(),
            original_size,
            compressed_size,
            "chain archived"
        );

        Ok(ArchiveOutcome::Archived {
            root,
            event_count: live.len(),
            original_size,
            compressed_size,
        })
    }

    /// Move an archived chain back to live storage under its lock.
    ///
    /// Returns the number of restored events, or 0 when the chain is
    /// already live.
    pub fn restore_root(&self, root: Uuid, now: DateTime<Utc>) -> Result<usize, ArchiveError> {
        let _guard = self
            .store
            .lock(root)
            .map_err(|e| ArchiveError::Locked(root, e))?;

        if self.store.restore_archived_at(root, now)? {
            return Ok(self.store.events().query(root)?.len());
        }
        if self.store.events().exists(root)? {
            return Ok(0);
        }
        Err(ArchiveError::NotArchived(root))
    }

    pub fn stats(&self) -> Result<ArchiveStats, ArchiveError> {
        let records = self.store.archives().all()?;
        let mut stats = ArchiveStats {
            archives: records.len(),
            ..ArchiveStats::default()
        };
        for record in &records {
            stats.archived_events += record.event_count;
            stats.original_bytes += record.original_size;
            stats.compressed_bytes += record.compressed_size;
            stats.total_restores += u64::from(record.restore_count);
        }
        if stats.original_bytes > 0 {
            stats.savings_ratio = 1.0 - stats.compressed_bytes as f64 / stats.original_bytes as f64;
        }
        Ok(stats)
    }

    fn skip_reason(
        &self,
        activity: &RootActivity,
        now: DateTime<Utc>,
    ) -> Result<Option<SkipReason>, ArchiveError> {
        if activity.last_event_at > now - self.config.inactivity() {
            return Ok(Some(SkipReason::RecentlyActive));
        }
        if let Some(mark) = self.store.archives().restore_mark(activity.root_event_id)? {
            if mark.restored_at > now - self.config.restore_cooldown() {
                return Ok(Some(SkipReason::RestoreCooldown));
            }
        }
        if self.store.is_locked(activity.root_event_id) {
            return Ok(Some(SkipReason::Locked));
        }
        Ok(None)
    }

    fn build_record(
        &self,
        root: Uuid,
        events: &[MachineEvent],
        restore_count: u32,
        now: DateTime<Utc>,
    ) -> Result<ArchiveRecord, ArchiveError> {
        let encoded = encode_events(
            self.store.codec().as_ref(),
            events,
            self.config.level,
            self.config.threshold_bytes,
        )?;

        let first_event_at = events.first().map(|e| e.created_at).unwrap_or(now);
        let last_event_at = events.last().map(|e| e.created_at).unwrap_or(now);
        let machine_id = events
            .first()
            .map(|e| e.machine_id.clone())
            .unwrap_or_default();

        Ok(ArchiveRecord {
            root_event_id: root,
            machine_id,
            compressed_size: encoded.data.len(),
            events_data: encoded.data,
            event_count: events.len(),
            original_size: encoded.original_size,
            compression_level: encoded.level,
            archived_at: now,
            first_event_at,
            last_event_at,
            restore_count,
            last_restored_at: None,
        })
    }

    fn decode(&self, record: &ArchiveRecord) -> Result<Vec<MachineEvent>, ArchiveError> {
        Ok(decode_events(self.store.codec().as_ref(), &record.events_data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, LockConfig};
    use crate::core::EventSource;
    use crate::store::{seal, ChainPosition, EventDraft, StoreError};
    use chrono::Duration;
    use serde_json::json;

    fn service(config: ArchivalConfig) -> ArchivalService {
        let engine = EngineConfig {
            archival: config.clone(),
            locks: LockConfig {
                wait_ms: 0,
                hold_ms: 60_000,
            },
        };
        ArchivalService::new(EventStore::in_memory_with(&engine), config)
    }

    fn write_chain(service: &ArchivalService, len: usize, at: DateTime<Utc>) -> Uuid {
        let drafts = (0..len)
            .map(|i| EventDraft {
                event_type: format!("E{i}"),
                source: EventSource::External,
                payload: None,
                machine_value: vec!["m.idle".into()],
                context: json!({ "step": i }).as_object().cloned().unwrap(),
                version: 1,
            })
            .collect();
        let events = seal("m", drafts, ChainPosition::default(), at);
        let root = events[0].root_event_id;
        service.store().append(&events, true).unwrap();
        root
    }

    #[test]
    fn archive_replaces_live_rows() {
        let service = service(ArchivalConfig::default());
        let now = Utc::now();
        let root = write_chain(&service, 5, now - Duration::days(40));

        let outcome = service.archive_root(root, now).unwrap();

        assert!(matches!(outcome, ArchiveOutcome::Archived { event_count: 5, .. }));
        assert!(service.store().events().query(root).unwrap().is_empty());
        let record = service.store().archives().get(root).unwrap().unwrap();
        assert_eq!(record.event_count, 5);
        assert_eq!(record.machine_id, "m");
    }

    #[test]
    fn archiving_twice_is_idempotent() {
        let service = service(ArchivalConfig::default());
        let now = Utc::now();
        let root = write_chain(&service, 3, now - Duration::days(40));

        service.archive_root(root, now).unwrap();
        assert_eq!(
            service.archive_root(root, now).unwrap(),
            ArchiveOutcome::AlreadyArchived { root }
        );
    }

    #[test]
    fn float_contexts_survive_archive_and_restore() {
        let service = service(ArchivalConfig::default());
        let now = Utc::now();
        let prices = [0.09468235576822273, 0.1 + 0.2, 1e-300, 123456.78901234567, -2.5e17];
        let drafts = prices
            .iter()
            .map(|price| EventDraft {
                event_type: "PRICE".into(),
                source: EventSource::External,
                payload: Some(json!({ "price": price })),
                machine_value: vec!["m.idle".into()],
                context: json!({ "price": price, "nested": { "ratio": price / 3.0 } })
                    .as_object()
                    .cloned()
                    .unwrap(),
                version: 1,
            })
            .collect();
        let events = seal("m", drafts, ChainPosition::default(), now - Duration::days(40));
        let root = events[0].root_event_id;
        service.store().append(&events, true).unwrap();

        let outcome = service.archive_root(root, now).unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Archived { event_count: 5, .. }));

        assert_eq!(service.restore_root(root, now).unwrap(), 5);
        assert_eq!(service.store().events().query(root).unwrap(), events);
        let snapshot = service.store().reconstruct(root).unwrap();
        assert_eq!(snapshot.context.get("price"), Some(&json!(-2.5e17)));
    }

    #[test]
    fn interrupted_archival_is_repaired() {
        let service = service(ArchivalConfig::default());
        let now = Utc::now();
        let root = write_chain(&service, 3, now - Duration::days(40));
        let live = service.store().events().query(root).unwrap();

        // Archive written, live rows never deleted.
        let record = service.build_record(root, &live, 0, now).unwrap();
        service.store().archives().insert(record).unwrap();

        let outcome = service.archive_root(root, now).unwrap();
        assert_eq!(outcome, ArchiveOutcome::Repaired { root, removed: 3 });
        assert!(!service.store().events().exists(root).unwrap());
        assert!(service.store().archives().get(root).unwrap().is_some());
    }

    #[test]
    fn eligibility_respects_inactivity_and_limit() {
        let service = service(ArchivalConfig {
            dispatch_limit: 2,
            ..ArchivalConfig::default()
        });
        let now = Utc::now();
        let oldest = write_chain(&service, 1, now - Duration::days(90));
        let older = write_chain(&service, 1, now - Duration::days(60));
        let _old = write_chain(&service, 1, now - Duration::days(31));
        let _fresh = write_chain(&service, 1, now - Duration::days(1));

        assert_eq!(service.eligible_roots(now).unwrap(), vec![oldest, older]);
    }

    #[test]
    fn locked_roots_are_not_eligible() {
        let service = service(ArchivalConfig::default());
        let now = Utc::now();
        let root = write_chain(&service, 1, now - Duration::days(40));

        let _guard = service.store().lock(root).unwrap();
        assert!(service.eligible_roots(now).unwrap().is_empty());
        assert!(matches!(
            service.archive_root(root, now),
            Err(ArchiveError::Locked(r, _)) if r == root
        ));
    }

    #[test]
    fn disabled_archival_finds_nothing() {
        let service = service(ArchivalConfig {
            enabled: false,
            ..ArchivalConfig::default()
        });
        let now = Utc::now();
        let root = write_chain(&service, 1, now - Duration::days(40));

        assert!(service.eligible_roots(now).unwrap().is_empty());
        assert_eq!(
            service.archive_if_eligible(root, now).unwrap(),
            ArchiveOutcome::Skipped {
                root,
                reason: SkipReason::Disabled
            }
        );
    }

    #[test]
    fn transparent_read_counts_restores() {
        let service = service(ArchivalConfig::default());
        let now = Utc::now();
        let root = write_chain(&service, 2, now - Duration::days(40));
        service.archive_root(root, now).unwrap();

        let snapshot = service.store().reconstruct(root).unwrap();
        assert_eq!(snapshot.context.get("step"), Some(&json!(1)));

        let record = service.store().archives().get(root).unwrap().unwrap();
        assert_eq!(record.restore_count, 1);
        assert!(record.last_restored_at.is_some());
        assert!(!service.store().events().exists(root).unwrap());
    }

    #[test]
    fn restore_moves_chain_back_and_starts_cooldown() {
        let service = service(ArchivalConfig::default());
        let now = Utc::now();
        let root = write_chain(&service, 4, now - Duration::days(40));
        service.archive_root(root, now).unwrap();

        assert_eq!(service.restore_root(root, now).unwrap(), 4);
        assert_eq!(service.restore_root(root, now).unwrap(), 0);
        assert!(service.store().archives().get(root).unwrap().is_none());

        assert_eq!(
            service
                .archive_if_eligible(root, now + Duration::hours(1))
                .unwrap(),
            ArchiveOutcome::Skipped {
                root,
                reason: SkipReason::RestoreCooldown
            }
        );
        let later = now + Duration::hours(25);
        assert!(service.archive_if_eligible(root, later).unwrap().is_archived());
        assert_eq!(
            service.store().archives().get(root).unwrap().unwrap().restore_count,
            1
        );
    }

    #[test]
    fn restoring_unknown_root_fails() {
        let service = service(ArchivalConfig::default());
        let root = Uuid::now_v7();
        assert!(matches!(
            service.restore_root(root, Utc::now()),
            Err(ArchiveError::NotArchived(r)) if r == root
        ));
        assert!(matches!(
            service.store().load_chain(root),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn stats_aggregate_records() {
        let service = service(ArchivalConfig {
            threshold_bytes: 0,
            ..ArchivalConfig::default()
        });
        let now = Utc::now();
        for _ in 0..3 {
            let root = write_chain(&service, 10, now - Duration::days(40));
            service.archive_root(root, now).unwrap();
        }

        let stats = service.stats().unwrap();
        assert_eq!(stats.archives, 3);
        assert_eq!(stats.archived_events, 30);
        assert!(stats.compressed_bytes < stats.original_bytes);
        assert!(stats.savings_ratio > 0.0);
        assert_eq!(stats.total_restores, 0);
    }
}
