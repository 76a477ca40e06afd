//! Event-sourced persistence for machine instances.
//!
//! Every processed event is stored as an immutable [`MachineEvent`] grouped
//! under the id of the instance's first event. A [`State`](crate::core::State)
//! is rebuilt by replaying its chain with [`replay`].
//!
//! The [`EventStore`] hides archival from callers: reading an archived root
//! decodes the archive in memory, and writing to one moves its events back
//! to live storage first.

use crate::archive::{
    decode_events, ArchiveRepository, CompressionCodec, MemoryArchiveRepository, RestoreMark,
    ZlibCodec,
};
use crate::config::{EngineConfig, LockConfig};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

pub mod error;
pub mod event;
pub mod lock;
pub mod repository;

pub use error::{LockError, StoreError};
pub use event::{seal, ChainPosition, EventDraft, MachineEvent};
pub use lock::{LockGuard, LockProvider, MemoryLocks};
pub use repository::{EventRepository, MemoryEventRepository, RootActivity};

/// Name of the lock that serializes writers of one root.
pub fn lock_key(root: Uuid) -> String {
    format!("eventchart:root:{root}")
}

/// Result of replaying an event chain.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub root_event_id: Uuid,
    pub machine_id: String,
    pub value: Vec<String>,
    pub context: Map<String, Value>,
    pub last_sequence: u64,
}

/// Rebuild the final value and context of a chain.
///
/// Events are ordered by sequence number. The first carries the full
/// context; every later delta is deep-merged into it, objects key by key
/// and arrays replaced wholesale, then its removed paths are dropped.
pub fn replay(events: &[MachineEvent]) -> Result<Snapshot, StoreError> {
    let mut ordered: Vec<&MachineEvent> = events.iter().collect();
    ordered.sort_by_key(|event| event.sequence_number);

    let (first, rest) = match ordered.split_first() {
        Some(split) => split,
        None => return Err(StoreError::NotFound(Uuid::nil())),
    };
    let root = first.root_event_id;

    let Some(initial) = first.context.as_object() else {
        return Err(StoreError::Corrupt {
            root,
            reason: format!("event {} does not carry a context object", first.sequence_number),
        });
    };

    let mut context = initial.clone();
    for event in rest {
        if event.root_event_id != root {
            return Err(StoreError::Corrupt {
                root,
                reason: format!("event {} belongs to root {}", event.id, event.root_event_id),
            });
        }
        event.delta().apply_to(&mut context);
    }

    let last = ordered.last().copied().unwrap_or(*first);
    Ok(Snapshot {
        root_event_id: root,
        machine_id: last.machine_id.clone(),
        value: last.machine_value.clone(),
        context,
        last_sequence: last.sequence_number,
    })
}

/// Facade over live events, archives and per-root locks.
#[derive(Clone)]
pub struct EventStore {
    events: Arc<dyn EventRepository>,
    archives: Arc<dyn ArchiveRepository>,
    locks: Arc<dyn LockProvider>,
    codec: Arc<dyn CompressionCodec>,
    lock_config: LockConfig,
}

impl EventStore {
    pub fn new(
        events: Arc<dyn EventRepository>,
        archives: Arc<dyn ArchiveRepository>,
        locks: Arc<dyn LockProvider>,
        codec: Arc<dyn CompressionCodec>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            events,
            archives,
            locks,
            codec,
            lock_config: config.locks.clone(),
        }
    }

    /// Store backed by in-memory tables, zlib and default settings.
    pub fn in_memory() -> Self {
        Self::in_memory_with(&EngineConfig::default())
    }

    pub fn in_memory_with(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(MemoryEventRepository::new()),
            Arc::new(MemoryArchiveRepository::new()),
            Arc::new(MemoryLocks::new()),
            Arc::new(ZlibCodec),
            config,
        )
    }

    pub fn events(&self) -> &Arc<dyn EventRepository> {
        &self.events
    }

    pub fn archives(&self) -> &Arc<dyn ArchiveRepository> {
        &self.archives
    }

    pub fn locks(&self) -> &Arc<dyn LockProvider> {
        &self.locks
    }

    pub fn codec(&self) -> &Arc<dyn CompressionCodec> {
        &self.codec
    }

    pub fn lock_config(&self) -> &LockConfig {
        &self.lock_config
    }

    /// Acquire the writer lock of `root` with the configured timings.
    pub fn lock(&self, root: Uuid) -> Result<LockGuard, LockError> {
        self.locks.acquire(
            &lock_key(root),
            self.lock_config.wait(),
            self.lock_config.hold(),
        )
    }

    pub fn is_locked(&self, root: Uuid) -> bool {
        self.locks.is_locked(&lock_key(root))
    }

    /// Persist a step's events.
    ///
    /// Transactional batches are written atomically. Otherwise events are
    /// written one by one and a failure leaves the earlier ones in place.
    /// An archived root is restored to live storage before the write.
    pub fn append(&self, events: &[MachineEvent], transactional: bool) -> Result<(), StoreError> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let root = first.root_event_id;
        if !first.is_root() {
            self.restore_archived(root)?;
        }

        if transactional {
            self.events.append_all(events)?;
        } else {
            for event in events {
                self.events.append(event)?;
            }
        }

        tracing::debug!(
            root = %root,
            count = events.len(),
            sequence = events.last().map(|e| e.sequence_number).unwrap_or_default(),
            transactional,
            "events persisted"
        );
        Ok(())
    }

    /// Load a root's chain in sequence order.
    ///
    /// Archived chains are decoded in memory and the read is counted on the
    /// archive record; live storage is left untouched. Reads take no lock,
    /// so a writer may move the archive back to live storage mid-read; the
    /// live rows are returned in that case.
    pub fn load_chain(&self, root: Uuid) -> Result<Vec<MachineEvent>, StoreError> {
        let live = self.events.query(root)?;
        if !live.is_empty() {
            return Ok(live);
        }

        let Some(record) = self.archives.get(root)? else {
            return self.live_chain(root);
        };
        let events = decode_events(self.codec.as_ref(), &record.events_data)?;
        match self.archives.mark_restored(root, Utc::now()) {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(root = %root, "archive restored during read");
                return self.live_chain(root);
            }
            Err(err) => return Err(err),
        }
        tracing::info!(root = %root, events = events.len(), "archived chain read");
        Ok(events)
    }

    fn live_chain(&self, root: Uuid) -> Result<Vec<MachineEvent>, StoreError> {
        let live = self.events.query(root)?;
        if live.is_empty() {
            return Err(StoreError::NotFound(root));
        }
        Ok(live)
    }

    /// Rebuild the latest snapshot of a root.
    pub fn reconstruct(&self, root: Uuid) -> Result<Snapshot, StoreError> {
        replay(&self.load_chain(root)?)
    }

    /// Latest sequence number of a root, live or archived.
    pub fn latest_sequence(&self, root: Uuid) -> Result<Option<u64>, StoreError> {
        if let Some(sequence) = self.events.latest_sequence(root)? {
            return Ok(Some(sequence));
        }
        match self.archives.get(root)? {
            Some(record) => Ok(decode_events(self.codec.as_ref(), &record.events_data)?
                .iter()
                .map(|event| event.sequence_number)
                .max()),
            None => Ok(None),
        }
    }

    /// Move an archived chain back to live storage.
    ///
    /// Events keep their ids and sequence numbers. Returns `false` when the
    /// root already has live events or no archive, so repeated calls are
    /// harmless.
    pub fn restore_archived(&self, root: Uuid) -> Result<bool, StoreError> {
        self.restore_archived_at(root, Utc::now())
    }

    pub(crate) fn restore_archived_at(&self, root: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.events.exists(root)? {
            return Ok(false);
        }
        let Some(record) = self.archives.get(root)? else {
            return Ok(false);
        };

        let events = decode_events(self.codec.as_ref(), &record.events_data)?;
        self.events.append_all(&events)?;
        self.archives.delete(root)?;
        self.archives.put_restore_mark(RestoreMark {
            root_event_id: root,
            restored_at: now,
            restore_count: record.restore_count + 1,
        })?;

        tracing::info!(root = %root, events = events.len(), "archive restored to live storage");
        Ok(true)
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("lock_config", &self.lock_config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchivalService, ArchiveRecord};
    use crate::config::ArchivalConfig;
    use crate::core::EventSource;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn drafts(contexts: &[Value]) -> Vec<EventDraft> {
        contexts
            .iter()
            .enumerate()
            .map(|(i, context)| EventDraft {
                event_type: format!("E{i}"),
                source: EventSource::External,
                payload: None,
                machine_value: vec![format!("m.s{i}")],
                context: context.as_object().cloned().unwrap(),
                version: 1,
            })
            .collect()
    }

    fn chain(contexts: &[Value]) -> Vec<MachineEvent> {
        seal("m", drafts(contexts), ChainPosition::default(), Utc::now())
    }

    #[test]
    fn replay_merges_deltas_and_replaces_arrays() {
        let contexts = [
            json!({ "items": [1, 2, 3], "user": { "name": "a", "age": 1 } }),
            json!({ "items": [9], "user": { "name": "a", "age": 2 } }),
            json!({ "items": [9], "user": { "name": "b", "age": 2 }, "flag": true }),
        ];
        let snapshot = replay(&chain(&contexts)).unwrap();

        assert_eq!(Value::Object(snapshot.context), contexts[2]);
        assert_eq!(snapshot.value, vec!["m.s2".to_string()]);
        assert_eq!(snapshot.last_sequence, 3);
    }

    #[test]
    fn replay_applies_removals() {
        let contexts = [
            json!({ "a": 1, "nested": { "x": 1, "y": 2 } }),
            json!({ "a": 1, "nested": { "x": 1 } }),
            json!({ "nested": { "x": 1 } }),
        ];
        let snapshot = replay(&chain(&contexts)).unwrap();
        assert_eq!(Value::Object(snapshot.context), contexts[2]);
    }

    #[test]
    fn replay_orders_by_sequence() {
        let contexts = [json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })];
        let mut events = chain(&contexts);
        events.reverse();

        let snapshot = replay(&events).unwrap();
        assert_eq!(snapshot.context.get("n"), Some(&json!(3)));
    }

    #[test]
    fn replay_of_nothing_is_not_found() {
        assert!(matches!(replay(&[]), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn append_then_reconstruct() {
        let store = EventStore::in_memory();
        let events = chain(&[json!({ "n": 1 }), json!({ "n": 2 })]);
        let root = events[0].root_event_id;

        store.append(&events, true).unwrap();

        let snapshot = store.reconstruct(root).unwrap();
        assert_eq!(snapshot.context.get("n"), Some(&json!(2)));
        assert_eq!(store.latest_sequence(root).unwrap(), Some(2));
    }

    #[test]
    fn unknown_root_is_not_found() {
        let store = EventStore::in_memory();
        let err = store.load_chain(Uuid::now_v7()).unwrap_err();
        assert!(err.to_string().contains("machine state not found"));
    }

    #[test]
    fn non_transactional_writes_keep_earlier_events() {
        let store = EventStore::in_memory();
        let mut events = chain(&[json!({}), json!({}), json!({})]);
        let root = events[0].root_event_id;
        events[2].sequence_number = 1;

        assert!(store.append(&events, false).is_err());
        assert_eq!(store.events().query(root).unwrap().len(), 2);
    }

    #[test]
    fn transactional_writes_are_atomic() {
        let store = EventStore::in_memory();
        let mut events = chain(&[json!({}), json!({}), json!({})]);
        let root = events[0].root_event_id;
        events[2].sequence_number = 1;

        assert!(store.append(&events, true).is_err());
        assert!(store.events().query(root).unwrap().is_empty());
    }

    /// Archive table that moves the chain back to live storage right after
    /// a read, the way a concurrent writer holding the lock would.
    struct RestoringArchives {
        inner: MemoryArchiveRepository,
        events: Arc<MemoryEventRepository>,
        armed: AtomicBool,
    }

    impl ArchiveRepository for RestoringArchives {
        fn insert(&self, record: ArchiveRecord) -> Result<(), StoreError> {
            self.inner.insert(record)
        }

        fn get(&self, root: Uuid) -> Result<Option<ArchiveRecord>, StoreError> {
            let record = self.inner.get(root)?;
            if let Some(found) = &record {
                if self.armed.swap(false, Ordering::SeqCst) {
                    let events = decode_events(&ZlibCodec, &found.events_data)?;
                    self.events.append_all(&events)?;
                    self.inner.delete(root)?;
                }
            }
            Ok(record)
        }

        fn delete(&self, root: Uuid) -> Result<Option<ArchiveRecord>, StoreError> {
            self.inner.delete(root)
        }

        fn mark_restored(&self, root: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.mark_restored(root, at)
        }

        fn put_restore_mark(&self, mark: RestoreMark) -> Result<(), StoreError> {
            self.inner.put_restore_mark(mark)
        }

        fn restore_mark(&self, root: Uuid) -> Result<Option<RestoreMark>, StoreError> {
            self.inner.restore_mark(root)
        }

        fn all(&self) -> Result<Vec<ArchiveRecord>, StoreError> {
            self.inner.all()
        }
    }

    #[test]
    fn read_racing_a_restore_returns_live_rows() {
        let events = Arc::new(MemoryEventRepository::new());
        let archives = Arc::new(RestoringArchives {
            inner: MemoryArchiveRepository::new(),
            events: Arc::clone(&events),
            armed: AtomicBool::new(false),
        });
        let store = EventStore::new(
            events,
            archives.clone(),
            Arc::new(MemoryLocks::new()),
            Arc::new(ZlibCodec),
            &EngineConfig::default(),
        );

        let now = Utc::now();
        let written = seal(
            "m",
            drafts(&[json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })]),
            ChainPosition::default(),
            now - chrono::Duration::days(40),
        );
        let root = written[0].root_event_id;
        store.append(&written, true).unwrap();
        ArchivalService::new(store.clone(), ArchivalConfig::default())
            .archive_root(root, now)
            .unwrap();
        assert!(!store.events().exists(root).unwrap());

        archives.armed.store(true, Ordering::SeqCst);
        let loaded = store.load_chain(root).unwrap();

        assert_eq!(loaded, written);
        assert!(store.archives().get(root).unwrap().is_none());
        assert_eq!(store.events().query(root).unwrap().len(), 3);
    }

    #[test]
    fn lock_is_exclusive_per_root() {
        let store = EventStore::in_memory_with(&EngineConfig {
            locks: LockConfig {
                wait_ms: 10,
                hold_ms: 60_000,
            },
            ..EngineConfig::default()
        });
        let root = Uuid::now_v7();

        let guard = store.lock(root).unwrap();
        assert!(store.is_locked(root));
        assert!(store.lock(root).is_err());
        drop(guard);
        assert!(!store.is_locked(root));
    }
}
