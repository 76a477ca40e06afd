//! Storage backends for live event chains.

use super::error::StoreError;
use super::event::MachineEvent;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Summary of one live chain, used to find archival candidates.
#[derive(Clone, Debug, PartialEq)]
pub struct RootActivity {
    pub root_event_id: Uuid,
    pub machine_id: String,
    pub last_event_at: DateTime<Utc>,
    pub event_count: usize,
}

/// Append-only event table keyed by root event id.
///
/// Implementations must reject events whose sequence number does not
/// strictly increase within their root.
pub trait EventRepository: Send + Sync {
    /// Append a batch atomically: either every event is stored or none is.
    fn append_all(&self, events: &[MachineEvent]) -> Result<(), StoreError>;

    fn append(&self, event: &MachineEvent) -> Result<(), StoreError> {
        self.append_all(std::slice::from_ref(event))
    }

    /// All events of a root ordered by sequence number.
    fn query(&self, root: Uuid) -> Result<Vec<MachineEvent>, StoreError>;

    /// Delete every event of a root, returning how many were removed.
    fn delete(&self, root: Uuid) -> Result<usize, StoreError>;

    fn exists(&self, root: Uuid) -> Result<bool, StoreError> {
        Ok(!self.query(root)?.is_empty())
    }

    fn latest_sequence(&self, root: Uuid) -> Result<Option<u64>, StoreError> {
        Ok(self.query(root)?.last().map(|event| event.sequence_number))
    }

    /// One entry per live root.
    fn activity(&self) -> Result<Vec<RootActivity>, StoreError>;
}

/// In-memory event table.
#[derive(Debug, Default)]
pub struct MemoryEventRepository {
    chains: RwLock<BTreeMap<Uuid, Vec<MachineEvent>>>,
}

impl MemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all roots.
    pub fn len(&self) -> usize {
        self.chains.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventRepository for MemoryEventRepository {
    fn append_all(&self, events: &[MachineEvent]) -> Result<(), StoreError> {
        let mut chains = self.chains.write();

        let mut last_seen: HashMap<Uuid, u64> = HashMap::new();
        for event in events {
            let root = event.root_event_id;
            let last = match last_seen.get(&root) {
                Some(last) => *last,
                None => chains
                    .get(&root)
                    .and_then(|chain| chain.last())
                    .map(|event| event.sequence_number)
                    .unwrap_or(0),
            };
            if event.sequence_number <= last {
                return Err(StoreError::SequenceConflict {
                    root,
                    last,
                    found: event.sequence_number,
                });
            }
            last_seen.insert(root, event.sequence_number);
        }

        for event in events {
            chains
                .entry(event.root_event_id)
                .or_default()
                .push(event.clone());
        }
        Ok(())
    }

    fn query(&self, root: Uuid) -> Result<Vec<MachineEvent>, StoreError> {
        Ok(self.chains.read().get(&root).cloned().unwrap_or_default())
    }

    fn delete(&self, root: Uuid) -> Result<usize, StoreError> {
        Ok(self
            .chains
            .write()
            .remove(&root)
            .map(|chain| chain.len())
            .unwrap_or(0))
    }

    fn exists(&self, root: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .chains
            .read()
            .get(&root)
            .is_some_and(|chain| !chain.is_empty()))
    }

    fn latest_sequence(&self, root: Uuid) -> Result<Option<u64>, StoreError> {
        Ok(self
            .chains
            .read()
            .get(&root)
            .and_then(|chain| chain.last())
            .map(|event| event.sequence_number))
    }

    fn activity(&self) -> Result<Vec<RootActivity>, StoreError> {
        Ok(self
            .chains
            .read()
            .iter()
            .filter_map(|(root, chain)| {
                let last = chain.last()?;
                Some(RootActivity {
                    root_event_id: *root,
                    machine_id: last.machine_id.clone(),
                    last_event_at: last.created_at,
                    event_count: chain.len(),
                })
            })
            .collect())
    }
}
