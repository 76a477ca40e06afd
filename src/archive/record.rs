//! Archive records and their storage.

use crate::store::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One archived event chain.
///
/// A root has either live events or an archive record, never both once an
/// archive or restore operation has completed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub root_event_id: Uuid,
    pub machine_id: String,
    pub events_data: Vec<u8>,
    pub event_count: usize,
    pub original_size: usize,
    pub compressed_size: usize,
    /// `None` when the chain was small enough to store uncompressed.
    pub compression_level: Option<u32>,
    pub archived_at: DateTime<Utc>,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub restore_count: u32,
    pub last_restored_at: Option<DateTime<Utc>>,
}

impl ArchiveRecord {
    /// Fraction of the original size saved by compression.
    pub fn savings_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        1.0 - self.compressed_size as f64 / self.original_size as f64
    }
}

/// Trace left when a chain is restored to live storage.
///
/// Used to enforce the restore cooldown before the root may be archived
/// again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestoreMark {
    pub root_event_id: Uuid,
    pub restored_at: DateTime<Utc>,
    pub restore_count: u32,
}

/// Storage for archive records.
pub trait ArchiveRepository: Send + Sync {
    fn insert(&self, record: ArchiveRecord) -> Result<(), StoreError>;

    fn get(&self, root: Uuid) -> Result<Option<ArchiveRecord>, StoreError>;

    /// Delete a record, returning it.
    fn delete(&self, root: Uuid) -> Result<Option<ArchiveRecord>, StoreError>;

    /// Count a read served from the archive.
    fn mark_restored(&self, root: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Remember that a root was moved back to live storage.
    fn put_restore_mark(&self, mark: RestoreMark) -> Result<(), StoreError>;

    fn restore_mark(&self, root: Uuid) -> Result<Option<RestoreMark>, StoreError>;

    fn all(&self) -> Result<Vec<ArchiveRecord>, StoreError>;
}

#[derive(Debug, Default)]
struct ArchiveTables {
    records: BTreeMap<Uuid, ArchiveRecord>,
    marks: BTreeMap<Uuid, RestoreMark>,
}

/// In-memory archive table.
#[derive(Debug, Default)]
pub struct MemoryArchiveRepository {
    tables: RwLock<ArchiveTables>,
}

impl MemoryArchiveRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArchiveRepository for MemoryArchiveRepository {
    fn insert(&self, record: ArchiveRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.records.contains_key(&record.root_event_id) {
            return Err(StoreError::Backend(format!(
                "archive for root {} already exists",
                record.root_event_id
            )));
        }
        tables.records.insert(record.root_event_id, record);
        Ok(())
    }

    fn get(&self, root: Uuid) -> Result<Option<ArchiveRecord>, StoreError> {
        Ok(self.tables.read().records.get(&root).cloned())
    }

    fn delete(&self, root: Uuid) -> Result<Option<ArchiveRecord>, StoreError> {
        Ok(self.tables.write().records.remove(&root))
    }

    fn mark_restored(&self, root: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.records.get_mut(&root) {
            Some(record) => {
                record.restore_count += 1;
                record.last_restored_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::NotFound(root)),
        }
    }

    fn put_restore_mark(&self, mark: RestoreMark) -> Result<(), StoreError> {
        self.tables.write().marks.insert(mark.root_event_id, mark);
        Ok(())
    }

    fn restore_mark(&self, root: Uuid) -> Result<Option<RestoreMark>, StoreError> {
        Ok(self.tables.read().marks.get(&root).cloned())
    }

    fn all(&self) -> Result<Vec<ArchiveRecord>, StoreError> {
        Ok(self.tables.read().records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(root: Uuid) -> ArchiveRecord {
        let now = Utc::now();
        ArchiveRecord {
            root_event_id: root,
            machine_id: "m".into(),
            events_data: b"[]".to_vec(),
            event_count: 0,
            original_size: 200,
            compressed_size: 50,
            compression_level: Some(6),
            archived_at: now,
            first_event_at: now,
            last_event_at: now,
            restore_count: 0,
            last_restored_at: None,
        }
    }

    #[test]
    fn root_is_unique() {
        let repo = MemoryArchiveRepository::new();
        let root = Uuid::now_v7();
        repo.insert(record(root)).unwrap();
        assert!(repo.insert(record(root)).is_err());
    }

    #[test]
    fn mark_restored_counts_reads() {
        let repo = MemoryArchiveRepository::new();
        let root = Uuid::now_v7();
        repo.insert(record(root)).unwrap();

        let at = Utc::now();
        repo.mark_restored(root, at).unwrap();
        repo.mark_restored(root, at).unwrap();

        let stored = repo.get(root).unwrap().unwrap();
        assert_eq!(stored.restore_count, 2);
        assert_eq!(stored.last_restored_at, Some(at));
    }

    #[test]
    fn delete_returns_record_once() {
        let repo = MemoryArchiveRepository::new();
        let root = Uuid::now_v7();
        repo.insert(record(root)).unwrap();

        assert!(repo.delete(root).unwrap().is_some());
        assert!(repo.get(root).unwrap().is_none());
        assert!(repo.delete(root).unwrap().is_none());
    }

    #[test]
    fn restore_marks_outlive_records() {
        let repo = MemoryArchiveRepository::new();
        let root = Uuid::now_v7();
        let at = Utc::now();

        repo.put_restore_mark(RestoreMark {
            root_event_id: root,
            restored_at: at,
            restore_count: 3,
        })
        .unwrap();

        let mark = repo.restore_mark(root).unwrap().unwrap();
        assert_eq!(mark.restored_at, at);
        assert_eq!(mark.restore_count, 3);
        assert!(repo.restore_mark(Uuid::now_v7()).unwrap().is_none());
    }

    #[test]
    fn savings_ratio_reflects_sizes() {
        let record = record(Uuid::now_v7());
        assert!((record.savings_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
