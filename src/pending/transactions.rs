//! Pending-transaction queues
//!
//! Local-store inserts that failed are captured as durable ordered queues,
//! one JSON file per entity kind, and replayed at the start of the next
//! tracked run before any catalog work. Replay order is collection, then
//! granule, then polygon point, so parent rows always land before the rows
//! that reference them. Replay is fail-fast: on the first insert that still
//! fails, every not-yet-replayed entry (the failed one included) is
//! re-serialized and the run aborts, leaving recovery state no worse than
//! before.

use super::{read_locked, remove_state, write_atomic, PendingError};
use crate::model::CatalogModel;
use crate::store::{CollectionRow, GranuleRow, GranuleStore, PolyPointRow};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Replay failure: the store still refuses an entry.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// An entry could not be inserted; the queue was re-persisted from that
    /// entry onward
    #[error("pending {kind} transaction could not be replayed: {entry}")]
    InsertFailed {
        /// Entity kind of the failed entry
        kind: &'static str,
        /// Description of the failed entry
        entry: String,
    },

    /// The queue file itself could not be handled
    #[error(transparent)]
    Pending(#[from] PendingError),
}

/// A replayable store row.
pub trait TxRecord: Serialize + DeserializeOwned {
    /// Entity kind, used in file names and messages.
    const KIND: &'static str;

    /// Short description for messages.
    fn describe(&self) -> String;

    /// Attempt the insert; true on success.
    fn insert(&self, store: &dyn GranuleStore) -> bool;
}

impl TxRecord for CollectionRow {
    const KIND: &'static str = "collection";

    fn describe(&self) -> String {
        self.coll_id.clone()
    }

    fn insert(&self, store: &dyn GranuleStore) -> bool {
        store.insert_collection(self)
    }
}

impl TxRecord for GranuleRow {
    const KIND: &'static str = "granule";

    fn describe(&self) -> String {
        self.gran_id.clone()
    }

    fn insert(&self, store: &dyn GranuleStore) -> bool {
        store.insert_granule(self)
    }
}

impl TxRecord for PolyPointRow {
    const KIND: &'static str = "polypoint";

    fn describe(&self) -> String {
        format!("{} ({}, {})", self.gran_id, self.latitude, self.longitude)
    }

    fn insert(&self, store: &dyn GranuleStore) -> bool {
        store.insert_polypoint(self)
    }
}

/// One durable ordered queue of rows of a single entity kind.
pub struct PendingQueue<R: TxRecord> {
    path: PathBuf,
    _marker: PhantomData<R>,
}

impl<R: TxRecord> PendingQueue<R> {
    fn new(data_root: &Path) -> Self {
        PendingQueue {
            path: data_root.join(format!("_pending_{}s.json", R::KIND)),
            _marker: PhantomData,
        }
    }

    /// Whether the queue file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn load(&self) -> Result<Vec<R>, PendingError> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let contents = read_locked(&self.path)?;
        serde_json::from_str(&contents).map_err(|e| PendingError::Serialization(e.to_string()))
    }

    fn write(&self, entries: &[R]) -> Result<(), PendingError> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| PendingError::Serialization(e.to_string()))?;
        write_atomic(&self.path, &json)
    }

    /// Append entries, preserving what earlier runs already queued.
    pub fn append(&self, entries: Vec<R>) -> Result<(), PendingError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut all = self.load()?;
        all.extend(entries);
        info!(
            kind = R::KIND,
            queued = all.len(),
            "pending transactions captured"
        );
        self.write(&all)
    }

    /// Replay the queue in order. On the first entry the store still
    /// rejects, the remainder (that entry first) is re-persisted and the
    /// replay aborts. The queue file is removed only after every entry
    /// landed.
    pub fn replay(&self, store: &dyn GranuleStore) -> Result<(), ReplayError> {
        let entries = self.load()?;
        if entries.is_empty() {
            return remove_state(&self.path).map_err(ReplayError::from);
        }
        info!(kind = R::KIND, entries = entries.len(), "replaying pending transactions");
        for (idx, entry) in entries.iter().enumerate() {
            if !entry.insert(store) {
                let failed = entry.describe();
                warn!(
                    kind = R::KIND,
                    entry = %failed,
                    remaining = entries.len() - idx,
                    "pending transaction still failing, re-queueing the remainder"
                );
                self.write(&entries[idx..])?;
                return Err(ReplayError::InsertFailed {
                    kind: R::KIND,
                    entry: failed,
                });
            }
        }
        remove_state(&self.path)?;
        Ok(())
    }
}

/// Presence of pending transactions, by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingKinds {
    /// Collection queue exists
    pub collection: bool,
    /// Granule queue exists
    pub granule: bool,
    /// Polygon-point queue exists
    pub polypoint: bool,
}

impl PendingKinds {
    /// Whether any queue exists.
    pub fn any(self) -> bool {
        self.collection || self.granule || self.polypoint
    }
}

/// The three pending-transaction queues of one data root.
pub struct PendingTransactionStore {
    collections: PendingQueue<CollectionRow>,
    granules: PendingQueue<GranuleRow>,
    polypoints: PendingQueue<PolyPointRow>,
}

impl PendingTransactionStore {
    /// Store rooted at the data root.
    pub fn new(data_root: &Path) -> Self {
        PendingTransactionStore {
            collections: PendingQueue::new(data_root),
            granules: PendingQueue::new(data_root),
            polypoints: PendingQueue::new(data_root),
        }
    }

    /// Which queues currently exist.
    pub fn has_pending(&self) -> PendingKinds {
        PendingKinds {
            collection: self.collections.exists(),
            granule: self.granules.exists(),
            polypoint: self.polypoints.exists(),
        }
    }

    /// Replay every queue in referential-integrity order: collections,
    /// then granules, then polygon points. The first failure aborts the
    /// whole replay; later queues are left untouched.
    pub fn replay_all(&self, store: &dyn GranuleStore) -> Result<(), ReplayError> {
        self.collections.replay(store)?;
        self.granules.replay(store)?;
        self.polypoints.replay(store)?;
        info!("pending transactions fully replayed");
        Ok(())
    }

    /// Append every insert-failed entity of the model to its queue.
    pub fn capture(&self, model: &CatalogModel) -> Result<(), PendingError> {
        let mut collections = Vec::new();
        let mut granules = Vec::new();
        let mut polypoints = Vec::new();

        for collection in &model.collections {
            if collection.has_failed_insert() {
                collections.push(CollectionRow::from(collection));
            }
            for granule in collection.granules() {
                if granule.has_failed_insert() {
                    granules.push(GranuleRow::new(&collection.id, granule));
                }
                for point in granule.polygon() {
                    if point.has_failed_insert {
                        polypoints.push(PolyPointRow::new(&granule.id, point));
                    }
                }
            }
        }

        self.collections.append(collections)?;
        self.granules.append(granules)?;
        self.polypoints.append(polypoints)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FlakyStore {
        fail_after: Cell<usize>,
    }

    impl FlakyStore {
        fn failing_after(n: usize) -> Self {
            FlakyStore {
                fail_after: Cell::new(n),
            }
        }
    }

    impl GranuleStore for FlakyStore {
        fn granule_exists(&self, _gran_id: &str) -> bool {
            false
        }

        fn collection_exists(&self, _coll_id: &str) -> bool {
            false
        }

        fn insert_collection(&self, _row: &CollectionRow) -> bool {
            let left = self.fail_after.get();
            if left == 0 {
                return false;
            }
            self.fail_after.set(left - 1);
            true
        }

        fn insert_granule(&self, _row: &GranuleRow) -> bool {
            self.insert_collection(&collection_row("x"))
        }

        fn insert_polypoint(&self, _row: &PolyPointRow) -> bool {
            self.insert_collection(&collection_row("x"))
        }
    }

    fn collection_row(id: &str) -> CollectionRow {
        CollectionRow {
            coll_id: id.to_string(),
            short_name: "TEST".to_string(),
            archive_center: "ARC".to_string(),
            description: "d".to_string(),
            begin_date_time: None,
            end_date_time: None,
            doi: "NoDOIauth/NoDOI".to_string(),
        }
    }

    #[test]
    fn test_replay_removes_queue_on_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let queue: PendingQueue<CollectionRow> = PendingQueue::new(dir.path());
        queue
            .append(vec![collection_row("C1"), collection_row("C2")])
            .unwrap();
        assert!(queue.exists());

        queue.replay(&FlakyStore::failing_after(usize::MAX)).unwrap();
        assert!(!queue.exists());
    }

    #[test]
    fn test_replay_requeues_remainder_on_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let queue: PendingQueue<CollectionRow> = PendingQueue::new(dir.path());
        queue
            .append(vec![
                collection_row("C1"),
                collection_row("C2"),
                collection_row("C3"),
            ])
            .unwrap();

        // First entry lands, the second fails.
        let err = queue.replay(&FlakyStore::failing_after(1)).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::InsertFailed {
                kind: "collection",
                ..
            }
        ));

        // The failed entry and everything after it survive, in order.
        let remaining = queue.load().unwrap();
        let ids: Vec<&str> = remaining.iter().map(|r| r.coll_id.as_str()).collect();
        assert_eq!(ids, vec!["C2", "C3"]);
    }

    #[test]
    fn test_append_preserves_existing_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let queue: PendingQueue<CollectionRow> = PendingQueue::new(dir.path());
        queue.append(vec![collection_row("C1")]).unwrap();
        queue.append(vec![collection_row("C2")]).unwrap();
        let all = queue.load().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].coll_id, "C1");
        assert_eq!(all[1].coll_id, "C2");
    }

    #[test]
    fn test_replay_all_stops_at_first_failing_queue() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = PendingTransactionStore::new(dir.path());
        store
            .collections
            .append(vec![collection_row("C1")])
            .unwrap();
        store
            .granules
            .append(vec![GranuleRow {
                gran_id: "G1".to_string(),
                coll_id: "C1".to_string(),
                unit_representation: "g.hdf".to_string(),
                size_mb: 1.0,
                begin_date_time: None,
                end_date_time: None,
                has_polygon: false,
                west: -180.0,
                south: -90.0,
                east: 180.0,
                north: 90.0,
                local_file_name: None,
            }])
            .unwrap();

        // The collection lands, the granule fails; the polypoint queue (absent
        // here) is never touched and the granule queue survives.
        let result = store.replay_all(&FlakyStore::failing_after(1));
        assert!(result.is_err());
        let kinds = store.has_pending();
        assert!(!kinds.collection);
        assert!(kinds.granule);
        assert!(!kinds.polypoint);
        assert!(kinds.any());
    }

    #[test]
    fn test_has_pending_empty_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = PendingTransactionStore::new(dir.path());
        assert!(!store.has_pending().any());
    }

    #[test]
    fn test_capture_includes_tainted_granules_regardless_of_status() {
        use crate::model::{Collection, Granule};
        use crate::query::BoundingBox;
        use crate::DownloadStatus;

        let mut model = CatalogModel::new();
        model.merge_collection(Collection::new(
            "C1".to_string(),
            "TEST".to_string(),
            "ARC".to_string(),
            "d".to_string(),
            None,
            None,
            "NoDOIauth/NoDOI".to_string(),
        ));
        for (id, status) in [
            ("G-ok", DownloadStatus::Success),
            ("G-fail", DownloadStatus::Failed),
        ] {
            let mut g = Granule::new(
                id.to_string(),
                format!("{id}.hdf"),
                1.0,
                None,
                None,
                false,
                BoundingBox::GLOBAL,
                format!("https://a.example/{id}"),
            );
            g.set_download_status(status);
            model.merge_granule("C1", g);
        }
        // A failed collection insert taints every child, downloaded or not.
        model.collections[0].mark_insert_failed_cascading();

        let dir = tempfile::TempDir::new().unwrap();
        let store = PendingTransactionStore::new(dir.path());
        store.capture(&model).unwrap();

        let granules = store.granules.load().unwrap();
        let ids: Vec<&str> = granules.iter().map(|g| g.gran_id.as_str()).collect();
        assert_eq!(ids, vec!["G-ok", "G-fail"]);
        assert_eq!(store.collections.load().unwrap().len(), 1);
    }
}
