//! Local persistence gateway
//!
//! The [`GranuleStore`] trait is the only way the rest of the crate touches
//! the local store. Its operations report success or failure as booleans and
//! never propagate storage errors: a failed insert taints the entity in the
//! model (cascading to children where referential integrity demands it) and
//! the tainted rows are captured as pending transactions for the next run.

use crate::model::{CatalogModel, Collection, Granule, PolyPoint};
use crate::DownloadStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Errors opening or bootstrapping the store. Per-row insert failures are
/// reported as booleans, not errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("store error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// A collection row as stored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRow {
    /// Catalog collection id
    pub coll_id: String,
    /// Dataset short name
    pub short_name: String,
    /// Archive center
    pub archive_center: String,
    /// Description
    pub description: String,
    /// Coverage start; absent values become SQL NULL
    pub begin_date_time: Option<String>,
    /// Coverage end; absent values become SQL NULL
    pub end_date_time: Option<String>,
    /// DOI
    pub doi: String,
}

impl From<&Collection> for CollectionRow {
    fn from(c: &Collection) -> CollectionRow {
        CollectionRow {
            coll_id: c.id.clone(),
            short_name: c.short_name.clone(),
            archive_center: c.archive_center.clone(),
            description: c.description.clone(),
            begin_date_time: c.begin_date_time.clone(),
            end_date_time: c.end_date_time.clone(),
            doi: c.doi.clone(),
        }
    }
}

/// A granule row as stored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GranuleRow {
    /// Catalog granule id
    pub gran_id: String,
    /// Owning collection id
    pub coll_id: String,
    /// Unit representation
    pub unit_representation: String,
    /// Size estimate in MB
    pub size_mb: f64,
    /// Coverage start; absent values become SQL NULL
    pub begin_date_time: Option<String>,
    /// Coverage end; absent values become SQL NULL
    pub end_date_time: Option<String>,
    /// Whether the extent is a polygon
    pub has_polygon: bool,
    /// Bounding box west
    pub west: f64,
    /// Bounding box south
    pub south: f64,
    /// Bounding box east
    pub east: f64,
    /// Bounding box north
    pub north: f64,
    /// Local path the file was stored at
    pub local_file_name: Option<String>,
}

impl GranuleRow {
    /// Row for a granule of the given collection.
    pub fn new(coll_id: &str, g: &Granule) -> GranuleRow {
        GranuleRow {
            gran_id: g.id.clone(),
            coll_id: coll_id.to_string(),
            unit_representation: g.unit_representation.clone(),
            size_mb: g.size_mb,
            begin_date_time: g.begin_date_time.clone(),
            end_date_time: g.end_date_time.clone(),
            has_polygon: g.has_polygon,
            west: g.bbox.west,
            south: g.bbox.south,
            east: g.bbox.east,
            north: g.bbox.north,
            local_file_name: g
                .local_file_name()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }
}

/// A polygon-point row as stored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolyPointRow {
    /// Owning granule id
    pub gran_id: String,
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
}

impl PolyPointRow {
    /// Row for a point of the given granule.
    pub fn new(gran_id: &str, p: &PolyPoint) -> PolyPointRow {
        PolyPointRow {
            gran_id: gran_id.to_string(),
            latitude: p.latitude,
            longitude: p.longitude,
        }
    }
}

/// Persistence operations. Implementations log their own failures; callers
/// only see presence booleans and insert success flags. A store that cannot
/// even answer an existence query reports "not present", which at worst
/// causes a redundant download or a failed (and captured) insert.
pub trait GranuleStore {
    /// Whether a granule row with this id exists.
    fn granule_exists(&self, gran_id: &str) -> bool;

    /// Whether a collection row with this id exists.
    fn collection_exists(&self, coll_id: &str) -> bool;

    /// Insert a collection row; true on success.
    fn insert_collection(&self, row: &CollectionRow) -> bool;

    /// Insert a granule row; true on success.
    fn insert_granule(&self, row: &GranuleRow) -> bool;

    /// Insert a polygon-point row; true on success.
    fn insert_polypoint(&self, row: &PolyPointRow) -> bool;
}

/// Synchronize the local store with the run's outcome.
///
/// Collections absent from the store are inserted first; a failed collection
/// insert taints the collection and every descendant, and its granules are
/// skipped entirely (their rows would violate referential integrity).
/// Only granules whose transfer succeeded are inserted; a failed granule
/// insert taints the granule and its points and skips the points. Points are
/// inserted individually, each failure tainting only that point.
pub fn update(store: &dyn GranuleStore, model: &mut CatalogModel) {
    let mut inserted = 0usize;
    let mut tainted = 0usize;

    for collection in &mut model.collections {
        if collection.granules().is_empty() {
            continue;
        }
        if !store.collection_exists(&collection.id) {
            let row = CollectionRow::from(&*collection);
            if !store.insert_collection(&row) {
                warn!(collection = %collection.id, "collection insert failed, skipping its granules");
                collection.mark_insert_failed_cascading();
                tainted += 1;
                continue;
            }
            debug!(collection = %collection.id, "collection inserted");
        }

        let coll_id = collection.id.clone();
        for granule in collection.granules_mut() {
            if granule.download_status() != DownloadStatus::Success {
                continue;
            }
            let row = GranuleRow::new(&coll_id, granule);
            if !store.insert_granule(&row) {
                warn!(granule = %granule.id, "granule insert failed, skipping its points");
                granule.mark_insert_failed();
                tainted += 1;
                continue;
            }
            inserted += 1;

            let gran_id = granule.id.clone();
            let mut failed_points = Vec::new();
            for (idx, point) in granule.polygon().iter().enumerate() {
                let row = PolyPointRow::new(&gran_id, point);
                if !store.insert_polypoint(&row) {
                    failed_points.push(idx);
                }
            }
            if !failed_points.is_empty() {
                warn!(
                    granule = %gran_id,
                    points = failed_points.len(),
                    "polygon point inserts failed"
                );
                tainted += failed_points.len();
                for idx in failed_points {
                    granule.taint_point(idx);
                }
            }
        }
    }

    info!(inserted, tainted, "store update complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::BoundingBox;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Scriptable store recording every call, for taint-cascade tests.
    struct ScriptedStore {
        fail_collections: HashSet<String>,
        fail_granules: HashSet<String>,
        fail_points: bool,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedStore {
        fn new() -> Self {
            ScriptedStore {
                fail_collections: HashSet::new(),
                fail_granules: HashSet::new(),
                fail_points: false,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl GranuleStore for ScriptedStore {
        fn granule_exists(&self, _gran_id: &str) -> bool {
            false
        }

        fn collection_exists(&self, _coll_id: &str) -> bool {
            false
        }

        fn insert_collection(&self, row: &CollectionRow) -> bool {
            self.calls.borrow_mut().push(format!("C:{}", row.coll_id));
            !self.fail_collections.contains(&row.coll_id)
        }

        fn insert_granule(&self, row: &GranuleRow) -> bool {
            self.calls.borrow_mut().push(format!("G:{}", row.gran_id));
            !self.fail_granules.contains(&row.gran_id)
        }

        fn insert_polypoint(&self, row: &PolyPointRow) -> bool {
            self.calls.borrow_mut().push(format!("P:{}", row.gran_id));
            !self.fail_points
        }
    }

    fn model_with_downloaded_granule() -> CatalogModel {
        let mut model = CatalogModel::new();
        model.merge_collection(crate::model::Collection::new(
            "C1".to_string(),
            "TEST".to_string(),
            "ARC".to_string(),
            "d".to_string(),
            None,
            None,
            "NoDOIauth/NoDOI".to_string(),
        ));
        let mut g = crate::model::Granule::new(
            "G1".to_string(),
            "g1.hdf".to_string(),
            1.0,
            None,
            None,
            true,
            BoundingBox::GLOBAL,
            "https://a.example/g1".to_string(),
        );
        g.push_point(PolyPoint::new(45.0, -70.0));
        g.set_download_status(DownloadStatus::Success);
        model.merge_granule("C1", g);
        model
    }

    #[test]
    fn test_update_inserts_successful_granules() {
        let store = ScriptedStore::new();
        let mut model = model_with_downloaded_granule();
        update(&store, &mut model);
        assert_eq!(
            *store.calls.borrow(),
            vec!["C:C1".to_string(), "G:G1".to_string(), "P:G1".to_string()]
        );
        assert!(!model.collections[0].has_failed_insert());
    }

    #[test]
    fn test_update_skips_unfetched_granules() {
        let store = ScriptedStore::new();
        let mut model = model_with_downloaded_granule();
        model.collections[0].granules_mut()[0].set_download_status(DownloadStatus::Failed);
        update(&store, &mut model);
        assert_eq!(*store.calls.borrow(), vec!["C:C1".to_string()]);
    }

    #[test]
    fn test_collection_failure_cascades_and_skips_children() {
        let mut store = ScriptedStore::new();
        store.fail_collections.insert("C1".to_string());
        let mut model = model_with_downloaded_granule();
        update(&store, &mut model);
        assert_eq!(*store.calls.borrow(), vec!["C:C1".to_string()]);
        let c = &model.collections[0];
        assert!(c.has_failed_insert());
        assert!(c.granules()[0].has_failed_insert());
        assert!(c.granules()[0].polygon()[0].has_failed_insert);
    }

    #[test]
    fn test_granule_failure_cascades_to_points_only() {
        let mut store = ScriptedStore::new();
        store.fail_granules.insert("G1".to_string());
        let mut model = model_with_downloaded_granule();
        update(&store, &mut model);
        assert_eq!(
            *store.calls.borrow(),
            vec!["C:C1".to_string(), "G:G1".to_string()]
        );
        let c = &model.collections[0];
        assert!(!c.has_failed_insert());
        assert!(c.granules()[0].has_failed_insert());
        assert!(c.granules()[0].polygon()[0].has_failed_insert);
    }

    #[test]
    fn test_point_failure_taints_point_only() {
        let mut store = ScriptedStore::new();
        store.fail_points = true;
        let mut model = model_with_downloaded_granule();
        update(&store, &mut model);
        let c = &model.collections[0];
        assert!(!c.has_failed_insert());
        assert!(!c.granules()[0].has_failed_insert());
        assert!(c.granules()[0].polygon()[0].has_failed_insert);
    }
}
