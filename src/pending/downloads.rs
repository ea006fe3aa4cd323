//! Pending-download record
//!
//! After a run with transfer failures, every failed collection is serialized
//! with only its failed granules so the next invocation can merge them back
//! into its working set and retry. The record must survive even when it
//! cannot be written: the last-resort path emits the full serialized content
//! into the operational log so no failed-granule information is ever
//! silently dropped.

use super::{read_locked, remove_state, write_atomic, PendingError};
use crate::model::{CatalogModel, Collection, Granule, PolyPoint};
use crate::query::BoundingBox;
use crate::DownloadStatus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// File name of the pending-download record, inside the data root.
pub const PENDING_DOWNLOADS_FILE: &str = "pending_downloads.json";

/// Serialized form of a granule's spatial extent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PendingGeometry {
    /// Polygon vertices as (latitude, longitude) pairs
    Polygon {
        /// Vertices
        points: Vec<(f64, f64)>,
    },
    /// Bounding box
    Bbox {
        /// West boundary
        w: f64,
        /// South boundary
        s: f64,
        /// East boundary
        e: f64,
        /// North boundary
        n: f64,
    },
}

/// One granule awaiting retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingGranule {
    /// Catalog granule id
    pub id: String,
    /// Unit representation
    pub unit_representation: String,
    /// Size estimate in MB
    pub size_mb: f64,
    /// Coverage start
    pub begin_date_time: Option<String>,
    /// Coverage end
    pub end_date_time: Option<String>,
    /// Attempts so far
    pub download_try_count: u32,
    /// Terminal status of the failed run
    pub download_status: DownloadStatus,
    /// Spatial extent
    pub geometry: PendingGeometry,
    /// Download URL
    pub access_url: String,
    /// Local path the transfer was aimed at
    pub local_file_name: Option<PathBuf>,
}

/// One collection with granules awaiting retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCollection {
    /// Catalog collection id
    pub id: String,
    /// Dataset short name
    pub short_name: String,
    /// Archive center
    pub archive_center: String,
    /// Description
    pub description: String,
    /// Coverage start
    pub begin_date_time: Option<String>,
    /// Coverage end
    pub end_date_time: Option<String>,
    /// DOI
    pub doi: String,
    /// Failed granules only
    pub granules: Vec<PendingGranule>,
}

/// The whole pending-download record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingDownloads {
    /// Failed collections, failed granules only
    pub collections: Vec<PendingCollection>,
}

impl PendingDownloads {
    /// Capture every failed collection of the model, keeping only its
    /// granules with a failure status.
    pub fn capture(model: &CatalogModel) -> Self {
        let mut collections = Vec::new();
        for collection in &model.collections {
            if !collection.has_failed_download() {
                continue;
            }
            let granules: Vec<PendingGranule> = collection
                .granules()
                .iter()
                .filter(|g| g.download_status().is_failure())
                .map(pending_granule)
                .collect();
            if granules.is_empty() {
                continue;
            }
            collections.push(PendingCollection {
                id: collection.id.clone(),
                short_name: collection.short_name.clone(),
                archive_center: collection.archive_center.clone(),
                description: collection.description.clone(),
                begin_date_time: collection.begin_date_time.clone(),
                end_date_time: collection.end_date_time.clone(),
                doi: collection.doi.clone(),
                granules,
            });
        }
        PendingDownloads { collections }
    }

    /// Total granules awaiting retry.
    pub fn granule_count(&self) -> usize {
        self.collections.iter().map(|c| c.granules.len()).sum()
    }

    /// Fold this record into a model. Unknown collections are added (without
    /// granules from the record yet), then every granule re-enters through
    /// the model's merge rules with its try count already incremented and
    /// its status reset.
    pub fn merge_into(self, model: &mut CatalogModel) {
        for pending in self.collections {
            model.merge_collection(Collection::new(
                pending.id.clone(),
                pending.short_name,
                pending.archive_center,
                pending.description,
                pending.begin_date_time,
                pending.end_date_time,
                pending.doi,
            ));
            for granule in pending.granules {
                model.merge_granule(&pending.id, revive_granule(granule));
            }
        }
    }
}

fn pending_granule(g: &Granule) -> PendingGranule {
    let geometry = if g.has_polygon {
        PendingGeometry::Polygon {
            points: g.polygon().iter().map(|p| (p.latitude, p.longitude)).collect(),
        }
    } else {
        PendingGeometry::Bbox {
            w: g.bbox.west,
            s: g.bbox.south,
            e: g.bbox.east,
            n: g.bbox.north,
        }
    };
    PendingGranule {
        id: g.id.clone(),
        unit_representation: g.unit_representation.clone(),
        size_mb: g.size_mb,
        begin_date_time: g.begin_date_time.clone(),
        end_date_time: g.end_date_time.clone(),
        download_try_count: g.download_try_count(),
        download_status: g.download_status(),
        geometry,
        access_url: g.access_url.clone(),
        local_file_name: g.local_file_name().map(Path::to_path_buf),
    }
}

fn revive_granule(pending: PendingGranule) -> Granule {
    let (has_polygon, bbox, points) = match pending.geometry {
        PendingGeometry::Polygon { points } => (true, BoundingBox::GLOBAL, points),
        PendingGeometry::Bbox { w, s, e, n } => (
            false,
            BoundingBox {
                west: w,
                south: s,
                east: e,
                north: n,
            },
            Vec::new(),
        ),
    };
    let mut granule = Granule::new(
        pending.id,
        pending.unit_representation,
        pending.size_mb,
        pending.begin_date_time,
        pending.end_date_time,
        has_polygon,
        bbox,
        pending.access_url,
    )
    .with_try_count(pending.download_try_count + 1);
    for (latitude, longitude) in points {
        granule.push_point(PolyPoint::new(latitude, longitude));
    }
    granule
}

/// Store for the pending-download record.
pub struct PendingDownloadStore {
    path: PathBuf,
}

impl PendingDownloadStore {
    /// Store rooted at the data root.
    pub fn new(data_root: &Path) -> Self {
        PendingDownloadStore {
            path: data_root.join(PENDING_DOWNLOADS_FILE),
        }
    }

    /// Whether a record from an earlier run exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist the model's failures. An empty capture removes any stale
    /// record instead.
    ///
    /// A record that cannot be written is emitted in full into the log at
    /// error level; the failure is not propagated because aborting here
    /// would lose the same information the record exists to keep.
    pub fn save(&self, model: &CatalogModel) -> Result<(), PendingError> {
        let record = PendingDownloads::capture(model);
        if record.collections.is_empty() {
            return remove_state(&self.path);
        }
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| PendingError::Serialization(e.to_string()))?;
        match write_atomic(&self.path, &json) {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    granules = record.granule_count(),
                    "pending downloads saved"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    error = %e,
                    content = %json,
                    "could not persist pending downloads, manual recovery required"
                );
                Ok(())
            }
        }
    }

    /// Load the record. Call only when [`exists`](Self::exists) is true.
    pub fn load(&self) -> Result<PendingDownloads, PendingError> {
        let contents = read_locked(&self.path)?;
        let record: PendingDownloads = serde_json::from_str(&contents)
            .map_err(|e| PendingError::Serialization(e.to_string()))?;
        info!(
            path = %self.path.display(),
            granules = record.granule_count(),
            "pending downloads loaded"
        );
        Ok(record)
    }

    /// Delete the record. Called only after a successful merge; an earlier
    /// deletion would forfeit the retries on a crash in between.
    pub fn remove(&self) -> Result<(), PendingError> {
        remove_state(&self.path)
    }
}
