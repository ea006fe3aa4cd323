//! Collection / Granule / PolyPoint entity graph
//!
//! The in-memory working set of one run. Collections own granules, granules
//! own polygon points; identity is the catalog id for collections and the
//! (collection id, granule id) pair for granules. The model also owns the
//! merge rules used when pending-download state from an earlier run is folded
//! back in, and the pre-download feasibility check.

use crate::catalog::CatalogClient;
use crate::query::{BoundingBox, DatasetQuery};
use crate::DownloadStatus;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Feasibility rejection: the planned download cannot fit.
#[derive(Debug, thiserror::Error)]
pub enum FeasibilityError {
    /// Estimated total meets or exceeds the measured free space
    #[error("estimated download size {total_mb:.1} MB meets or exceeds available disk space {available_mb:.1} MB")]
    DiskSpace {
        /// Estimated total in MB
        total_mb: f64,
        /// Measured free space in MB
        available_mb: f64,
    },

    /// Estimated total exceeds the configured per-run limit
    #[error("estimated download size {total_mb:.1} MB exceeds the download limit {limit_mb} MB")]
    LimitExceeded {
        /// Estimated total in MB
        total_mb: f64,
        /// Configured limit in MB
        limit_mb: u64,
    },
}

/// One vertex of a granule's spatial polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolyPoint {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Set when this point failed to insert into the local store
    pub has_failed_insert: bool,
}

impl PolyPoint {
    /// New untainted point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        PolyPoint {
            latitude,
            longitude,
            has_failed_insert: false,
        }
    }
}

/// One downloadable data file.
#[derive(Debug, Clone)]
pub struct Granule {
    /// Catalog granule id
    pub id: String,
    /// Human-readable unit representation (filename-like label)
    pub unit_representation: String,
    /// Size estimate in MB; 0.0 when the catalog gave none
    pub size_mb: f64,
    /// Coverage start datetime, if known
    pub begin_date_time: Option<String>,
    /// Coverage end datetime, if known
    pub end_date_time: Option<String>,
    /// Whether the spatial extent is a polygon rather than a bbox
    pub has_polygon: bool,
    /// Spatial bounding box
    pub bbox: BoundingBox,
    /// Download URL
    pub access_url: String,
    polygon: Vec<PolyPoint>,
    local_file_name: Option<PathBuf>,
    download_try_count: u32,
    download_status: DownloadStatus,
    has_failed_insert: bool,
}

impl Granule {
    /// New granule on its first download attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        unit_representation: String,
        size_mb: f64,
        begin_date_time: Option<String>,
        end_date_time: Option<String>,
        has_polygon: bool,
        bbox: BoundingBox,
        access_url: String,
    ) -> Self {
        Granule {
            id,
            unit_representation,
            size_mb,
            begin_date_time,
            end_date_time,
            has_polygon,
            bbox,
            access_url,
            polygon: Vec::new(),
            local_file_name: None,
            download_try_count: 1,
            download_status: DownloadStatus::default(),
            has_failed_insert: false,
        }
    }

    /// Set the try count, for granules re-entering from pending state.
    pub fn with_try_count(mut self, count: u32) -> Self {
        self.download_try_count = count;
        self
    }

    /// Polygon vertices.
    pub fn polygon(&self) -> &[PolyPoint] {
        &self.polygon
    }

    /// Append a polygon vertex.
    pub fn push_point(&mut self, point: PolyPoint) {
        self.polygon.push(point);
    }

    /// Resolved local path, set during transfer planning.
    pub fn local_file_name(&self) -> Option<&Path> {
        self.local_file_name.as_deref()
    }

    /// Record the resolved local path.
    pub fn set_local_file_name(&mut self, path: PathBuf) {
        self.local_file_name = Some(path);
    }

    /// Number of runs that have attempted this granule.
    pub fn download_try_count(&self) -> u32 {
        self.download_try_count
    }

    /// Current transfer status.
    pub fn download_status(&self) -> DownloadStatus {
        self.download_status
    }

    /// Record the transfer outcome.
    pub fn set_download_status(&mut self, status: DownloadStatus) {
        self.download_status = status;
    }

    /// Whether this granule failed to insert into the local store.
    pub fn has_failed_insert(&self) -> bool {
        self.has_failed_insert
    }

    /// Taint a single polygon point as insert-failed.
    pub fn taint_point(&mut self, idx: usize) {
        if let Some(point) = self.polygon.get_mut(idx) {
            point.has_failed_insert = true;
        }
    }

    /// Taint this granule and all of its polygon points as insert-failed.
    pub fn mark_insert_failed(&mut self) {
        self.has_failed_insert = true;
        for point in &mut self.polygon {
            point.has_failed_insert = true;
        }
    }
}

/// One dataset collection and its granules.
#[derive(Debug, Clone)]
pub struct Collection {
    /// Catalog collection id
    pub id: String,
    /// Dataset short name
    pub short_name: String,
    /// Archive center holding the dataset
    pub archive_center: String,
    /// Dataset description
    pub description: String,
    /// Coverage start datetime, if known
    pub begin_date_time: Option<String>,
    /// Coverage end datetime, if known
    pub end_date_time: Option<String>,
    /// Digital object identifier, `authority/name`
    pub doi: String,
    granules: Vec<Granule>,
    has_failed_download: bool,
    has_failed_insert: bool,
}

impl Collection {
    /// New collection with no granules.
    pub fn new(
        id: String,
        short_name: String,
        archive_center: String,
        description: String,
        begin_date_time: Option<String>,
        end_date_time: Option<String>,
        doi: String,
    ) -> Self {
        Collection {
            id,
            short_name,
            archive_center,
            description,
            begin_date_time,
            end_date_time,
            doi,
            granules: Vec::new(),
            has_failed_download: false,
            has_failed_insert: false,
        }
    }

    /// Granules of this collection.
    pub fn granules(&self) -> &[Granule] {
        &self.granules
    }

    /// Mutable granule access for status reconciliation.
    pub fn granules_mut(&mut self) -> &mut [Granule] {
        &mut self.granules
    }

    /// Append a granule without identity checks; use
    /// [`CatalogModel::merge_granule`] when duplicates are possible.
    pub fn push_granule(&mut self, granule: Granule) {
        self.granules.push(granule);
    }

    /// Sum of granule size estimates in MB.
    pub fn total_size_mb(&self) -> f64 {
        self.granules.iter().map(|g| g.size_mb).sum()
    }

    /// Whether any granule of this collection failed its transfer.
    pub fn has_failed_download(&self) -> bool {
        self.has_failed_download
    }

    /// Record that some granule of this collection failed its transfer.
    pub fn mark_download_failed(&mut self) {
        self.has_failed_download = true;
    }

    /// Whether this collection failed to insert into the local store.
    pub fn has_failed_insert(&self) -> bool {
        self.has_failed_insert
    }

    /// Taint this collection and every granule (and their points) as
    /// insert-failed. Used when the collection row itself cannot be stored,
    /// making every child row unstorable too.
    pub fn mark_insert_failed_cascading(&mut self) {
        self.has_failed_insert = true;
        for granule in &mut self.granules {
            granule.mark_insert_failed();
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Collection:     {}", self.id)?;
        writeln!(f, "  Short name:   {}", self.short_name)?;
        writeln!(f, "  Archive:      {}", self.archive_center)?;
        writeln!(f, "  DOI:          {}", self.doi)?;
        writeln!(
            f,
            "  Coverage:     {} .. {}",
            self.begin_date_time.as_deref().unwrap_or("unknown"),
            self.end_date_time.as_deref().unwrap_or("unknown")
        )?;
        writeln!(f, "  Granules:     {}", self.granules.len())?;
        writeln!(f, "  Total size:   {:.1} MB", self.total_size_mb())?;
        write!(f, "  Description:  {}", self.description)
    }
}

impl std::fmt::Display for Granule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Granule:        {}", self.id)?;
        writeln!(f, "  Name:         {}", self.unit_representation)?;
        writeln!(f, "  Size:         {:.1} MB", self.size_mb)?;
        writeln!(
            f,
            "  Coverage:     {} .. {}",
            self.begin_date_time.as_deref().unwrap_or("unknown"),
            self.end_date_time.as_deref().unwrap_or("unknown")
        )?;
        writeln!(
            f,
            "  Extent:       {}",
            if self.has_polygon {
                format!("polygon ({} points)", self.polygon.len())
            } else {
                format!("bbox {}", self.bbox)
            }
        )?;
        write!(f, "  URL:          {}", self.access_url)
    }
}

/// The working set of one run.
#[derive(Debug, Default)]
pub struct CatalogModel {
    /// Collections, in enumeration order
    pub collections: Vec<Collection>,
}

impl CatalogModel {
    /// Empty model.
    pub fn new() -> Self {
        CatalogModel::default()
    }

    /// Collection lookup by catalog id.
    pub fn collection(&self, id: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.id == id)
    }

    /// Mutable collection lookup by catalog id.
    pub fn collection_mut(&mut self, id: &str) -> Option<&mut Collection> {
        self.collections.iter_mut().find(|c| c.id == id)
    }

    /// Add a collection. When a collection with the same id is already
    /// present this is a no-op with a warning; the original entry keeps its
    /// granules.
    pub fn merge_collection(&mut self, collection: Collection) {
        if self.collection(&collection.id).is_some() {
            warn!(collection = %collection.id, "duplicate collection ignored");
            return;
        }
        self.collections.push(collection);
    }

    /// Add a granule to a collection. A granule already present under the
    /// same (collection, granule) identity is not duplicated; its try count
    /// becomes the bumped existing count or the incoming count, whichever is
    /// higher, so a count accumulated across earlier runs survives a fresh
    /// enumeration. A new granule is appended as-is.
    pub fn merge_granule(&mut self, collection_id: &str, granule: Granule) {
        let Some(collection) = self.collection_mut(collection_id) else {
            warn!(
                collection = %collection_id,
                granule = %granule.id,
                "granule for unknown collection dropped"
            );
            return;
        };
        if let Some(existing) = collection.granules.iter_mut().find(|g| g.id == granule.id) {
            existing.download_try_count =
                (existing.download_try_count + 1).max(granule.download_try_count);
            return;
        }
        collection.push_granule(granule);
    }

    /// Sum of all granule size estimates in MB.
    pub fn total_size_mb(&self) -> f64 {
        self.collections.iter().map(|c| c.total_size_mb()).sum()
    }

    /// Total granule count.
    pub fn granule_count(&self) -> usize {
        self.collections.iter().map(|c| c.granules.len()).sum()
    }

    /// Atomic pre-download feasibility decision over the whole working set.
    ///
    /// A non-positive total passes with a warning (the catalog gave no size
    /// metadata, so nothing can be concluded). Otherwise the total must be
    /// strictly below the measured free space and at most the configured
    /// limit. Runs before any directory or network work, so a rejected run
    /// leaves no on-disk trace.
    pub fn feasibility_check(
        &self,
        available_mb: f64,
        limit_mb: u64,
    ) -> Result<(), FeasibilityError> {
        let total_mb = self.total_size_mb();
        if total_mb <= 0.0 {
            warn!(
                total_mb,
                "no usable size metadata, proceeding without feasibility estimate"
            );
            return Ok(());
        }
        if total_mb >= available_mb {
            return Err(FeasibilityError::DiskSpace {
                total_mb,
                available_mb,
            });
        }
        if total_mb > limit_mb as f64 {
            return Err(FeasibilityError::LimitExceeded { total_mb, limit_mb });
        }
        info!(total_mb, available_mb, limit_mb, "feasibility check passed");
        Ok(())
    }

    /// Populate the model from the catalog: one dataset query at a time,
    /// dataset resolution then granule enumeration.
    ///
    /// A dataset query resolving to anything other than exactly one
    /// collection is skipped with a warning. A failed granule query leaves
    /// the collection empty, also with a warning. Neither aborts the run.
    pub async fn populate(
        &mut self,
        client: &dyn CatalogClient,
        queries: &[DatasetQuery],
        page_size: usize,
    ) {
        for query in queries {
            let records = match client.dataset_query(query).await {
                Ok(records) => records,
                Err(err) => {
                    warn!(dataset = %query.short_name, error = %err, "dataset query failed, skipping");
                    continue;
                }
            };
            if records.len() != 1 {
                warn!(
                    dataset = %query.short_name,
                    matches = records.len(),
                    "dataset query did not resolve to exactly one collection, skipping"
                );
                continue;
            }
            let Some(record) = records.into_iter().next() else {
                continue;
            };
            let collection: Collection = record.into();
            let collection_id = collection.id.clone();
            self.merge_collection(collection);

            match client.granule_query(&collection_id, query, page_size).await {
                Ok(granules) => {
                    info!(
                        collection = %collection_id,
                        granules = granules.len(),
                        "granules enumerated"
                    );
                    for record in granules {
                        self.merge_granule(&collection_id, record.into());
                    }
                }
                Err(err) => {
                    warn!(
                        collection = %collection_id,
                        error = %err,
                        "granule query failed, collection left empty"
                    );
                }
            }
        }
    }
}
