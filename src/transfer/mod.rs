//! Bounded-concurrency download engine
//!
//! Three phases over the working set. `plan` provisions the on-disk layout
//! (`root/archiveCenter/shortName/YYYY/DDD`), resolves local paths, filters
//! out granules already in the local store, and emits the transfer queue.
//! `run` drives the queue with at most N transfers in flight and yields one
//! terminal status per item. `reconcile` writes statuses back into the
//! model, and `sweep_failed` clears partial files left by failed transfers.

use crate::model::CatalogModel;
use crate::store::GranuleStore;
use crate::DownloadStatus;
use chrono::{Datelike, NaiveDate};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Default number of transfers in flight.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Hard ceiling on the transfer pool size.
pub const MAX_CONCURRENCY: usize = 32;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REDIRECTS: usize = 5;

/// Transfer-engine failures that abort a run (client construction only;
/// per-item failures become statuses, not errors).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// HTTP client could not be built
    #[error("transfer client error: {0}")]
    Client(String),
}

/// One queued transfer.
#[derive(Debug, Clone)]
pub struct TransferItem {
    /// Granule id, the key the status comes back under
    pub granule_id: String,
    /// Owning collection id
    pub collection_id: String,
    /// Source URL
    pub url: String,
    /// Destination path
    pub local_path: PathBuf,
}

/// The download engine for one run.
pub struct TransferEngine {
    client: reqwest::Client,
    concurrency: usize,
}

impl TransferEngine {
    /// Engine with the given pool size, clamped to [`MAX_CONCURRENCY`].
    pub fn new(concurrency: usize) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TRANSFER_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| TransferError::Client(e.to_string()))?;
        Ok(TransferEngine {
            client,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
        })
    }

    /// Provision the storage layout and build the transfer queue.
    ///
    /// Returns the queue plus the statuses already decided during planning:
    /// granules under an unprovisionable collection directory get `-2` (the
    /// whole collection is skipped), as do granules whose own holding
    /// directory fails or whose begin date cannot be turned into a
    /// `YYYY/DDD` leaf. Granules already present in the store (when one is
    /// given) stay at `0` and are excluded from the queue.
    pub fn plan(
        &self,
        root: &Path,
        model: &mut CatalogModel,
        store: Option<&dyn GranuleStore>,
    ) -> (Vec<TransferItem>, HashMap<String, DownloadStatus>) {
        let mut queue = Vec::new();
        let mut statuses: HashMap<String, DownloadStatus> = HashMap::new();

        for collection in &mut model.collections {
            if collection.granules().is_empty() {
                continue;
            }
            let collection_dir = root
                .join(&collection.archive_center)
                .join(&collection.short_name);
            if let Err(e) = provision_dir(&collection_dir) {
                warn!(
                    collection = %collection.id,
                    dir = %collection_dir.display(),
                    error = %e,
                    "collection directory unavailable, skipping its granules"
                );
                for granule in collection.granules() {
                    statuses.insert(granule.id.clone(), DownloadStatus::DirectoryFailed);
                }
                continue;
            }

            let collection_id = collection.id.clone();
            for granule in collection.granules_mut() {
                let Some(leaf) = date_leaf(granule.begin_date_time.as_deref()) else {
                    warn!(
                        granule = %granule.id,
                        begin = granule.begin_date_time.as_deref().unwrap_or("none"),
                        "granule begin date unusable for storage layout"
                    );
                    statuses.insert(granule.id.clone(), DownloadStatus::DirectoryFailed);
                    continue;
                };
                let granule_dir = collection_dir.join(&leaf);
                if let Err(e) = provision_dir(&granule_dir) {
                    warn!(
                        granule = %granule.id,
                        dir = %granule_dir.display(),
                        error = %e,
                        "granule directory unavailable"
                    );
                    statuses.insert(granule.id.clone(), DownloadStatus::DirectoryFailed);
                    continue;
                }

                let local_path = granule_dir.join(&granule.unit_representation);
                granule.set_local_file_name(local_path.clone());

                if let Some(store) = store {
                    if store.granule_exists(&granule.id) {
                        debug!(granule = %granule.id, "already in local store, skipping");
                        statuses.insert(granule.id.clone(), DownloadStatus::NotAttempted);
                        continue;
                    }
                }

                queue.push(TransferItem {
                    granule_id: granule.id.clone(),
                    collection_id: collection_id.clone(),
                    url: granule.access_url.clone(),
                    local_path,
                });
            }
        }

        info!(
            queued = queue.len(),
            skipped = statuses.len(),
            "transfer plan built"
        );
        (queue, statuses)
    }

    /// Drive the queue with at most `concurrency` transfers in flight.
    /// Every queued item ends in the returned map with `1` or `-1`; there is
    /// no per-item retry inside a run, retries belong to later runs via the
    /// pending-download record.
    pub async fn run(
        &self,
        queue: Vec<TransferItem>,
        mut statuses: HashMap<String, DownloadStatus>,
    ) -> HashMap<String, DownloadStatus> {
        let total = queue.len();
        let outcomes: Vec<(String, DownloadStatus)> = stream::iter(queue)
            .map(|item| {
                let client = self.client.clone();
                async move {
                    let status = match download_file(&client, &item.url, &item.local_path).await {
                        Ok(bytes) => {
                            debug!(
                                granule = %item.granule_id,
                                bytes,
                                path = %item.local_path.display(),
                                "transfer complete"
                            );
                            DownloadStatus::Success
                        }
                        Err(e) => {
                            warn!(
                                granule = %item.granule_id,
                                url = %item.url,
                                error = %e,
                                "transfer failed"
                            );
                            DownloadStatus::Failed
                        }
                    };
                    (item.granule_id, status)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let failed = outcomes
            .iter()
            .filter(|(_, s)| *s == DownloadStatus::Failed)
            .count();
        info!(total, failed, "transfer pool drained");
        statuses.extend(outcomes);
        statuses
    }

    /// Write terminal statuses back into the model and raise the
    /// per-collection failure flag wherever any granule failed.
    pub fn reconcile(&self, model: &mut CatalogModel, statuses: &HashMap<String, DownloadStatus>) {
        for collection in &mut model.collections {
            let mut any_failed = false;
            for granule in collection.granules_mut() {
                if let Some(status) = statuses.get(&granule.id) {
                    granule.set_download_status(*status);
                    if status.is_failure() {
                        any_failed = true;
                    }
                }
            }
            if any_failed {
                collection.mark_download_failed();
            }
        }
    }

    /// Delete partial files left behind by failed transfers. Best effort; a
    /// file that cannot be removed is only logged, the retry on the next run
    /// overwrites it anyway.
    pub fn sweep_failed(&self, model: &CatalogModel) {
        for collection in &model.collections {
            for granule in collection.granules() {
                if granule.download_status() != DownloadStatus::Failed {
                    continue;
                }
                let Some(path) = granule.local_file_name() else {
                    continue;
                };
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "partial file removed"),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "could not remove partial file")
                    }
                }
            }
        }
    }
}

/// Stream a URL to a local file, returning the byte count.
async fn download_file(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> Result<u64, TransferItemError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransferItemError::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransferItemError::Http(status.to_string()));
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| TransferItemError::Io(e.to_string()))?;
    let mut bytes = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| TransferItemError::Network(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransferItemError::Io(e.to_string()))?;
        bytes += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| TransferItemError::Io(e.to_string()))?;
    Ok(bytes)
}

/// Per-item transfer failure; internal, surfaces only as status `-1`.
#[derive(Debug, thiserror::Error)]
enum TransferItemError {
    #[error("network: {0}")]
    Network(String),
    #[error("http status {0}")]
    Http(String),
    #[error("io: {0}")]
    Io(String),
}

/// `YYYY/DDD` storage leaf from a granule's begin datetime.
fn date_leaf(begin_date_time: Option<&str>) -> Option<String> {
    let date_part = begin_date_time?.get(..10)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some(format!("{}/{:03}", date.year(), date.ordinal()))
}

/// Ensure a directory exists and is writable: create it if absent, restore
/// owner permissions if present but unwritable.
fn provision_dir(path: &Path) -> std::io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            if meta.permissions().readonly() {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
                }
                #[cfg(not(unix))]
                {
                    let mut perms = meta.permissions();
                    perms.set_readonly(false);
                    std::fs::set_permissions(path, perms)?;
                }
            }
            Ok(())
        }
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists but is not a directory",
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => std::fs::create_dir_all(path),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Collection, Granule};
    use crate::query::BoundingBox;

    fn granule(id: &str, begin: Option<&str>) -> Granule {
        Granule::new(
            id.to_string(),
            format!("{id}.hdf"),
            1.0,
            begin.map(str::to_string),
            None,
            false,
            BoundingBox::GLOBAL,
            format!("https://a.example/{id}.hdf"),
        )
    }

    fn model_with(granules: Vec<Granule>) -> CatalogModel {
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
        for g in granules {
            model.merge_granule("C1", g);
        }
        model
    }

    #[test]
    fn test_date_leaf() {
        assert_eq!(
            date_leaf(Some("2020-03-01T12:00:00")).as_deref(),
            Some("2020/061")
        );
        assert_eq!(
            date_leaf(Some("2019-03-01T00:00:00")).as_deref(),
            Some("2019/060")
        );
        assert_eq!(
            date_leaf(Some("2020-01-05T00:00:00")).as_deref(),
            Some("2020/005")
        );
        assert!(date_leaf(Some("garbage")).is_none());
        assert!(date_leaf(None).is_none());
    }

    #[test]
    fn test_plan_builds_layout_and_queue() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = TransferEngine::new(4).unwrap();
        let mut model = model_with(vec![granule("G1", Some("2020-03-01T12:00:00"))]);

        let (queue, statuses) = engine.plan(dir.path(), &mut model, None);
        assert_eq!(queue.len(), 1);
        assert!(statuses.is_empty());
        let expected = dir.path().join("ARC/TEST/2020/061/G1.hdf");
        assert_eq!(queue[0].local_path, expected);
        assert!(expected.parent().unwrap().is_dir());
        assert_eq!(
            model.collections[0].granules()[0].local_file_name(),
            Some(expected.as_path())
        );
    }

    #[test]
    fn test_plan_marks_unusable_begin_date() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = TransferEngine::new(4).unwrap();
        let mut model = model_with(vec![granule("G1", None), granule("G2", Some("not-a-date"))]);

        let (queue, statuses) = engine.plan(dir.path(), &mut model, None);
        assert!(queue.is_empty());
        assert_eq!(statuses["G1"], DownloadStatus::DirectoryFailed);
        assert_eq!(statuses["G2"], DownloadStatus::DirectoryFailed);
    }

    #[test]
    fn test_plan_marks_whole_collection_on_dir_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        // A file where the archive-center directory should go.
        std::fs::write(dir.path().join("ARC"), b"in the way").unwrap();
        let engine = TransferEngine::new(4).unwrap();
        let mut model = model_with(vec![
            granule("G1", Some("2020-03-01T12:00:00")),
            granule("G2", Some("2020-03-02T12:00:00")),
        ]);

        let (queue, statuses) = engine.plan(dir.path(), &mut model, None);
        assert!(queue.is_empty());
        assert_eq!(statuses["G1"], DownloadStatus::DirectoryFailed);
        assert_eq!(statuses["G2"], DownloadStatus::DirectoryFailed);
    }

    #[test]
    fn test_plan_excludes_granules_already_stored() {
        use crate::store::{CollectionRow, GranuleRow, PolyPointRow};

        struct AlwaysThere;
        impl GranuleStore for AlwaysThere {
            fn granule_exists(&self, _gran_id: &str) -> bool {
                true
            }
            fn collection_exists(&self, _coll_id: &str) -> bool {
                true
            }
            fn insert_collection(&self, _row: &CollectionRow) -> bool {
                true
            }
            fn insert_granule(&self, _row: &GranuleRow) -> bool {
                true
            }
            fn insert_polypoint(&self, _row: &PolyPointRow) -> bool {
                true
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let engine = TransferEngine::new(4).unwrap();
        let mut model = model_with(vec![granule("G1", Some("2020-03-01T12:00:00"))]);

        let (queue, statuses) = engine.plan(dir.path(), &mut model, Some(&AlwaysThere));
        assert!(queue.is_empty());
        assert_eq!(statuses["G1"], DownloadStatus::NotAttempted);
    }

    #[test]
    fn test_reconcile_raises_collection_flag() {
        let engine = TransferEngine::new(4).unwrap();
        let mut model = model_with(vec![granule("G1", None), granule("G2", None)]);
        let statuses = HashMap::from([
            ("G1".to_string(), DownloadStatus::Success),
            ("G2".to_string(), DownloadStatus::Failed),
        ]);
        engine.reconcile(&mut model, &statuses);
        let c = &model.collections[0];
        assert!(c.has_failed_download());
        assert_eq!(c.granules()[0].download_status(), DownloadStatus::Success);
        assert_eq!(c.granules()[1].download_status(), DownloadStatus::Failed);
    }

    #[test]
    fn test_sweep_failed_removes_only_failed_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = TransferEngine::new(4).unwrap();
        let ok_path = dir.path().join("ok.hdf");
        let bad_path = dir.path().join("bad.hdf");
        std::fs::write(&ok_path, b"complete").unwrap();
        std::fs::write(&bad_path, b"partial").unwrap();

        let mut model = model_with(vec![granule("G-ok", None), granule("G-bad", None)]);
        {
            let granules = model.collections[0].granules_mut();
            granules[0].set_local_file_name(ok_path.clone());
            granules[0].set_download_status(DownloadStatus::Success);
            granules[1].set_local_file_name(bad_path.clone());
            granules[1].set_download_status(DownloadStatus::Failed);
        }

        engine.sweep_failed(&model);
        assert!(ok_path.exists());
        assert!(!bad_path.exists());
    }

    #[test]
    fn test_provision_dir_creates_nested() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("a/b/c");
        provision_dir(&target).unwrap();
        assert!(target.is_dir());
        // Second call is a no-op.
        provision_dir(&target).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_provision_dir_restores_write_permission() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("locked");
        std::fs::create_dir(&target).unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o555)).unwrap();
        provision_dir(&target).unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
