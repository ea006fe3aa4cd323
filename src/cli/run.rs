//! Run orchestrator
//!
//! The single place where a run's phases are sequenced: request validation,
//! pending-transaction replay, catalog enumeration, feasibility, transfer,
//! pending capture, and store synchronization. Every phase reports failure
//! through `CliError`; process exit is decided in `main` alone.

use super::{Cli, CliError, Mode};
use crate::catalog::HttpCatalogClient;
use crate::model::CatalogModel;
use crate::pending::{PendingDownloadStore, PendingTransactionStore};
use crate::query::build_queries;
use crate::request::{check_limit, DownloadRequest, MAX_DOWNLOAD_LIMIT_MB, MAX_RESULT_SIZE};
use crate::store::{self, GranuleStore, SqliteStore};
use crate::transfer::{TransferEngine, MAX_CONCURRENCY};
use tracing::{info, warn};

const DEFAULT_DB_FILE: &str = "catalog_harvester.db";

/// Execute one run.
pub async fn run(cli: &Cli) -> Result<(), CliError> {
    check_limit("result size", cli.max_files, 1, MAX_RESULT_SIZE as u64)?;
    check_limit("download limit", cli.download_limit, 1, MAX_DOWNLOAD_LIMIT_MB)?;
    check_limit("concurrency", cli.concurrency as u64, 1, MAX_CONCURRENCY as u64)?;

    let request = DownloadRequest::load(&cli.request_file)?;
    let queries = build_queries(&request)?;

    // The store and both pending mechanisms exist only for tracked runs.
    let store = if request.use_db {
        let db_path = cli
            .db
            .clone()
            .unwrap_or_else(|| request.data_root.join(DEFAULT_DB_FILE));
        Some(SqliteStore::open(&db_path)?)
    } else {
        None
    };

    let transactions = PendingTransactionStore::new(&request.data_root);
    if let Some(store) = &store {
        // Failed inserts from earlier runs must land before anything new is
        // written, or referential integrity breaks for good.
        let kinds = transactions.has_pending();
        if kinds.any() {
            info!(
                collections = kinds.collection,
                granules = kinds.granule,
                polypoints = kinds.polypoint,
                "replaying pending transactions from an earlier run"
            );
            transactions.replay_all(store)?;
        }
    }

    let catalog_url = cli
        .catalog_url
        .as_deref()
        .or(request.catalog_url.as_deref())
        .ok_or_else(|| {
            CliError::InvalidArgument(
                "no catalog endpoint: set catalog_url in the request file or pass --catalog-url"
                    .to_string(),
            )
        })?;
    let client = HttpCatalogClient::new(catalog_url)?;

    let mut model = CatalogModel::new();
    model
        .populate(&client, &queries, cli.max_files as usize)
        .await;
    info!(
        collections = model.collections.len(),
        granules = model.granule_count(),
        "catalog enumeration complete"
    );

    match cli.mode {
        Mode::Query => report(&model),
        Mode::Download => download(cli, &request, &mut model, store.as_ref()).await?,
    }
    Ok(())
}

fn report(model: &CatalogModel) {
    if model.collections.is_empty() {
        println!("No collections matched the request.");
        return;
    }
    for collection in &model.collections {
        println!("{collection}");
        println!();
        for granule in collection.granules() {
            println!("{granule}");
            println!();
        }
    }
    println!(
        "{} collections, {} granules, {:.1} MB total",
        model.collections.len(),
        model.granule_count(),
        model.total_size_mb()
    );
}

async fn download(
    cli: &Cli,
    request: &DownloadRequest,
    model: &mut CatalogModel,
    store: Option<&SqliteStore>,
) -> Result<(), CliError> {
    let downloads = PendingDownloadStore::new(&request.data_root);
    if store.is_some() && downloads.exists() {
        let record = downloads.load()?;
        info!(
            granules = record.granule_count(),
            "merging pending downloads from an earlier run"
        );
        record.merge_into(model);
        downloads.remove()?;
    }

    if model.granule_count() == 0 {
        warn!("nothing to download");
        return Ok(());
    }

    let available_mb = available_space_mb(&request.data_root);
    model.feasibility_check(available_mb, cli.download_limit)?;

    let engine = TransferEngine::new(cli.concurrency)?;
    let (queue, statuses) = engine.plan(
        &request.data_root,
        model,
        store.map(|s| s as &dyn GranuleStore),
    );
    let statuses = engine.run(queue, statuses).await;
    engine.reconcile(model, &statuses);
    engine.sweep_failed(model);

    if let Some(store) = store {
        downloads.save(model)?;
        store::update(store, model);
        let transactions = PendingTransactionStore::new(&request.data_root);
        transactions.capture(model)?;
    }

    let fetched = statuses
        .values()
        .filter(|s| **s == crate::DownloadStatus::Success)
        .count();
    let failed = statuses.values().filter(|s| s.is_failure()).count();
    info!(fetched, failed, "run complete");
    Ok(())
}

/// Free space of the filesystem holding the data root, in MB. Measurement
/// failure is treated as unlimited with a warning; the download limit still
/// applies.
fn available_space_mb(path: &std::path::Path) -> f64 {
    match fs2::available_space(path) {
        Ok(bytes) => bytes as f64 / (1024.0 * 1024.0),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not measure free disk space");
            f64::MAX
        }
    }
}
