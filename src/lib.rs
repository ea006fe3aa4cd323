//! # Catalog Harvester Library
//!
//! A batch client for a remote scientific-data catalog service. A declarative
//! search request (spatial bounding box, dataset version, temporal range) is
//! turned into catalog queries, the matching data collections and their
//! constituent data files ("granules") are enumerated, and — in download mode —
//! the files are fetched to local storage while a local SQLite store is kept
//! in sync with what has actually been retrieved.
//!
//! ## Crash recovery
//!
//! Two independent pending-state records make interrupted runs resumable:
//!
//! - a **pending-download** record capturing every granule whose transfer did
//!   not complete, merged back into the working set on the next invocation
//!   (incrementing its retry count), and
//! - three **pending-transaction** queues (collection, granule, polypoint)
//!   capturing local-store inserts that failed, replayed in
//!   referential-integrity order before any new work begins.
//!
//! ## Architecture
//!
//! - [`request`] - download request file model and validation
//! - [`query`] - dataset query construction, including recurring-range
//!   normalization
//! - [`model`] - the Collection → Granule → PolyPoint entity graph
//! - [`catalog`] - catalog service client boundary
//! - [`transfer`] - bounded-concurrency download engine
//! - [`pending`] - durable pending-download and pending-transaction state
//! - [`store`] - local SQLite persistence gateway
//! - [`cli`] - command-line interface and the run orchestrator

#![warn(clippy::all)]

use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Catalog service client boundary
pub mod catalog;

/// Collection/Granule/PolyPoint entity graph
pub mod model;

/// Durable pending-state stores
pub mod pending;

/// Dataset query construction
pub mod query;

/// Download request file model
pub mod request;

/// Local persistence gateway
pub mod store;

/// Bounded-concurrency download engine
pub mod transfer;

pub use model::CatalogModel;
pub use query::DatasetQuery;
pub use request::DownloadRequest;

/// Terminal per-granule transfer state.
///
/// The numeric codes are part of the durable pending-download format, so the
/// mapping is fixed:
///
/// - `0` - not attempted (granule was already in the local store, or never
///   reached the queue)
/// - `1` - transfer completed
/// - `-1` - transfer attempted and failed
/// - `-2` - collection or granule holding directory could not be provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum DownloadStatus {
    /// No transfer was attempted for this granule
    #[default]
    NotAttempted,
    /// Transfer completed successfully
    Success,
    /// Transfer was attempted and failed
    Failed,
    /// Holding directory could not be created or made writable
    DirectoryFailed,
}

impl DownloadStatus {
    /// Numeric status code as recorded in pending-download state.
    pub fn code(self) -> i8 {
        match self {
            DownloadStatus::NotAttempted => 0,
            DownloadStatus::Success => 1,
            DownloadStatus::Failed => -1,
            DownloadStatus::DirectoryFailed => -2,
        }
    }

    /// Whether this status marks a failed run participation (code < 0).
    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}

impl From<DownloadStatus> for i8 {
    fn from(status: DownloadStatus) -> i8 {
        status.code()
    }
}

impl TryFrom<i8> for DownloadStatus {
    type Error = String;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DownloadStatus::NotAttempted),
            1 => Ok(DownloadStatus::Success),
            -1 => Ok(DownloadStatus::Failed),
            -2 => Ok(DownloadStatus::DirectoryFailed),
            _ => Err(format!("invalid download status code: {code}")),
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}
