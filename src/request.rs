//! Download request file model and validation
//!
//! The request file is a JSON document naming the local data root, whether
//! local-store tracking is enabled, and one or more dataset search
//! specifications. Structural problems (unreadable file, bad JSON) and
//! semantic problems (missing criteria, out-of-range values) are both fatal:
//! a request is either processed whole or not at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maximum granule result-set size accepted by the catalog service.
pub const MAX_RESULT_SIZE: usize = 2000;

/// Hard ceiling on the per-run download limit, in megabytes (5 GB).
pub const MAX_DOWNLOAD_LIMIT_MB: u64 = 5120;

/// Errors raised while loading or validating a download request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Request file could not be read
    #[error("could not read request file {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Request file is not valid JSON
    #[error("could not parse request file {path}: {source}")]
    Parse {
        /// Offending path
        path: PathBuf,
        /// Underlying parse error
        source: serde_json::Error,
    },

    /// Request file names no datasets
    #[error("request file has no dataset specifications")]
    NoDatasets,

    /// A dataset is missing a required search criterion
    #[error("dataset {dataset}: missing {criteria} criteria")]
    MissingCriteria {
        /// Dataset short name
        dataset: String,
        /// Which criterion is absent
        criteria: &'static str,
    },

    /// A dataset's search criteria are present but invalid
    #[error("dataset {dataset}: {reason}")]
    InvalidCriteria {
        /// Dataset short name
        dataset: String,
        /// What is wrong
        reason: String,
    },

    /// Data root directory does not exist
    #[error("data root {0} does not exist")]
    DataRootMissing(PathBuf),

    /// Data root directory is not writable
    #[error("no permission to write to data root {0}")]
    DataRootNotWritable(PathBuf),

    /// A command-line limit is outside its accepted range
    #[error("invalid {name} ({value}), should be >= {min} and <= {max}")]
    LimitOutOfRange {
        /// Limit name
        name: &'static str,
        /// Supplied value
        value: u64,
        /// Minimum accepted
        min: u64,
        /// Maximum accepted
        max: u64,
    },
}

/// Top-level download request.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadRequest {
    /// Whether retrieved data is tracked in the local store. Untracked runs
    /// skip the already-fetched check, pending-download recovery, and
    /// pending-transaction processing.
    pub use_db: bool,
    /// Root directory under which granules are stored
    pub data_root: PathBuf,
    /// Catalog service endpoint; may be overridden on the command line
    #[serde(default)]
    pub catalog_url: Option<String>,
    /// Dataset search specifications
    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,
}

impl DownloadRequest {
    /// Load a request file and check its structural preconditions: the file
    /// parses, names at least one dataset, and the data root exists and is
    /// writable. Per-dataset criteria are validated by the query builder.
    pub fn load(path: &Path) -> Result<Self, RequestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RequestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let request: DownloadRequest =
            serde_json::from_str(&contents).map_err(|source| RequestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if request.datasets.is_empty() {
            return Err(RequestError::NoDatasets);
        }

        request.check_data_root()?;

        debug!(
            datasets = request.datasets.len(),
            data_root = %request.data_root.display(),
            use_db = request.use_db,
            "request file loaded"
        );

        Ok(request)
    }

    fn check_data_root(&self) -> Result<(), RequestError> {
        let meta = std::fs::metadata(&self.data_root)
            .map_err(|_| RequestError::DataRootMissing(self.data_root.clone()))?;
        if !meta.is_dir() || meta.permissions().readonly() {
            return Err(RequestError::DataRootNotWritable(self.data_root.clone()));
        }
        Ok(())
    }
}

/// Check a command-line limit against its accepted range.
pub fn check_limit(name: &'static str, value: u64, min: u64, max: u64) -> Result<(), RequestError> {
    if value < min || value > max {
        return Err(RequestError::LimitOutOfRange {
            name,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// One dataset search specification.
///
/// The bounding box and temporal criteria are optional at the parse level so
/// that their absence can be reported as a descriptive validation error
/// rather than a bare deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSpec {
    /// Catalog dataset short name
    pub short_name: String,
    /// Dataset version string
    #[serde(default)]
    pub version: Option<String>,
    /// Spatial bounding box
    #[serde(default)]
    pub bounding_box: Option<BoundingBoxSpec>,
    /// Temporal search criteria
    #[serde(default)]
    pub temporal: Option<TemporalSpec>,
}

/// Spatial bounding box as written in the request file.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BoundingBoxSpec {
    /// West boundary (degrees longitude)
    pub w: Option<f64>,
    /// South boundary (degrees latitude)
    pub s: Option<f64>,
    /// East boundary (degrees longitude)
    pub e: Option<f64>,
    /// North boundary (degrees latitude)
    pub n: Option<f64>,
}

/// Temporal search criteria: a fixed datetime window, or a month/day window
/// recurring across a span of years.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TemporalSpec {
    /// Fixed start/end datetime window
    Static {
        /// Window start, `YYYY-MM-DDTHH:MM:SS`
        #[serde(default)]
        start_date_time: Option<String>,
        /// Window end, `YYYY-MM-DDTHH:MM:SS`
        #[serde(default)]
        end_date_time: Option<String>,
    },
    /// Month/day window repeated for every year in a range
    Recurring {
        /// First year of the range
        #[serde(default)]
        year_start: Option<i32>,
        /// Last year of the range (inclusive)
        #[serde(default)]
        year_end: Option<i32>,
        /// Recurring window start (month/day/time)
        #[serde(default)]
        start: Option<RecurringEdgeSpec>,
        /// Recurring window end (month/day/time)
        #[serde(default)]
        end: Option<RecurringEdgeSpec>,
    },
}

/// One edge of a recurring temporal window.
#[derive(Debug, Clone, Deserialize)]
pub struct RecurringEdgeSpec {
    /// Month, 1-12
    pub month: Option<u32>,
    /// Day of month, 1-31 (checked independently of any year's calendar)
    pub day: Option<u32>,
    /// Time of day, `HH:MM:SS`
    pub time: Option<String>,
}
