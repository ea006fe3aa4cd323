//! Command-line interface
//!
//! Argument definitions and the aggregate error type. The orchestration of a
//! run lives in [`run`]; nothing below `main` terminates the process, every
//! failure travels up as a [`CliError`].

use crate::catalog::CatalogError;
use crate::model::FeasibilityError;
use crate::pending::{PendingError, ReplayError};
use crate::request::RequestError;
use crate::store::StoreError;
use crate::transfer::TransferError;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

pub mod run;

pub use run::run;

/// Aggregate error for a CLI run.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Request file or argument validation failure
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Catalog boundary failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Feasibility rejection
    #[error(transparent)]
    Feasibility(#[from] FeasibilityError),

    /// Transfer engine failure
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Pending-state failure
    #[error(transparent)]
    Pending(#[from] PendingError),

    /// Pending-transaction replay failure
    #[error(transparent)]
    Replay(#[from] ReplayError),

    /// Local store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Argument combination that clap cannot check
    #[error("{0}")]
    InvalidArgument(String),
}

/// Operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Query the catalog and print collection and granule reports
    Query,
    /// Query the catalog and download the matching granules
    Download,
}

/// Batch client for a remote scientific-data catalog.
#[derive(Debug, Parser)]
#[command(name = "catalog-harvester", version, about)]
pub struct Cli {
    /// Path to the JSON download request file
    pub request_file: PathBuf,

    /// Operation mode
    #[arg(short = 'o', long, value_enum, default_value_t = Mode::Query)]
    pub mode: Mode,

    /// Maximum granules per dataset query (1-2000)
    #[arg(short = 'r', long, default_value_t = 1000)]
    pub max_files: u64,

    /// Per-run download size limit in MB (1-5120)
    #[arg(short = 's', long, default_value_t = 3072)]
    pub download_limit: u64,

    /// Concurrent transfers (max 32)
    #[arg(long, default_value_t = crate::transfer::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// SQLite store path; defaults to catalog_harvester.db in the data root
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Catalog endpoint, overriding the request file
    #[arg(long)]
    pub catalog_url: Option<String>,
}
