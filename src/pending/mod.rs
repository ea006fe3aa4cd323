//! Durable pending-state stores
//!
//! Crash recovery rests on two independent records, both JSON files in the
//! data root written atomically under an advisory file lock:
//!
//! - [`downloads`] - the pending-download record (granules whose transfer
//!   did not complete)
//! - [`transactions`] - the pending-transaction queues (local-store inserts
//!   that failed, one queue per entity kind)

use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::debug;

pub mod downloads;
pub mod transactions;

pub use downloads::PendingDownloadStore;
pub use transactions::{PendingKinds, PendingTransactionStore, ReplayError};

/// Errors touching pending-state files.
#[derive(Debug, thiserror::Error)]
pub enum PendingError {
    /// Filesystem failure
    #[error("pending state IO error: {0}")]
    Io(String),

    /// JSON failure
    #[error("pending state serialization error: {0}")]
    Serialization(String),

    /// Advisory lock failure
    #[error("pending state lock error: {0}")]
    Lock(String),
}

fn lock_path(path: &Path) -> std::path::PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".lock");
    std::path::PathBuf::from(p)
}

/// Atomically replace `path` with `contents` under an advisory lock:
/// temp file in the same directory, fsync, rename, fsync of the parent.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), PendingError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))
        .map_err(|e| PendingError::Lock(format!("failed to create lock file: {e}")))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| PendingError::Lock(format!("failed to acquire write lock: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| PendingError::Io(format!("failed to create temp file: {e}")))?;
    temp_file
        .write_all(contents.as_bytes())
        .map_err(|e| PendingError::Io(format!("failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| PendingError::Io(format!("failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| PendingError::Io(format!("failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| PendingError::Io(format!("failed to persist temp file: {e}")))?;

    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    debug!(path = %path.display(), "pending state written");
    Ok(())
}

/// Read a pending-state file under a shared advisory lock.
pub(crate) fn read_locked(path: &Path) -> Result<String, PendingError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))
        .map_err(|e| PendingError::Lock(format!("failed to create lock file: {e}")))?;
    let lock = RwLock::new(lock_file);
    let _guard = lock
        .read()
        .map_err(|e| PendingError::Lock(format!("failed to acquire read lock: {e}")))?;

    std::fs::read_to_string(path)
        .map_err(|e| PendingError::Io(format!("failed to read {}: {e}", path.display())))
}

/// Delete a pending-state file and its lock file. Missing files are fine.
pub(crate) fn remove_state(path: &Path) -> Result<(), PendingError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(PendingError::Io(format!(
                "failed to remove {}: {e}",
                path.display()
            )))
        }
    }
    let _ = std::fs::remove_file(lock_path(path));
    debug!(path = %path.display(), "pending state removed");
    Ok(())
}
