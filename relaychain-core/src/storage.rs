//! Data directory ownership.
//!
//! The relay keeps its tail in memory, which is only sound while a single
//! process writes the directory. `StorageLock` takes an exclusive OS advisory
//! lock on `<data_dir>/relaychain.lock` and keeps it for as long as the value
//! lives. The OS drops the lock when the process exits for any reason.

use crate::ledger::{StoreError, StoreResult};
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the lock file inside the data directory
pub const LOCK_FILE_NAME: &str = "relaychain.lock";

/// Exclusive claim on a data directory
#[derive(Debug)]
pub struct StorageLock {
    file: File,
    path: PathBuf,
}

impl StorageLock {
    /// Lock `data_dir`, creating it if needed
    ///
    /// Fails with `StoreError::LockUnavailable` when another holder exists.
    pub fn acquire(data_dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(StoreError::LockUnavailable { path }),
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        // Owner pid is informational only; the lock itself is what counts
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_data()?;

        debug!(path = %path.display(), "Acquired storage lock");
        Ok(StorageLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(error = %e, "Failed to release storage lock explicitly");
        }
    }
}
