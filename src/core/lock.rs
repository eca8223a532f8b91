//! Single-writer catalog locking.
//!
//! A catalog loaded from disk takes an exclusive advisory lock on a sidecar file
//! (`toc.db` → `toc.db.lock`). Saving replaces the catalog file by rename, so the lock
//! cannot live on the catalog file itself.
//!
//! Uses `fs2` (flock / LockFileEx). The lock is released when the guard is dropped.

use crate::core::error::{CatalogError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Guard holding the exclusive lock for one catalog file
#[derive(Debug)]
pub struct CatalogLock {
    file: File,
    lock_path: PathBuf,
}

impl CatalogLock {
    /// Lock the catalog at `catalog_path` without blocking
    ///
    /// Returns [`CatalogError::Locked`] when another handle already holds it.
    pub fn acquire<P: AsRef<Path>>(catalog_path: P) -> Result<Self> {
        let lock_path = lock_path_for(catalog_path.as_ref());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(CatalogError::file_access(&lock_path))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired catalog lock: {}", lock_path.display());
                Ok(CatalogLock { file, lock_path })
            }
            Err(e) if is_contended(&e) => Err(CatalogError::Locked(lock_path)),
            Err(e) => Err(CatalogError::FileAccess {
                path: lock_path,
                source: e,
            }),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for CatalogLock {
    fn drop(&mut self) {
        debug!("Releasing catalog lock: {}", self.lock_path.display());
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to unlock {}: {}", self.lock_path.display(), e);
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn lock_path_for(catalog_path: &Path) -> PathBuf {
    let mut name = catalog_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    catalog_path.with_file_name(name)
}
