//! SHA-256 page checksums
//!
//! Checksums are stored as lowercase hex in `file_checksum`. For a page embedded in a
//! multi-page file the whole container file is hashed, since this crate does not
//! decode individual pages.

use crate::core::catalog::{PageCatalog, PageId, PageQuery};
use crate::core::container::Container;
use crate::core::error::{CatalogError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::debug;

/// Hash a byte slice
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash a file, streaming it in chunks
///
/// A file that cannot be opened or read fails with [`CatalogError::FileAccess`].
pub fn checksum_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    digest_file(path).map_err(CatalogError::file_access(path))
}

fn digest_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute and record checksums for entries that have none
///
/// Excluded entries are skipped. Returns the ids that were updated in catalog order.
///
/// A page whose file cannot be read stops the run with [`CatalogError::PageFile`].
/// Checksums recorded before it stay in the catalog, which is then dirty; running again
/// after fixing the file picks up where the run stopped.
pub fn fill_missing_checksums(
    catalog: &mut PageCatalog,
    container: &Container,
) -> Result<Vec<PageId>> {
    let pending: Vec<_> = catalog
        .get_pages(PageQuery::all().skip_excluded())
        .filter(|entry| entry.as_ref().map(|e| e.file_checksum.is_none()).unwrap_or(true))
        .collect::<Result<_>>()?;

    let mut updated = Vec::with_capacity(pending.len());
    for entry in pending {
        let file = container.resolve_address(&entry.address()?);
        let checksum = digest_file(&file).map_err(|source| CatalogError::PageFile {
            page_id: entry.page_id,
            path: file.clone(),
            source,
        })?;
        debug!("Checksum for {}: {}", entry.filename, checksum);
        catalog.set_checksum(entry.page_id, &checksum)?;
        updated.push(entry.page_id);
    }
    Ok(updated)
}
