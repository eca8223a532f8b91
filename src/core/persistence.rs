//! Saving catalogs and read-only snapshots
//!
//! A save is all-or-nothing: the catalog is copied into a temporary file next to the
//! destination with SQLite's online backup, and the temporary file is then renamed over
//! the destination. A failure at any step leaves the destination as it was.
//!
//! `last_saved` is stamped only when the catalog changed since it was loaded or last
//! saved, so saving an unchanged catalog twice writes the same content twice. The stamp
//! goes into the temporary copy first and reaches the in-memory catalog only after the
//! rename, so a failed save can simply be retried.
//!
//! The renamed file keeps the permissions of the catalog it replaces. A new catalog
//! file gets the usual mode for new files rather than the private temporary-file mode.

use crate::core::catalog::{PageCatalog, PageState};
use crate::core::config::CatalogConfig;
use crate::core::container::{Container, ContainerKind, ContainerResolver};
use crate::core::error::{CatalogError, Result};
use crate::core::store;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, DatabaseName};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Atomic copy of a catalog store to a file
pub trait Persistence {
    /// Write the full contents of `conn` to `target`
    ///
    /// When `stamp` is set the copy's `last_saved` is replaced with it. Implementations
    /// must either leave `target` as a complete catalog or not touch it at all.
    fn persist(
        &self,
        conn: &Connection,
        target: &Path,
        stamp: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Online backup into a sibling temporary file, then rename
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupPersistence;

impl Persistence for BackupPersistence {
    fn persist(
        &self,
        conn: &Connection,
        target: &Path,
        stamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix(".toc-").suffix(".tmp");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o666));
        }
        let temp = builder
            .tempfile_in(&dir)
            .map_err(|e| CatalogError::persistence(target, e))?;
        debug!("Writing catalog copy to {:?}", temp.path());

        if let Some(existing) = fs::metadata(target).ok().filter(|m| m.is_file()) {
            temp.as_file()
                .set_permissions(existing.permissions())
                .map_err(|e| CatalogError::persistence(target, e))?;
        }

        conn.backup(DatabaseName::Main, temp.path(), None)
            .map_err(|e| CatalogError::persistence(target, e))?;

        if let Some(stamp) = stamp {
            let copy = Connection::open(temp.path())
                .map_err(|e| CatalogError::persistence(target, e))?;
            store::write_last_saved(&copy, stamp)
                .map_err(|e| CatalogError::persistence(target, e))?;
            copy.close()
                .map_err(|(_, e)| CatalogError::persistence(target, e))?;
        }

        temp.as_file()
            .sync_all()
            .map_err(|e| CatalogError::persistence(target, e))?;
        temp.persist(target)
            .map_err(|e| CatalogError::persistence(target, e.error))?;
        Ok(())
    }
}

/// Summary of one page for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    /// Logical page number, `None` while unassigned
    pub page: Option<i64>,
    pub file: String,
    pub form_type: String,
    pub state: PageState,
    pub registered_file: Option<String>,
    pub checksum: Option<String>,
    pub comments: Option<String>,
    pub excluded: bool,
}

/// Read-only view of a catalog
///
/// Carries no page ids or other handles; changes go through [`PageCatalog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOfContents {
    pub container: Option<PathBuf>,
    pub container_kind: Option<ContainerKind>,
    pub schema_version: i64,
    pub last_saved: Option<DateTime<Utc>>,
    pub properties: BTreeMap<String, String>,
    pub pages: Vec<PageSummary>,
}

impl TableOfContents {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Saves catalogs and produces snapshots
pub struct PersistenceManager<P: Persistence = BackupPersistence> {
    resolver: ContainerResolver,
    backend: P,
}

impl PersistenceManager<BackupPersistence> {
    pub fn new(config: CatalogConfig) -> Self {
        Self::with_backend(config, BackupPersistence)
    }
}

impl Default for PersistenceManager<BackupPersistence> {
    fn default() -> Self {
        Self::new(CatalogConfig::default())
    }
}

impl<P: Persistence> PersistenceManager<P> {
    pub fn with_backend(config: CatalogConfig, backend: P) -> Self {
        PersistenceManager {
            resolver: ContainerResolver::new(config),
            backend,
        }
    }

    /// Where [`save`](Self::save) would write for `target`
    ///
    /// An explicit target wins; otherwise the catalog's source file, then the catalog
    /// location of its container. An explicit target that is an existing directory is
    /// taken as a directory container and resolves to its catalog file.
    pub fn target_for(&self, catalog: &PageCatalog, target: Option<&Path>) -> Result<PathBuf> {
        if let Some(target) = target {
            if !target.is_dir() {
                return Ok(target.to_path_buf());
            }
            let container = Container::detect(target, self.resolver.config());
            return self
                .resolver
                .catalog_path(&container)
                .ok_or(CatalogError::NoSaveTarget);
        }
        if let Some(source) = catalog.source_path() {
            return Ok(source.to_path_buf());
        }
        catalog
            .container()
            .and_then(|container| self.resolver.catalog_path(container))
            .ok_or(CatalogError::NoSaveTarget)
    }

    /// Write the whole catalog to `target` (or its default) and return the path written
    ///
    /// On error the catalog is left exactly as it was, including its dirty flag.
    pub fn save(&self, catalog: &mut PageCatalog, target: Option<&Path>) -> Result<PathBuf> {
        let path = self.target_for(catalog, target)?;
        let stamp = catalog.is_dirty().then(Utc::now);

        self.backend.persist(catalog.connection(), &path, stamp)?;
        catalog.mark_saved(&path, stamp)?;

        info!("Saved catalog ({} pages) to {:?}", catalog.len()?, path);
        Ok(path)
    }

    /// Read-only view of `catalog` for display
    pub fn snapshot(&self, catalog: &PageCatalog) -> Result<TableOfContents> {
        let metadata = catalog.metadata()?;
        let pages = catalog
            .pages()
            .map(|entry| {
                entry.map(|e| PageSummary {
                    page: (e.page_number >= 0).then_some(e.page_number),
                    state: e.state(),
                    file: e.filename,
                    form_type: e.form_type,
                    registered_file: e.registered_filename,
                    checksum: e.file_checksum,
                    comments: e.comments,
                    excluded: e.excluded,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(TableOfContents {
            container: catalog.container().map(|c| c.path().to_path_buf()),
            container_kind: catalog.container().map(|c| c.kind()),
            schema_version: metadata.schema_version,
            last_saved: metadata.last_saved,
            properties: catalog.properties().clone(),
            pages,
        })
    }
}
