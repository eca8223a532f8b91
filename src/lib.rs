//! # Workbook TOC - Page Catalogs for Scanned Workbooks
//!
//! `workbook-toc` keeps a durable, versioned table of contents for the scanned pages of a
//! physical workbook. A workbook may be stored as:
//!
//! - **A directory** of page images (`scan_001.png`, `scan_002.png`, ...)
//! - **A single multi-page file** (`workbook.tiff`, pages addressed `workbook.tiff:3`)
//! - **An archive** (`pages.zip`, entries supplied by the caller)
//!
//! The catalog records, per page, its address, classification, registration state,
//! checksum and exclusion flag. It lives in memory and is written back atomically only
//! when saved.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use workbook_toc::{Workbook, Result};
//!
//! # fn main() -> Result<()> {
//! // Opens ./scans/toc.db if it exists, otherwise starts an empty catalog
//! let mut workbook = Workbook::open("scans")?;
//!
//! // Catalog every image that is not recorded yet
//! let added = workbook.catalog_new_pages(None)?;
//! println!("{} new pages", added.len());
//!
//! // Writes ./scans/toc.db
//! workbook.save()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust,no_run
//! use workbook_toc::{PageQuery, Result, WorkbookBuilder};
//!
//! # fn main() -> Result<()> {
//! let workbook = WorkbookBuilder::new()
//!     .container("archive/2016/workbook.tiff")
//!     .max_depth(3)
//!     .require_existing()
//!     .build()?;
//!
//! for entry in workbook.catalog().get_pages(PageQuery::all().page_range(1..=10)) {
//!     let entry = entry?;
//!     println!("{} -> {}", entry.filename, entry.form_type);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    catalog::{
        NewPage, PageAddress, PageCatalog, PageEntry, PageId, PageKey, PageQuery, PageState,
        Pages, DEFAULT_FORM_TYPE, UNASSIGNED_PAGE,
    },
    checksum::{checksum_bytes, checksum_file, fill_missing_checksums},
    config::{CatalogConfig, DEFAULT_MAX_DEPTH, TOC_FILENAME},
    container::{Container, ContainerKind, ContainerListing, ContainerResolver},
    error::{CatalogError, Result},
    lock::CatalogLock,
    persistence::{BackupPersistence, PageSummary, Persistence, PersistenceManager, TableOfContents},
    reconcile::{Reconciliation, ReconciliationEngine},
    registration::{
        register_pages, Alignment, CommandRegistrar, ImageRegistrar, RegistrationError,
        RegistrationFailure, RegistrationParams, RegistrationReport, RegistrationRequest,
        RegistrationResult, SkipReason, TemplateSet, MIN_USABLE_MATCHES,
    },
    store::{CatalogMetadata, CatalogStore, SCHEMA_VERSION},
};

use std::path::{Path, PathBuf};
use tracing::info;

/// High-level handle on one workbook and its catalog
///
/// Bundles the container, its catalog and the persistence layer. Use
/// [`catalog`](Self::catalog) and [`catalog_mut`](Self::catalog_mut) for page-level
/// operations.
///
/// # Examples
///
/// ```rust,no_run
/// use workbook_toc::{Workbook, Result};
///
/// # fn main() -> Result<()> {
/// let mut workbook = Workbook::open("scans")?;
/// let result = workbook.reconcile(None)?;
/// for key in &result.orphaned {
///     println!("missing from disk: {}", key);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Workbook {
    container: Container,
    config: CatalogConfig,
    catalog: PageCatalog,
    persistence: PersistenceManager,
}

impl Workbook {
    /// Open the catalog of `container`, or start an empty one
    pub fn open<P: AsRef<Path>>(container: P) -> Result<Self> {
        WorkbookBuilder::new().container(container.as_ref()).build()
    }

    /// Open the existing catalog of `container`
    ///
    /// Fails with [`CatalogError::MissingCatalog`] when there is none.
    pub fn load<P: AsRef<Path>>(container: P) -> Result<Self> {
        WorkbookBuilder::new()
            .container(container.as_ref())
            .require_existing()
            .build()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PageCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut PageCatalog {
        &mut self.catalog
    }

    /// Physical pages of the container
    ///
    /// `page_count` is required for archives and defaults to one page for single files.
    pub fn discover(&self, page_count: Option<u32>) -> Result<ContainerListing> {
        self.container.discover(&self.config, page_count)
    }

    /// Compare the container with the catalog without changing either
    pub fn reconcile(&self, page_count: Option<u32>) -> Result<Reconciliation> {
        let listing = self.discover(page_count)?;
        ReconciliationEngine::new().reconcile(&listing, &self.catalog)
    }

    /// Add every discovered page that the catalog does not record yet
    ///
    /// Orphaned entries are left alone. Returns the ids of the new entries.
    pub fn catalog_new_pages(&mut self, page_count: Option<u32>) -> Result<Vec<PageId>> {
        let result = self.reconcile(page_count)?;
        let mut added = Vec::with_capacity(result.new.len());
        for key in result.new {
            added.push(self.catalog.add_page(NewPage::from(key))?);
        }
        if !added.is_empty() {
            info!("Catalogued {} new pages of {:?}", added.len(), self.container.path());
        }
        Ok(added)
    }

    /// Compute checksums for included pages that have none
    pub fn fill_checksums(&mut self) -> Result<Vec<PageId>> {
        fill_missing_checksums(&mut self.catalog, &self.container)
    }

    /// Register pending pages, see [`register_pages`]
    pub fn register<R: ImageRegistrar + ?Sized>(
        &mut self,
        registrar: &R,
        templates: &TemplateSet,
        output_dir: &Path,
        params: &RegistrationParams,
    ) -> Result<RegistrationReport> {
        register_pages(&mut self.catalog, registrar, templates, output_dir, params)
    }

    /// Save to the catalog's own location
    pub fn save(&mut self) -> Result<PathBuf> {
        self.persistence.save(&mut self.catalog, None)
    }

    /// Save to `target`, or to the catalog file inside it when it is a directory
    ///
    /// The first save of a new catalog makes `target` its location for later saves.
    pub fn save_as<P: AsRef<Path>>(&mut self, target: P) -> Result<PathBuf> {
        self.persistence.save(&mut self.catalog, Some(target.as_ref()))
    }

    pub fn snapshot(&self) -> Result<TableOfContents> {
        self.persistence.snapshot(&self.catalog)
    }

    /// Give up the facade and keep the catalog (and its lock)
    pub fn into_catalog(self) -> PageCatalog {
        self.catalog
    }
}

/// Builder for [`Workbook`] with custom configuration
///
/// # Examples
///
/// ```rust,no_run
/// use workbook_toc::{CatalogConfig, WorkbookBuilder};
///
/// # fn main() -> workbook_toc::Result<()> {
/// let workbook = WorkbookBuilder::new()
///     .container("scans")
///     .config(CatalogConfig::from_file("workbook.toml")?)
///     .without_lock()
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WorkbookBuilder {
    container: Option<PathBuf>,
    config: CatalogConfig,
    create_if_missing: bool,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        WorkbookBuilder {
            container: None,
            config: CatalogConfig::default(),
            create_if_missing: true,
        }
    }

    /// Set the container path (required)
    pub fn container<P: Into<PathBuf>>(mut self, container: P) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CatalogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn toc_filename<S: Into<String>>(mut self, name: S) -> Self {
        self.config = self.config.with_toc_filename(name);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config = self.config.with_max_depth(depth);
        self
    }

    /// Skip the single-writer lock
    pub fn without_lock(mut self) -> Self {
        self.config = self.config.with_lock(false);
        self
    }

    /// Fail instead of starting an empty catalog
    pub fn require_existing(mut self) -> Self {
        self.create_if_missing = false;
        self
    }

    pub fn build(self) -> Result<Workbook> {
        self.config.validate()?;
        let path = self
            .container
            .ok_or_else(|| CatalogError::InvalidConfig("container path is required".to_string()))?;

        let store = CatalogStore::new(self.config.clone());
        let catalog = if self.create_if_missing {
            store.open_or_create(&path)?
        } else {
            store.load(Some(path.as_path()))?
        };

        Ok(Workbook {
            container: Container::detect(&path, &self.config),
            persistence: PersistenceManager::new(self.config.clone()),
            config: self.config,
            catalog,
        })
    }
}

impl Default for WorkbookBuilder {
    fn default() -> Self {
        Self::new()
    }
}
