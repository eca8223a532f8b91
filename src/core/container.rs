//! Workbook containers and catalog lookup
//!
//! A container is whatever physically holds the scanned pages: a directory of images,
//! one multi-page image file, or an archive. Containers are never persisted; their kind
//! is derived from the filesystem each time a path is resolved.
//!
//! The catalog for a container lives at a fixed place:
//!
//! - directory `scans/` → `scans/toc.db`
//! - single file `scans/workbook.tiff` → `scans/workbook.toc.db`
//! - archive → no catalog location yet
//!
//! [`ContainerResolver::locate`] and [`ContainerResolver::catalog_path`] share that rule,
//! so a catalog saved to its default location is always found again on load.

use crate::core::catalog::{PageAddress, PageKey, UNASSIGNED_PAGE};
use crate::core::config::CatalogConfig;
use crate::core::error::{CatalogError, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Physical organisation of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ContainerKind {
    /// Directory holding one image per page
    Directory,
    /// One file holding several pages (e.g. a multi-page TIFF)
    SingleFile,
    /// Archive holding page images as entries
    Archive,
}

/// A resolved container path and its kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    path: PathBuf,
    kind: ContainerKind,
}

impl Container {
    /// Classify `path` using the configured archive extensions
    ///
    /// Existing directories are directories; anything else is an archive when its
    /// extension says so and a single file otherwise. The path does not need to exist.
    pub fn detect<P: AsRef<Path>>(path: P, config: &CatalogConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        let kind = if path.is_dir() {
            ContainerKind::Directory
        } else if config.is_archive(&path) {
            ContainerKind::Archive
        } else {
            ContainerKind::SingleFile
        };
        Container { path, kind }
    }

    /// Build a container with an explicit kind
    pub fn new<P: Into<PathBuf>>(path: P, kind: ContainerKind) -> Self {
        Container {
            path: path.into(),
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Directory that page filenames are relative to
    ///
    /// For a directory container this is the directory itself; for file containers it is
    /// the directory holding the file, so `workbook.tiff:3` resolves next to the catalog.
    pub fn base_dir(&self) -> PathBuf {
        match self.kind {
            ContainerKind::Directory => self.path.clone(),
            ContainerKind::SingleFile | ContainerKind::Archive => parent_dir(&self.path),
        }
    }

    /// Absolute location of the file a page address points into
    pub fn resolve_address(&self, address: &PageAddress) -> PathBuf {
        self.base_dir().join(address.path())
    }

    /// Enumerate the physical pages of this container
    ///
    /// Directories are walked (see [`ContainerListing::scan_directory`]). File containers
    /// need the number of embedded pages from the caller since this crate does not parse
    /// image or archive formats.
    pub fn discover(
        &self,
        config: &CatalogConfig,
        page_count: Option<u32>,
    ) -> Result<ContainerListing> {
        match (self.kind, page_count) {
            (ContainerKind::Directory, _) => ContainerListing::scan_directory(&self.path, config),
            (ContainerKind::SingleFile, count) => {
                Ok(ContainerListing::multi_page(&self.path, count.unwrap_or(1)))
            }
            (ContainerKind::Archive, Some(count)) => {
                Ok(ContainerListing::archive_entries(&self.path, count))
            }
            (ContainerKind::Archive, None) => Err(CatalogError::UnsupportedContainer {
                container: self.path.clone(),
                reason: "archive entries must be listed by the caller".to_string(),
            }),
        }
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Locates the catalog file that belongs to a container
#[derive(Debug, Clone, Default)]
pub struct ContainerResolver {
    config: CatalogConfig,
}

impl ContainerResolver {
    pub fn new(config: CatalogConfig) -> Self {
        ContainerResolver { config }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Find the existing catalog for `container`
    ///
    /// Returns `None` when there is no container, when the expected catalog file does
    /// not exist, or when the container is an archive. Never creates anything.
    pub fn locate(&self, container: Option<&Path>) -> Option<PathBuf> {
        let container = container?;
        let candidate = self.catalog_path(&Container::detect(container, &self.config))?;
        if candidate.exists() {
            debug!("Found catalog {:?} for container {:?}", candidate, container);
            Some(candidate)
        } else {
            debug!("No catalog at {:?} for container {:?}", candidate, container);
            None
        }
    }

    /// Canonical catalog location for `container`, whether or not it exists yet
    pub fn catalog_path(&self, container: &Container) -> Option<PathBuf> {
        match container.kind() {
            ContainerKind::Directory => Some(container.path().join(&self.config.toc_filename)),
            ContainerKind::SingleFile => {
                let stem = container.path().file_stem()?.to_string_lossy();
                Some(
                    container
                        .path()
                        .with_file_name(format!("{}.{}", stem, self.config.toc_filename)),
                )
            }
            // TODO: look for a catalog stored as an archive entry once archive readers exist
            ContainerKind::Archive => None,
        }
    }
}

/// Physically present pages of a container, keyed like catalog entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerListing {
    keys: BTreeSet<PageKey>,
}

impl ContainerListing {
    /// Build a listing from externally enumerated keys
    pub fn from_keys<I: IntoIterator<Item = PageKey>>(keys: I) -> Self {
        ContainerListing {
            keys: keys.into_iter().collect(),
        }
    }

    /// Walk a directory container for page images
    ///
    /// Descends at most `config.max_depth` levels, keeps files with a configured image
    /// extension and records each as a `/`-separated path relative to `dir` with an
    /// unassigned page number. Nested multi-page files and archives are listed as single
    /// opaque entries.
    pub fn scan_directory<P: AsRef<Path>>(dir: P, config: &CatalogConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let mut keys = BTreeSet::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(config.max_depth)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| CatalogError::FileAccess {
                path: e.path().unwrap_or(dir).to_path_buf(),
                source: e.into(),
            })?;

            if !entry.file_type().is_file() || !config.is_image(entry.path()) {
                continue;
            }

            let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let filename = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            keys.insert(PageKey::new(filename, UNASSIGNED_PAGE));
        }

        debug!("Discovered {} page images in {:?}", keys.len(), dir);
        Ok(ContainerListing { keys })
    }

    /// Pages `<file>:1 ..= <file>:<count>` of a multi-page file
    pub fn multi_page<P: AsRef<Path>>(file: P, count: u32) -> Self {
        Self::indexed(file.as_ref(), count)
    }

    /// Entries `<archive>:1 ..= <archive>:<count>` of an archive
    pub fn archive_entries<P: AsRef<Path>>(archive: P, count: u32) -> Self {
        Self::indexed(archive.as_ref(), count)
    }

    fn indexed(file: &Path, count: u32) -> Self {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let keys = (1..=count)
            .map(|index| PageKey::new(format!("{}:{}", name, index), UNASSIGNED_PAGE))
            .collect();
        ContainerListing { keys }
    }

    pub fn keys(&self) -> &BTreeSet<PageKey> {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &PageKey) -> bool {
        self.keys.contains(key)
    }
}

impl FromIterator<PageKey> for ContainerListing {
    fn from_iter<I: IntoIterator<Item = PageKey>>(iter: I) -> Self {
        Self::from_keys(iter)
    }
}
