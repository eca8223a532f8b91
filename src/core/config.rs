//! Catalog configuration
//!
//! Everything a catalog needs to know about its surroundings that is not part of the
//! persisted schema: the catalog filename, which file extensions count as page images
//! or archives, how deep directory discovery goes, and whether loaded catalogs take the
//! single-writer lock.
//!
//! Configuration is immutable once handed to a [`CatalogStore`](crate::core::store::CatalogStore).
//! It can be built in code or read from a TOML file:
//!
//! ```toml
//! toc_filename = "toc.db"
//! image_extensions = ["png", "tif", "tiff"]
//! max_depth = 2
//! lock = true
//! ```

use crate::core::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default catalog filename inside a directory container
pub const TOC_FILENAME: &str = "toc.db";

/// Default directory discovery depth (flat directory)
pub const DEFAULT_MAX_DEPTH: usize = 1;

const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "tif", "tiff", "bmp", "gif", "webp",
];

const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["zip", "cbz", "tar", "tgz", "gz", "7z", "rar"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog filename; single-file containers use `<stem>.<toc_filename>`
    pub toc_filename: String,

    /// Extensions (lowercase, no dot) treated as page images during discovery
    pub image_extensions: Vec<String>,

    /// Extensions (lowercase, no dot) that mark a file container as an archive
    pub archive_extensions: Vec<String>,

    /// Maximum directory depth walked by discovery (1 = only the container itself)
    pub max_depth: usize,

    /// Take an exclusive advisory lock on catalogs loaded from disk
    pub lock: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            toc_filename: TOC_FILENAME.to_string(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            max_depth: DEFAULT_MAX_DEPTH,
            lock: true,
        }
    }
}

impl CatalogConfig {
    /// Parse and validate a TOML configuration document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CatalogConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(CatalogError::file_access(path))?;
        Self::from_toml_str(&text)
    }

    /// Set the catalog filename
    pub fn with_toc_filename<S: Into<String>>(mut self, name: S) -> Self {
        self.toc_filename = name.into();
        self
    }

    /// Set the discovery depth
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Enable or disable the single-writer lock
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Check the configuration for values the catalog cannot work with
    pub fn validate(&self) -> Result<()> {
        let name = self.toc_filename.trim();
        if name.is_empty() {
            return Err(CatalogError::InvalidConfig(
                "toc_filename cannot be empty".to_string(),
            ));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(CatalogError::InvalidConfig(format!(
                "toc_filename '{}' must be a bare filename",
                name
            )));
        }
        if self.max_depth == 0 {
            return Err(CatalogError::InvalidConfig(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.image_extensions.is_empty() {
            return Err(CatalogError::InvalidConfig(
                "image_extensions cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `path` has one of the configured image extensions (case-insensitive)
    pub fn is_image(&self, path: &Path) -> bool {
        has_extension(path, &self.image_extensions)
    }

    /// Whether `path` has one of the configured archive extensions (case-insensitive)
    pub fn is_archive(&self, path: &Path) -> bool {
        has_extension(path, &self.archive_extensions)
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
