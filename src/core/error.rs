//! Error types for catalog operations

use crate::core::catalog::{PageId, PageState};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Catalog operation errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// No catalog file exists for the container
    #[error("No table of contents found for container '{}'", .container.display())]
    MissingCatalog { container: PathBuf },

    /// Catalog file carries a different schema version, or none
    #[error(
        "Unsupported catalog schema in {}: expected version {expected}, found {}",
        .path.display(),
        .found.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    SchemaVersionMismatch {
        path: PathBuf,
        expected: i64,
        found: Option<i64>,
    },

    /// Catalog file is not a usable catalog database
    #[error("Invalid catalog metadata in {}: {reason}", .path.display())]
    InvalidMetadata { path: PathBuf, reason: String },

    /// Page entry failed validation
    #[error("Invalid page entry: {reason}")]
    InvalidPageEntry { reason: String },

    /// Filename and page number are already catalogued
    #[error("Page '{filename}' with page number {page_number} is already catalogued")]
    DuplicatePage { filename: String, page_number: i64 },

    /// No entry has this page id
    #[error("Unknown page id: {0}")]
    UnknownPageId(PageId),

    /// Lifecycle state would regress
    #[error("Page {page_id} cannot move from {from:?} back to {to:?}")]
    InvalidTransition {
        page_id: PageId,
        from: PageState,
        to: PageState,
    },

    /// Save did not complete; the destination is unchanged
    #[error("Failed to save catalog to {}: {reason}", .path.display())]
    PersistenceFailure { path: PathBuf, reason: String },

    /// Save without a target on a catalog that has no default location
    #[error("No save target: catalog has no source file and no container with a catalog location")]
    NoSaveTarget,

    /// Another handle holds the catalog lock
    #[error("Catalog is locked by another writer: {}", .0.display())]
    Locked(PathBuf),

    /// Container kind does not support the operation
    #[error("Unsupported container {}: {reason}", .container.display())]
    UnsupportedContainer { container: PathBuf, reason: String },

    /// Page file could not be read
    #[error("Cannot read page {page_id} at {}: {source}", .path.display())]
    PageFile {
        page_id: PageId,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File other than a page file could not be opened or read
    #[error("Cannot access {}: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Registration parameters out of range
    #[error("Invalid registration parameters: {0}")]
    InvalidRegistrationParams(String),

    /// SQLite error
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file is not valid TOML
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CatalogError {
    pub(crate) fn invalid_entry(reason: impl Into<String>) -> Self {
        CatalogError::InvalidPageEntry {
            reason: reason.into(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        CatalogError::PersistenceFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn file_access(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| CatalogError::FileAccess { path, source }
    }
}

/// Catalog operation result type
pub type Result<T> = std::result::Result<T, CatalogError>;
