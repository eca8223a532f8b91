//! Versioned catalog store
//!
//! A catalog is a SQLite database with exactly two relations:
//!
//! - `toc_metadata`: one row holding the schema version and the last save time
//! - `toc_pages`: one row per [`PageEntry`](crate::core::catalog::PageEntry)
//!
//! Catalogs always live in an in-memory connection. Loading copies the file into memory
//! with SQLite's online backup; nothing writes back to disk until
//! [`PersistenceManager::save`](crate::core::persistence::PersistenceManager::save).
//!
//! A stored `schema_version` that differs from [`SCHEMA_VERSION`] is rejected. There is
//! no migration path: bump the version on any breaking schema change.

use crate::core::catalog::PageCatalog;
use crate::core::config::CatalogConfig;
use crate::core::container::{Container, ContainerResolver};
use crate::core::error::{CatalogError, Result};
use crate::core::lock::CatalogLock;
use chrono::{DateTime, Utc};
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

/// Schema version written by and required by this build
pub const SCHEMA_VERSION: i64 = 1;

pub(crate) const METADATA_TABLE: &str = "toc_metadata";
pub(crate) const PAGES_TABLE: &str = "toc_pages";

const METADATA_SCHEMA: &str = "CREATE TABLE toc_metadata (
    schema_version INTEGER NOT NULL,
    last_saved TEXT
)";

// AUTOINCREMENT keeps page ids from ever being handed out twice, even after a
// future delete removes the highest row.
const PAGES_SCHEMA: &str = "CREATE TABLE toc_pages (
    page_id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    page_number INTEGER NOT NULL DEFAULT -1,
    form_type TEXT NOT NULL DEFAULT 'UNKNOWN',
    registered_filename TEXT,
    file_checksum TEXT,
    comments TEXT,
    excluded INTEGER NOT NULL DEFAULT 0 CHECK (excluded IN (0, 1)),
    UNIQUE (filename, page_number)
)";

/// Singleton metadata record of a catalog
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CatalogMetadata {
    pub schema_version: i64,
    pub last_saved: Option<DateTime<Utc>>,
}

/// Opens catalogs, fresh or from disk
#[derive(Debug, Clone, Default)]
pub struct CatalogStore {
    resolver: ContainerResolver,
}

impl CatalogStore {
    pub fn new(config: CatalogConfig) -> Self {
        CatalogStore {
            resolver: ContainerResolver::new(config),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        self.resolver.config()
    }

    pub fn resolver(&self) -> &ContainerResolver {
        &self.resolver
    }

    /// Create an empty, unbound catalog
    pub fn open_in_memory(&self) -> Result<PageCatalog> {
        let conn = Self::fresh_connection()?;
        debug!("Created in-memory catalog (schema v{})", SCHEMA_VERSION);
        Ok(PageCatalog::from_parts(conn, None, None, None, true))
    }

    /// Create an empty catalog bound to `container`
    ///
    /// Saving it without an explicit target writes to the container's catalog location.
    pub fn create<P: AsRef<Path>>(&self, container: P) -> Result<PageCatalog> {
        let container = Container::detect(container, self.config());
        let conn = Self::fresh_connection()?;
        info!(
            "Created catalog for {:?} container {:?}",
            container.kind(),
            container.path()
        );
        Ok(PageCatalog::from_parts(conn, Some(container), None, None, true))
    }

    /// Load the catalog of `container`
    ///
    /// Fails with [`CatalogError::MissingCatalog`] naming the container when none exists.
    pub fn load(&self, container: Option<&Path>) -> Result<PageCatalog> {
        let toc = self.resolver.locate(container).ok_or_else(|| CatalogError::MissingCatalog {
            container: container.map(Path::to_path_buf).unwrap_or_default(),
        })?;

        let mut catalog = self.open_from_file(&toc)?;
        if let Some(container) = container {
            catalog.bind_container(Container::detect(container, self.config()));
        }
        Ok(catalog)
    }

    /// Load the catalog of `container`, or create an empty one bound to it
    pub fn open_or_create<P: AsRef<Path>>(&self, container: P) -> Result<PageCatalog> {
        let container = container.as_ref();
        match self.resolver.locate(Some(container)) {
            Some(_) => self.load(Some(container)),
            None => self.create(container),
        }
    }

    /// Load a catalog file
    ///
    /// The file must exist and carry the current schema version. When locking is enabled
    /// the returned catalog holds the catalog's advisory lock until it is dropped.
    pub fn open_from_file<P: AsRef<Path>>(&self, path: P) -> Result<PageCatalog> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CatalogError::MissingCatalog {
                container: path.to_path_buf(),
            });
        }

        let lock = if self.config().lock {
            Some(CatalogLock::acquire(path)?)
        } else {
            None
        };

        let mut conn = Connection::open_in_memory()?;
        conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)
            .map_err(|e| not_a_catalog(path, e))?;

        let metadata = Self::verify(&conn, path).map_err(|e| match e {
            CatalogError::Store(e) => not_a_catalog(path, e),
            other => other,
        })?;
        info!(
            "Loaded catalog {:?} (schema v{}, last saved {:?})",
            path, metadata.schema_version, metadata.last_saved
        );

        Ok(PageCatalog::from_parts(
            conn,
            None,
            Some(path.to_path_buf()),
            lock,
            false,
        ))
    }

    fn fresh_connection() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(conn)
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!("{};\n{};", METADATA_SCHEMA, PAGES_SCHEMA))?;
        conn.execute(
            "INSERT INTO toc_metadata (schema_version, last_saved) VALUES (?1, NULL)",
            [SCHEMA_VERSION],
        )?;
        Ok(())
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
        let found = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Check a restored catalog before anything reads or writes it
    fn verify(conn: &Connection, path: &Path) -> Result<CatalogMetadata> {
        let mismatch = |found| CatalogError::SchemaVersionMismatch {
            path: path.to_path_buf(),
            expected: SCHEMA_VERSION,
            found,
        };

        if !Self::table_exists(conn, METADATA_TABLE)? {
            return Err(mismatch(None));
        }

        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM toc_metadata", [], |row| row.get(0))?;
        if rows != 1 {
            return Err(CatalogError::InvalidMetadata {
                path: path.to_path_buf(),
                reason: format!("expected one metadata row, found {}", rows),
            });
        }

        let metadata = read_metadata(conn).map_err(|e| match e {
            CatalogError::InvalidMetadata { reason, .. } => CatalogError::InvalidMetadata {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        if metadata.schema_version != SCHEMA_VERSION {
            return Err(mismatch(Some(metadata.schema_version)));
        }

        if !Self::table_exists(conn, PAGES_TABLE)? {
            return Err(CatalogError::InvalidMetadata {
                path: path.to_path_buf(),
                reason: format!("missing {} relation", PAGES_TABLE),
            });
        }

        Ok(metadata)
    }
}

fn not_a_catalog(path: &Path, err: rusqlite::Error) -> CatalogError {
    CatalogError::InvalidMetadata {
        path: path.to_path_buf(),
        reason: format!("not a catalog database: {}", err),
    }
}

/// Read the metadata row of an open catalog connection
pub(crate) fn read_metadata(conn: &Connection) -> Result<CatalogMetadata> {
    let (schema_version, last_saved): (i64, Option<String>) = conn.query_row(
        "SELECT schema_version, last_saved FROM toc_metadata LIMIT 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let last_saved = last_saved
        .map(|text| {
            DateTime::parse_from_rfc3339(&text)
                .map(|stamp| stamp.with_timezone(&Utc))
                .map_err(|e| CatalogError::InvalidMetadata {
                    path: Default::default(),
                    reason: format!("last_saved '{}' is not RFC 3339: {}", text, e),
                })
        })
        .transpose()?;

    Ok(CatalogMetadata {
        schema_version,
        last_saved,
    })
}

/// Overwrite the `last_saved` stamp of an open catalog connection
pub(crate) fn write_last_saved(conn: &Connection, stamp: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE toc_metadata SET last_saved = ?1",
        [stamp.to_rfc3339()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unlocked_store() -> CatalogStore {
        CatalogStore::new(CatalogConfig::default().with_lock(false))
    }

    #[test]
    fn test_fresh_catalog_has_current_version() -> Result<()> {
        let catalog = unlocked_store().open_in_memory()?;
        let metadata = catalog.metadata()?;
        assert_eq!(metadata.schema_version, SCHEMA_VERSION);
        assert_eq!(metadata.last_saved, None);
        assert!(catalog.is_empty()?);
        assert!(catalog.container().is_none());
        assert!(catalog.source_path().is_none());
        Ok(())
    }

    #[test]
    fn test_garbage_file_is_not_a_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let garbage = temp_dir.path().join("toc.db");
        std::fs::write(&garbage, vec![b'x'; 4096]).unwrap();

        match unlocked_store().open_from_file(&garbage) {
            Err(CatalogError::InvalidMetadata { path, reason }) => {
                assert_eq!(path, garbage);
                assert!(reason.starts_with("not a catalog database"), "{}", reason);
            }
            other => panic!("expected InvalidMetadata, got {:?}", other.map(|_| ())),
        }
        assert!(matches!(
            unlocked_store().load(Some(temp_dir.path())),
            Err(CatalogError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("toc.db");
        match unlocked_store().open_from_file(&missing) {
            Err(CatalogError::MissingCatalog { container }) => assert_eq!(container, missing),
            other => panic!("expected MissingCatalog, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_without_container() {
        let err = unlocked_store().load(None).unwrap_err();
        assert!(matches!(err, CatalogError::MissingCatalog { .. }));
        assert!(err.to_string().contains("No table of contents found for container"));
    }

    #[test]
    fn test_load_names_unresolvable_container() {
        let temp_dir = TempDir::new().unwrap();
        let err = unlocked_store().load(Some(temp_dir.path())).unwrap_err();
        match err {
            CatalogError::MissingCatalog { container } => assert_eq!(container, temp_dir.path()),
            other => panic!("expected MissingCatalog, got {:?}", other),
        }
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("toc.db");
        {
            let conn = Connection::open(&path).unwrap();
            CatalogStore::initialize_schema(&conn).unwrap();
            conn.execute("UPDATE toc_metadata SET schema_version = 7", [])
                .unwrap();
        }

        match unlocked_store().open_from_file(&path) {
            Err(CatalogError::SchemaVersionMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, SCHEMA_VERSION);
                assert_eq!(found, Some(7));
            }
            other => panic!("expected SchemaVersionMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_foreign_database_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("toc.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE other (x INTEGER)").unwrap();
        }

        assert!(matches!(
            unlocked_store().open_from_file(&path),
            Err(CatalogError::SchemaVersionMismatch { found: None, .. })
        ));
    }

    #[test]
    fn test_corrupt_timestamp_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("toc.db");
        {
            let conn = Connection::open(&path).unwrap();
            CatalogStore::initialize_schema(&conn).unwrap();
            conn.execute("UPDATE toc_metadata SET last_saved = 'datetime now'", [])
                .unwrap();
        }

        match unlocked_store().open_from_file(&path) {
            Err(CatalogError::InvalidMetadata { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected InvalidMetadata, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_open_or_create_binds_container() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let catalog = unlocked_store().open_or_create(temp_dir.path())?;
        assert_eq!(
            catalog.container().map(|c| c.path().to_path_buf()),
            Some(temp_dir.path().to_path_buf())
        );
        assert!(catalog.source_path().is_none());
        Ok(())
    }
}
