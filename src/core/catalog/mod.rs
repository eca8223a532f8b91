//! Page catalog
//!
//! The in-memory table of contents for one workbook: an ordered set of
//! [`PageEntry`] rows plus the catalog metadata, optionally bound to the
//! [`Container`] it describes.
//!
//! Mutations take `&mut self` and reads take `&self`, so a catalog has a single writer
//! and no read sequence can observe a half-applied change. Nothing here touches disk;
//! see [`PersistenceManager`](crate::core::persistence::PersistenceManager) for saving.

pub mod entry;
pub mod query;

pub use entry::{
    NewPage, PageAddress, PageEntry, PageId, PageKey, PageState, DEFAULT_FORM_TYPE,
    UNASSIGNED_PAGE,
};
pub use query::{PageQuery, Pages};

use crate::core::container::Container;
use crate::core::error::{CatalogError, Result};
use crate::core::lock::CatalogLock;
use crate::core::store::{self, CatalogMetadata};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Table of contents for one workbook
#[derive(Debug)]
pub struct PageCatalog {
    conn: Connection,
    container: Option<Container>,
    source: Option<PathBuf>,
    properties: BTreeMap<String, String>,
    dirty: bool,
    _lock: Option<CatalogLock>,
}

impl PageCatalog {
    pub(crate) fn from_parts(
        conn: Connection,
        container: Option<Container>,
        source: Option<PathBuf>,
        lock: Option<CatalogLock>,
        dirty: bool,
    ) -> Self {
        PageCatalog {
            conn,
            container,
            source,
            properties: BTreeMap::new(),
            dirty,
            _lock: lock,
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn bind_container(&mut self, container: Container) {
        self.container = Some(container);
    }

    /// Record a successful save to `path`
    ///
    /// An unbound catalog adopts `path` as its source so later saves default to it.
    pub(crate) fn mark_saved(&mut self, path: &Path, stamp: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(stamp) = stamp {
            store::write_last_saved(&self.conn, stamp)?;
        }
        if self.source.is_none() {
            self.source = Some(path.to_path_buf());
        }
        self.dirty = false;
        Ok(())
    }

    /// Container this catalog describes, if any
    pub fn container(&self) -> Option<&Container> {
        self.container.as_ref()
    }

    /// File this catalog was loaded from or first saved to
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Whether the catalog changed since it was loaded or last saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn metadata(&self) -> Result<CatalogMetadata> {
        store::read_metadata(&self.conn)
    }

    /// Display-only properties; not part of the persisted schema
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn set_property<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM toc_pages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Add a page and return its new id
    ///
    /// Rejects a missing or malformed filename with [`CatalogError::InvalidPageEntry`]
    /// and an already catalogued `(filename, page_number)` with
    /// [`CatalogError::DuplicatePage`]. The catalog is unchanged on error.
    pub fn add_page(&mut self, page: NewPage) -> Result<PageId> {
        page.validate()?;

        let tx = self.conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM toc_pages WHERE filename = ?1 AND page_number = ?2",
                params![page.filename, page.page_number],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Err(CatalogError::DuplicatePage {
                filename: page.filename,
                page_number: page.page_number,
            });
        }

        tx.execute(
            "INSERT INTO toc_pages (filename, page_number, form_type, registered_filename,
                                    file_checksum, comments, excluded)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                page.filename,
                page.page_number,
                page.form_type,
                page.registered_filename,
                page.file_checksum,
                page.comments,
                page.excluded
            ],
        )?;
        let page_id = PageId::new(tx.last_insert_rowid());
        tx.commit()?;

        self.dirty = true;
        debug!("Catalogued page {} as {}", page.filename, page_id);
        Ok(page_id)
    }

    /// Entries matching `query`, in `page_id` order
    pub fn get_pages(&self, query: PageQuery) -> Pages<'_> {
        Pages::new(self, query)
    }

    /// Every entry, in `page_id` order
    pub fn pages(&self) -> Pages<'_> {
        self.get_pages(PageQuery::all())
    }

    pub fn get_page(&self, page_id: PageId) -> Result<PageEntry> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM toc_pages WHERE page_id = ?1",
                    PageEntry::COLUMNS
                ),
                [page_id.get()],
                PageEntry::from_row,
            )
            .optional()?
            .ok_or(CatalogError::UnknownPageId(page_id))
    }

    /// Record the aligned output of a page
    pub fn add_registered_page(&mut self, page_id: PageId, filename: &str) -> Result<()> {
        if filename.trim().is_empty() {
            return Err(CatalogError::invalid_entry(format!(
                "registered filename for page {} cannot be empty",
                page_id
            )));
        }
        self.update(
            page_id,
            "UPDATE toc_pages SET registered_filename = ?1 WHERE page_id = ?2",
            params![filename, page_id.get()],
        )?;
        debug!("Registered page {} as {}", page_id, filename);
        Ok(())
    }

    /// Set the form type of a page, and its comments when given
    ///
    /// Going back to the default form type on a classified page is an
    /// [`CatalogError::InvalidTransition`]; switching between labels is allowed.
    pub fn set_classification(
        &mut self,
        page_id: PageId,
        form_type: &str,
        comments: Option<&str>,
    ) -> Result<()> {
        if form_type.trim().is_empty() {
            return Err(CatalogError::invalid_entry(format!(
                "form type for page {} cannot be empty",
                page_id
            )));
        }

        let entry = self.get_page(page_id)?;
        if form_type == DEFAULT_FORM_TYPE && entry.is_classified() {
            return Err(CatalogError::InvalidTransition {
                page_id,
                from: entry.state(),
                to: PageState::Catalogued,
            });
        }

        self.update(
            page_id,
            "UPDATE toc_pages SET form_type = ?1, comments = COALESCE(?2, comments)
             WHERE page_id = ?3",
            params![form_type, comments, page_id.get()],
        )?;
        debug!("Classified page {} as {}", page_id, form_type);
        Ok(())
    }

    pub fn set_excluded(&mut self, page_id: PageId, excluded: bool) -> Result<()> {
        self.update(
            page_id,
            "UPDATE toc_pages SET excluded = ?1 WHERE page_id = ?2",
            params![excluded, page_id.get()],
        )
    }

    /// Record the content hash of a page
    pub fn set_checksum(&mut self, page_id: PageId, checksum: &str) -> Result<()> {
        if checksum.trim().is_empty() {
            return Err(CatalogError::invalid_entry(format!(
                "checksum for page {} cannot be empty",
                page_id
            )));
        }
        self.update(
            page_id,
            "UPDATE toc_pages SET file_checksum = ?1 WHERE page_id = ?2",
            params![checksum, page_id.get()],
        )
    }

    /// Included pages still waiting for a form type
    pub fn unclassified(&self) -> Result<Vec<PageEntry>> {
        self.get_pages(PageQuery::all().form_type(DEFAULT_FORM_TYPE).skip_excluded())
            .collect()
    }

    /// Included pages with no registered output yet
    pub fn unregistered(&self) -> Result<Vec<PageEntry>> {
        self.get_pages(PageQuery::all().skip_excluded())
            .filter(|entry| entry.as_ref().map(|e| !e.is_registered()).unwrap_or(true))
            .collect()
    }

    /// Identity keys of every entry
    pub fn keys(&self) -> Result<BTreeSet<PageKey>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT filename, page_number FROM toc_pages")?;
        let keys = stmt
            .query_map([], |row| Ok(PageKey::new(row.get::<_, String>(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(keys)
    }

    fn update<P: Params>(&mut self, page_id: PageId, sql: &str, params: P) -> Result<()> {
        let changed = self.conn.execute(sql, params)?;
        if changed == 0 {
            return Err(CatalogError::UnknownPageId(page_id));
        }
        self.dirty = true;
        Ok(())
    }
}
