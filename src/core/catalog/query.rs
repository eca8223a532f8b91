//! Page queries
//!
//! [`Pages`] is a lazy cursor over the page relation. It fetches entries in `page_id`
//! order a batch at a time and borrows the catalog, so the catalog cannot change while a
//! sequence is being read.

use super::entry::PageEntry;
use super::PageCatalog;
use crate::core::error::Result;
use rusqlite::params;
use std::collections::VecDeque;
use std::ops::RangeInclusive;

const BATCH_SIZE: i64 = 64;

/// Filter for [`PageCatalog::get_pages`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageQuery {
    /// Inclusive page-number range
    pub page_range: Option<RangeInclusive<i64>>,
    /// Exact form type
    pub form_type: Option<String>,
    /// Leave out excluded entries
    pub skip_excluded: bool,
}

impl PageQuery {
    /// Match every entry
    pub fn all() -> Self {
        Self::default()
    }

    pub fn page_range(mut self, range: RangeInclusive<i64>) -> Self {
        self.page_range = Some(range);
        self
    }

    pub fn form_type<S: Into<String>>(mut self, form_type: S) -> Self {
        self.form_type = Some(form_type.into());
        self
    }

    pub fn skip_excluded(mut self) -> Self {
        self.skip_excluded = true;
        self
    }
}

/// Lazy, restartable sequence of catalog entries
///
/// Yields `Err` at most once (the store failed) and then ends.
#[derive(Debug, Clone)]
pub struct Pages<'a> {
    catalog: &'a PageCatalog,
    query: PageQuery,
    cursor: i64,
    buffer: VecDeque<PageEntry>,
    exhausted: bool,
}

impl<'a> Pages<'a> {
    pub(crate) fn new(catalog: &'a PageCatalog, query: PageQuery) -> Self {
        Pages {
            catalog,
            query,
            cursor: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Start over from the first matching entry
    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    pub fn query(&self) -> &PageQuery {
        &self.query
    }

    fn fetch(&mut self) -> Result<()> {
        let (low, high) = match &self.query.page_range {
            Some(range) => (Some(*range.start()), Some(*range.end())),
            None => (None, None),
        };

        let sql = format!(
            "SELECT {} FROM toc_pages
             WHERE page_id > ?1
               AND (?2 IS NULL OR page_number >= ?2)
               AND (?3 IS NULL OR page_number <= ?3)
               AND (?4 IS NULL OR form_type = ?4)
               AND (?5 = 0 OR excluded = 0)
             ORDER BY page_id
             LIMIT ?6",
            PageEntry::COLUMNS
        );

        let catalog = self.catalog;
        let mut stmt = catalog.connection().prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![
                self.cursor,
                low,
                high,
                self.query.form_type,
                self.query.skip_excluded,
                BATCH_SIZE
            ],
            PageEntry::from_row,
        )?;

        let mut fetched = 0;
        for entry in rows {
            let entry = entry?;
            self.cursor = entry.page_id.get();
            self.buffer.push_back(entry);
            fetched += 1;
        }
        if fetched < BATCH_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for Pages<'_> {
    type Item = Result<PageEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
