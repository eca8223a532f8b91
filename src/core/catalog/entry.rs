//! Page entry data model

use crate::core::error::{CatalogError, Result};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Page number sentinel for pages without a logical position
pub const UNASSIGNED_PAGE: i64 = -1;

/// Form type of pages that have not been classified
pub const DEFAULT_FORM_TYPE: &str = "UNKNOWN";

/// Store-assigned page identifier
///
/// Monotonically increasing and never reused; the only handle accepted by mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(i64);

impl PageId {
    pub(crate) fn new(id: i64) -> Self {
        PageId(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses ids printed by [`Display`](fmt::Display); only the catalog that issued an id
/// will accept it.
impl std::str::FromStr for PageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(PageId)
    }
}

/// Processing state of a page, derived from its recorded fields
///
/// Pages only ever move forward: Catalogued → Classified → Registered.
/// Exclusion is tracked separately and does not affect the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PageState {
    /// Recorded in the catalog, form type still unknown
    Catalogued,
    /// Form type assigned
    Classified,
    /// Aligned output recorded
    Registered,
}

/// Container-relative page address: `<path>[:<index>]`
///
/// The index addresses a page embedded in a multi-page file or archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageAddress {
    path: String,
    index: Option<u32>,
}

impl PageAddress {
    /// Parse a page filename
    ///
    /// A trailing `:<digits>` is an index; any other colon is part of the path, so
    /// `C:\scans\a.png` stays a plain path. Blank filenames, a dangling `:` and an
    /// index with nothing before it are rejected.
    pub fn parse(filename: &str) -> Result<Self> {
        if filename.trim().is_empty() {
            return Err(CatalogError::invalid_entry("filename is required"));
        }
        if filename.ends_with(':') {
            return Err(CatalogError::invalid_entry(format!(
                "filename '{}' has an empty page index",
                filename
            )));
        }

        if let Some((path, index)) = filename.rsplit_once(':') {
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                if path.is_empty() {
                    return Err(CatalogError::invalid_entry(format!(
                        "filename '{}' has an index but no path",
                        filename
                    )));
                }
                let index = index.parse::<u32>().map_err(|_| {
                    CatalogError::invalid_entry(format!(
                        "page index in '{}' is out of range",
                        filename
                    ))
                })?;
                return Ok(PageAddress {
                    path: path.to_string(),
                    index: Some(index),
                });
            }
        }

        Ok(PageAddress {
            path: filename.to_string(),
            index: None,
        })
    }

    /// File part of the address
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Embedded page index, if any
    pub fn index(&self) -> Option<u32> {
        self.index
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}", self.path, index),
            None => write!(f, "{}", self.path),
        }
    }
}

/// Identity of a page shared by catalog entries and container listings
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub filename: String,
    pub page_number: i64,
}

impl PageKey {
    pub fn new<S: Into<String>>(filename: S, page_number: i64) -> Self {
        PageKey {
            filename: filename.into(),
            page_number,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.page_number == UNASSIGNED_PAGE {
            write!(f, "{}", self.filename)
        } else {
            write!(f, "{} (page {})", self.filename, self.page_number)
        }
    }
}

/// One catalogued page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub page_id: PageId,
    pub filename: String,
    pub page_number: i64,
    pub form_type: String,
    pub registered_filename: Option<String>,
    pub file_checksum: Option<String>,
    pub comments: Option<String>,
    pub excluded: bool,
}

impl PageEntry {
    /// Column list matching [`PageEntry::from_row`]
    pub(crate) const COLUMNS: &'static str = "page_id, filename, page_number, form_type, \
         registered_filename, file_checksum, comments, excluded";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(PageEntry {
            page_id: PageId(row.get(0)?),
            filename: row.get(1)?,
            page_number: row.get(2)?,
            form_type: row.get(3)?,
            registered_filename: row.get(4)?,
            file_checksum: row.get(5)?,
            comments: row.get(6)?,
            excluded: row.get(7)?,
        })
    }

    pub fn key(&self) -> PageKey {
        PageKey::new(self.filename.clone(), self.page_number)
    }

    pub fn state(&self) -> PageState {
        if self.registered_filename.is_some() {
            PageState::Registered
        } else if self.form_type != DEFAULT_FORM_TYPE {
            PageState::Classified
        } else {
            PageState::Catalogued
        }
    }

    pub fn is_classified(&self) -> bool {
        self.form_type != DEFAULT_FORM_TYPE
    }

    pub fn is_registered(&self) -> bool {
        self.registered_filename.is_some()
    }

    /// Parsed form of `filename`
    pub fn address(&self) -> Result<PageAddress> {
        PageAddress::parse(&self.filename)
    }
}

/// Fields for a new catalog entry
///
/// Only `filename` is required; everything else falls back to the catalog defaults
/// (unassigned page number, `UNKNOWN` form type, not excluded).
///
/// ```
/// use workbook_toc::NewPage;
///
/// let page = NewPage::new("workbook.tiff:3")
///     .page_number(3)
///     .form_type("PS2_REV_DEC_2016")
///     .comments("smudged corner");
/// assert_eq!(page.filename, "workbook.tiff:3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPage {
    pub filename: String,
    pub page_number: i64,
    pub form_type: String,
    pub registered_filename: Option<String>,
    pub file_checksum: Option<String>,
    pub comments: Option<String>,
    pub excluded: bool,
}

impl NewPage {
    pub fn new<S: Into<String>>(filename: S) -> Self {
        NewPage {
            filename: filename.into(),
            ..Default::default()
        }
    }

    pub fn page_number(mut self, page_number: i64) -> Self {
        self.page_number = page_number;
        self
    }

    pub fn form_type<S: Into<String>>(mut self, form_type: S) -> Self {
        self.form_type = form_type.into();
        self
    }

    pub fn registered_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.registered_filename = Some(filename.into());
        self
    }

    pub fn checksum<S: Into<String>>(mut self, checksum: S) -> Self {
        self.file_checksum = Some(checksum.into());
        self
    }

    pub fn comments<S: Into<String>>(mut self, comments: S) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        PageAddress::parse(&self.filename)?;
        if self.page_number < UNASSIGNED_PAGE {
            return Err(CatalogError::invalid_entry(format!(
                "page number {} for '{}' is negative",
                self.page_number, self.filename
            )));
        }
        if self.form_type.trim().is_empty() {
            return Err(CatalogError::invalid_entry(format!(
                "form type for '{}' cannot be empty",
                self.filename
            )));
        }
        if matches!(&self.registered_filename, Some(name) if name.trim().is_empty()) {
            return Err(CatalogError::invalid_entry(format!(
                "registered filename for '{}' cannot be empty",
                self.filename
            )));
        }
        Ok(())
    }
}

/// An entry with no filename; `add_page` rejects it until one is set
impl Default for NewPage {
    fn default() -> Self {
        NewPage {
            filename: String::new(),
            page_number: UNASSIGNED_PAGE,
            form_type: DEFAULT_FORM_TYPE.to_string(),
            registered_filename: None,
            file_checksum: None,
            comments: None,
            excluded: false,
        }
    }
}

impl From<PageKey> for NewPage {
    fn from(key: PageKey) -> Self {
        NewPage::new(key.filename).page_number(key.page_number)
    }
}
