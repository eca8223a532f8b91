//! Reconciliation between a container and its catalog
//!
//! Compares the physically present pages of a container with the recorded entries and
//! sorts every key into exactly one of three sets. Reconciliation only reports: adding
//! discovered pages or dealing with orphans is left to the caller.

use crate::core::catalog::{PageCatalog, PageKey};
use crate::core::container::ContainerListing;
use crate::core::error::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Outcome of comparing a container listing with a catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Present in the container, missing from the catalog
    pub new: BTreeSet<PageKey>,
    /// Recorded in the catalog, missing from the container
    pub orphaned: BTreeSet<PageKey>,
    /// Present in both
    pub matched: BTreeSet<PageKey>,
}

impl Reconciliation {
    /// Whether container and catalog agree
    pub fn is_consistent(&self) -> bool {
        self.new.is_empty() && self.orphaned.is_empty()
    }
}

/// Stateless comparison of container listings against catalogs
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine
    }

    /// Compare `listing` with the entries of `catalog`
    ///
    /// Mismatches are the normal output, not errors; the only failure is the catalog
    /// store itself failing to read.
    pub fn reconcile(
        &self,
        listing: &ContainerListing,
        catalog: &PageCatalog,
    ) -> Result<Reconciliation> {
        let recorded = catalog.keys()?;
        let result = Self::compare(listing.keys(), &recorded);

        if result.is_consistent() {
            debug!("Catalog matches container ({} pages)", result.matched.len());
        } else {
            info!(
                "Reconciled catalog: {} matched, {} new, {} orphaned",
                result.matched.len(),
                result.new.len(),
                result.orphaned.len()
            );
        }
        Ok(result)
    }

    /// Pure set comparison of physical and recorded keys
    pub fn compare(physical: &BTreeSet<PageKey>, recorded: &BTreeSet<PageKey>) -> Reconciliation {
        Reconciliation {
            new: physical.difference(recorded).cloned().collect(),
            orphaned: recorded.difference(physical).cloned().collect(),
            matched: physical.intersection(recorded).cloned().collect(),
        }
    }
}
