//! The Top-IDs Index (§3, §4.8): a deduplicated, page-ordered ID
//! sequence over the ranked universe.

use parking_lot::RwLock;
use std::collections::BTreeMap;

struct Inner {
    pages: BTreeMap<u32, Vec<String>>,
    cached: Vec<String>,
    dirty: bool,
}

pub struct TopIdsReport {
    pub page_count: usize,
    pub total_retained: usize,
    pub dirty: bool,
}

/// Guarded by its own mutex (§5); rebuild happens atomically under the
/// write lock so `get_top_ids` never observes a partially-rebuilt
/// sequence.
pub struct TopIdsIndex {
    inner: RwLock<Inner>,
}

impl Default for TopIdsIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TopIdsIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                pages: BTreeMap::new(),
                cached: Vec::new(),
                dirty: false,
            }),
        }
    }

    /// Copies `ids` in for `page` and marks the index dirty.
    pub fn update_page_ids(&self, page: u32, ids: &[String]) {
        let mut inner = self.inner.write();
        inner.pages.insert(page, ids.to_vec());
        inner.dirty = true;
    }

    /// Rebuilds the cached concatenation if dirty, then returns the first
    /// `limit` IDs (0 or >= length returns everything, as a defensive
    /// copy).
    pub fn get_top_ids(&self, limit: usize) -> Vec<String> {
        let mut inner = self.inner.write();
        if inner.dirty {
            rebuild(&mut inner);
        }

        if limit == 0 || limit >= inner.cached.len() {
            inner.cached.clone()
        } else {
            inner.cached[..limit].to_vec()
        }
    }

    pub fn report(&self) -> TopIdsReport {
        let inner = self.inner.read();
        TopIdsReport {
            page_count: inner.pages.len(),
            total_retained: inner.cached.len(),
            dirty: inner.dirty,
        }
    }
}

/// Ascending page order, first-occurrence-wins across overlapping pages.
fn rebuild(inner: &mut Inner) {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for ids in inner.pages.values() {
        for id in ids {
            if seen.insert(id.clone()) {
                out.push(id.clone());
            }
        }
    }

    inner.cached = out;
    inner.dirty = false;
}
