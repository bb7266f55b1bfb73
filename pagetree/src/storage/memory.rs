//! In-memory page store.
//!
//! Pages live in a map keyed by id and ids come from a monotonic counter, so
//! an id is never reused. Besides serving as the test double for the tree,
//! the store can inject allocation failures to exercise the tree's rollback
//! path.

use std::collections::HashMap;

use crate::storage::io::{PageStore, StoreError};
use crate::storage::page::{Page, PageId};

/// Statistics about store operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of successful allocations.
    pub allocations: u64,
    /// Number of successful frees.
    pub frees: u64,
    /// Number of injected allocation failures.
    pub injected_failures: u64,
}

/// In-memory `PageStore` implementation.
#[derive(Debug)]
pub struct MemoryStore {
    pages: HashMap<PageId, Page>,
    next_page_id: PageId,
    /// Allocations left before injected failures start. `None` disables
    /// injection.
    allocations_before_failure: Option<u64>,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// Create an empty store. The first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_page_id: 1,
            allocations_before_failure: None,
            stats: MemoryStoreStats::default(),
        }
    }

    /// Number of pages currently allocated.
    #[must_use]
    pub fn live_pages(&self) -> usize {
        self.pages.len()
    }

    /// Whether `page_id` is currently allocated.
    #[must_use]
    pub fn is_live(&self, page_id: PageId) -> bool {
        self.pages.contains_key(&page_id)
    }

    /// Ids of all live pages, in ascending order.
    #[must_use]
    pub fn live_page_ids(&self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self.pages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Operation counters.
    #[must_use]
    pub const fn stats(&self) -> MemoryStoreStats {
        self.stats
    }

    /// Let `count` more allocations succeed, then fail every allocation
    /// until `clear_fault` is called.
    pub const fn fail_allocations_after(&mut self, count: u64) {
        self.allocations_before_failure = Some(count);
    }

    /// Stop injecting allocation failures.
    pub const fn clear_fault(&mut self) {
        self.allocations_before_failure = None;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryStore {
    fn read(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        self.stats.reads += 1;
        self.pages
            .get(&page_id)
            .cloned()
            .ok_or(StoreError::PageNotAllocated(page_id))
    }

    fn allocate(&mut self, page: &Page) -> Result<PageId, StoreError> {
        if let Some(remaining) = self.allocations_before_failure.as_mut() {
            if *remaining == 0 {
                self.stats.injected_failures += 1;
                return Err(StoreError::Io(std::io::Error::other(
                    "injected allocation failure",
                )));
            }
            *remaining -= 1;
        }

        let page_id = self.next_page_id;
        self.next_page_id += 1;
        self.pages.insert(page_id, page.clone());
        self.stats.allocations += 1;
        Ok(page_id)
    }

    fn free(&mut self, page_id: PageId) -> Result<(), StoreError> {
        self.pages
            .remove(&page_id)
            .ok_or(StoreError::PageNotAllocated(page_id))?;
        self.stats.frees += 1;
        Ok(())
    }
}
