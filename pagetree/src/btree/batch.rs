//! Page bookkeeping for one copy-on-write operation.
//!
//! A mutation never frees a page while it is still reachable from the
//! current root. Pages replaced during the operation are recorded as
//! superseded and freed by `commit` once the new root is installed. If the
//! operation fails, `abort` frees the pages it allocated instead, leaving the
//! store exactly as it was.

use crate::btree::node::Node;
use crate::btree::tree::BTreeError;
use crate::storage::{PageId, PageStore};

pub struct PageBatch<'a, S: PageStore> {
    store: &'a mut S,
    allocated: Vec<PageId>,
    superseded: Vec<PageId>,
}

impl<'a, S: PageStore> PageBatch<'a, S> {
    pub const fn new(store: &'a mut S) -> Self {
        Self {
            store,
            allocated: Vec::new(),
            superseded: Vec::new(),
        }
    }

    /// Read and decode a node.
    pub fn read(&mut self, page_id: PageId) -> Result<Node, BTreeError> {
        read_node(self.store, page_id)
    }

    /// Write a node to a fresh page.
    pub fn allocate(&mut self, node: &Node) -> Result<PageId, BTreeError> {
        let page = node.to_page()?;
        let page_id = self.store.allocate(&page)?;
        self.allocated.push(page_id);
        Ok(page_id)
    }

    /// Schedule `page_id` to be freed on commit.
    pub fn supersede(&mut self, page_id: PageId) {
        self.superseded.push(page_id);
    }

    /// Free every superseded page.
    ///
    /// Called after the new root is installed, so a failed free only leaks
    /// the page.
    pub fn commit(self) {
        tracing::trace!(
            allocated = self.allocated.len(),
            freed = self.superseded.len(),
            "committing page batch"
        );
        for page_id in self.superseded {
            if let Err(e) = self.store.free(page_id) {
                tracing::warn!("leaking superseded page {page_id}: {e}");
            }
        }
    }

    /// Free every page allocated by this batch. Superseded pages stay live.
    pub fn abort(self) {
        tracing::debug!(
            allocated = self.allocated.len(),
            "aborting page batch"
        );
        for page_id in self.allocated {
            if let Err(e) = self.store.free(page_id) {
                tracing::warn!("leaking page {page_id} from aborted operation: {e}");
            }
        }
    }
}

/// Read and decode the node stored at `page_id`.
pub fn read_node<S: PageStore + ?Sized>(store: &mut S, page_id: PageId) -> Result<Node, BTreeError> {
    let page = store.read(page_id)?;
    Ok(Node::from_page(&page)?)
}
