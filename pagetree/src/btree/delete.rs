//! Copy-on-write deletion and sibling merging.

use crate::btree::batch::PageBatch;
use crate::btree::insert::{node_replace_kid_n, split_node3};
use crate::btree::node::{HEADER, MAX_PAGE_SIZE, Node, NodeType};
use crate::btree::tree::{BTreeError, InvariantFault};
use crate::storage::{PageId, PageStore};

/// Sibling chosen to absorb an underfull child.
#[derive(Debug)]
enum Merge {
    None,
    Left(Node),
    Right(Node),
}

/// Delete `key` from the subtree rooted at `node`.
///
/// Returns `None` if the key is absent; nothing has been allocated or
/// superseded in that case.
pub fn tree_delete<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    node: &Node,
    key: &[u8],
    merge_threshold: usize,
) -> Result<Option<Node>, BTreeError> {
    let idx = node.lookup_le(key);

    match node.node_type() {
        NodeType::Leaf => {
            if idx >= node.num_keys() || node.key(idx) != key {
                return Ok(None);
            }
            let mut new = Node::new();
            leaf_delete(&mut new, node, idx);
            Ok(Some(new))
        }
        NodeType::Internal => node_delete(batch, node, idx, key, merge_threshold),
    }
}

/// Build `new` as `old` without the entry at `idx`.
pub fn leaf_delete(new: &mut Node, old: &Node, idx: usize) {
    new.set_header(NodeType::Leaf, old.num_keys() - 1);
    new.copy_range(old, 0, 0, idx);
    new.copy_range(old, idx, idx + 1, old.num_keys() - (idx + 1));
}

fn node_delete<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    node: &Node,
    idx: usize,
    key: &[u8],
    merge_threshold: usize,
) -> Result<Option<Node>, BTreeError> {
    let child_ptr = node.pointer(idx);
    let child = batch.read(child_ptr)?;
    let Some(updated) = tree_delete(batch, &child, key, merge_threshold)? else {
        return Ok(None);
    };
    batch.supersede(child_ptr);

    let mut new = Node::scratch();
    match should_merge(batch, node, idx, &updated, merge_threshold)? {
        Merge::Left(sibling) => {
            let merged = node_merge(&sibling, &updated)?;
            batch.supersede(node.pointer(idx - 1));
            let ptr = batch.allocate(&merged)?;
            tracing::trace!(keys = merged.num_keys(), "merged child into left sibling");
            node_replace_2_links(&mut new, node, idx - 1, ptr, merged.key(0));
        }
        Merge::Right(sibling) => {
            let merged = node_merge(&updated, &sibling)?;
            batch.supersede(node.pointer(idx + 1));
            let ptr = batch.allocate(&merged)?;
            tracing::trace!(keys = merged.num_keys(), "merged right sibling into child");
            node_replace_2_links(&mut new, node, idx, ptr, merged.key(0));
        }
        Merge::None if updated.num_keys() == 0 => {
            // Drop the empty child. A parent left without links empties too.
            node_remove_link(&mut new, node, idx);
        }
        Merge::None => {
            let parts = split_node3(updated)?;
            node_replace_kid_n(batch, &mut new, node, idx, &parts)?;
        }
    }

    Ok(Some(new))
}

/// Decide whether the updated child at `idx` should merge with a sibling.
fn should_merge<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    node: &Node,
    idx: usize,
    updated: &Node,
    merge_threshold: usize,
) -> Result<Merge, BTreeError> {
    if updated.nbytes() > merge_threshold {
        return Ok(Merge::None);
    }

    if idx > 0 {
        let sibling = batch.read(node.pointer(idx - 1))?;
        if sibling.nbytes() + updated.nbytes() - HEADER <= MAX_PAGE_SIZE {
            return Ok(Merge::Left(sibling));
        }
    }

    if idx + 1 < node.num_keys() {
        let sibling = batch.read(node.pointer(idx + 1))?;
        if sibling.nbytes() + updated.nbytes() - HEADER <= MAX_PAGE_SIZE {
            return Ok(Merge::Right(sibling));
        }
    }

    Ok(Merge::None)
}

/// Concatenate two adjacent nodes of the same type.
pub fn node_merge(left: &Node, right: &Node) -> Result<Node, BTreeError> {
    let node_type = left.node_type();
    if node_type != right.node_type() {
        return Err(InvariantFault::MergeTypeMismatch.into());
    }

    let mut new = Node::scratch();
    new.set_header(node_type, left.num_keys() + right.num_keys());
    new.copy_range(left, 0, 0, left.num_keys());
    new.copy_range(right, left.num_keys(), 0, right.num_keys());
    Ok(new)
}

/// Build `new` as `old` with the links at `idx` and `idx + 1` replaced by
/// one link.
pub fn node_replace_2_links(new: &mut Node, old: &Node, idx: usize, ptr: PageId, key: &[u8]) {
    new.set_header(NodeType::Internal, old.num_keys() - 1);
    new.copy_range(old, 0, 0, idx);
    new.insert_kv(idx, ptr, key, &[]);
    new.copy_range(old, idx + 1, idx + 2, old.num_keys() - (idx + 2));
}

/// Build `new` as `old` without the link at `idx`.
pub fn node_remove_link(new: &mut Node, old: &Node, idx: usize) {
    new.set_header(NodeType::Internal, old.num_keys() - 1);
    new.copy_range(old, 0, 0, idx);
    new.copy_range(old, idx, idx + 1, old.num_keys() - (idx + 1));
}
