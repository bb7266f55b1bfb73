//! Copy-on-write insertion and node splitting.
//!
//! `tree_insert` rebuilds the path from a node down to the target leaf. Each
//! rebuilt node lives in a scratch buffer and may exceed a page; the parent
//! splits it with `split_node3` into at most three page-sized nodes before
//! writing them out.

use crate::btree::batch::PageBatch;
use crate::btree::node::{HEADER, MAX_PAGE_SIZE, Node, NodeType};
use crate::btree::tree::{BTreeError, InvariantFault};
use crate::storage::PageStore;

/// Insert or update `key` in the subtree rooted at `node`.
///
/// Returns the rebuilt node, which may be larger than a page.
pub fn tree_insert<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    node: &Node,
    key: &[u8],
    value: &[u8],
) -> Result<Node, BTreeError> {
    let mut new = Node::scratch();
    let idx = node.lookup_le(key);

    match node.node_type() {
        NodeType::Leaf => {
            if idx < node.num_keys() && node.key(idx) == key {
                leaf_update(&mut new, node, idx, key, value);
            } else if idx < node.num_keys() && node.key(idx) < key {
                leaf_insert(&mut new, node, idx + 1, key, value);
            } else {
                // Only reachable for a leaf without the sentinel.
                leaf_insert(&mut new, node, idx, key, value);
            }
        }
        NodeType::Internal => node_insert(batch, &mut new, node, idx, key, value)?,
    }

    Ok(new)
}

/// Build `new` as `old` with a new entry at `idx`.
pub fn leaf_insert(new: &mut Node, old: &Node, idx: usize, key: &[u8], value: &[u8]) {
    new.set_header(NodeType::Leaf, old.num_keys() + 1);
    new.copy_range(old, 0, 0, idx);
    new.insert_kv(idx, 0, key, value);
    new.copy_range(old, idx + 1, idx, old.num_keys() - idx);
}

/// Build `new` as `old` with the entry at `idx` replaced.
pub fn leaf_update(new: &mut Node, old: &Node, idx: usize, key: &[u8], value: &[u8]) {
    new.set_header(NodeType::Leaf, old.num_keys());
    new.copy_range(old, 0, 0, idx);
    new.insert_kv(idx, 0, key, value);
    new.copy_range(old, idx + 1, idx + 1, old.num_keys() - (idx + 1));
}

/// Insert into the child at `idx` and rebuild the internal node around it.
fn node_insert<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    new: &mut Node,
    node: &Node,
    idx: usize,
    key: &[u8],
    value: &[u8],
) -> Result<(), BTreeError> {
    let child_ptr = node.pointer(idx);
    let child = batch.read(child_ptr)?;

    let updated = tree_insert(batch, &child, key, value)?;
    let parts = split_node3(updated)?;

    batch.supersede(child_ptr);
    node_replace_kid_n(batch, new, node, idx, &parts)
}

/// Build `new` as `old` with the link at `idx` replaced by links to `kids`.
///
/// Each kid is written to a fresh page and linked under its first key.
pub fn node_replace_kid_n<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    new: &mut Node,
    old: &Node,
    idx: usize,
    kids: &[Node],
) -> Result<(), BTreeError> {
    let inc = kids.len();
    new.set_header(NodeType::Internal, old.num_keys() + inc - 1);
    new.copy_range(old, 0, 0, idx);
    for (i, kid) in kids.iter().enumerate() {
        let ptr = batch.allocate(kid)?;
        new.insert_kv(idx + i, ptr, kid.key(0), &[]);
    }
    new.copy_range(old, idx + inc, idx + 1, old.num_keys() - (idx + 1));
    Ok(())
}

/// Split `old` in two so that the right half fits a page.
///
/// The left half may still be oversized; `split_node3` splits it again.
fn split_node2(old: &Node) -> (Node, Node) {
    let nkeys = old.num_keys();
    let left_bytes = |nleft: usize| HEADER + 10 * nleft + old.offset(nleft);
    let right_bytes = |nleft: usize| old.nbytes() - left_bytes(nleft) + HEADER;

    let mut nleft = nkeys / 2;
    while nleft > 1 && left_bytes(nleft) > MAX_PAGE_SIZE {
        nleft -= 1;
    }
    while nleft + 1 < nkeys && right_bytes(nleft) > MAX_PAGE_SIZE {
        nleft += 1;
    }
    let nright = nkeys - nleft;

    let node_type = old.node_type();

    let mut left = Node::scratch();
    left.set_header(node_type, nleft);
    left.copy_range(old, 0, 0, nleft);

    let mut right = Node::scratch();
    right.set_header(node_type, nright);
    right.copy_range(old, 0, nleft, nright);

    (left, right)
}

/// Split a node into one to three nodes that each fit a page.
pub fn split_node3(old: Node) -> Result<Vec<Node>, BTreeError> {
    if old.nbytes() <= MAX_PAGE_SIZE {
        return Ok(vec![old]);
    }
    ensure_splittable(&old)?;

    let (left, right) = split_node2(&old);
    ensure_fits(&right)?;
    if left.nbytes() <= MAX_PAGE_SIZE {
        tracing::trace!(
            left = left.num_keys(),
            right = right.num_keys(),
            "split node in two"
        );
        return Ok(vec![left, right]);
    }
    ensure_splittable(&left)?;

    let (leftleft, middle) = split_node2(&left);
    ensure_fits(&leftleft)?;
    ensure_fits(&middle)?;
    tracing::trace!(
        leftleft = leftleft.num_keys(),
        middle = middle.num_keys(),
        right = right.num_keys(),
        "split node in three"
    );
    Ok(vec![leftleft, middle, right])
}

fn ensure_fits(node: &Node) -> Result<(), BTreeError> {
    if node.nbytes() > MAX_PAGE_SIZE {
        return Err(InvariantFault::SplitOverflow {
            nbytes: node.nbytes(),
        }
        .into());
    }
    Ok(())
}

fn ensure_splittable(node: &Node) -> Result<(), BTreeError> {
    if node.num_keys() < 2 {
        return Err(InvariantFault::SplitOverflow {
            nbytes: node.nbytes(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node::MAX_VALUE_SIZE;
    use crate::storage::MemoryStore;

    fn leaf_of(entries: &[(Vec<u8>, Vec<u8>)]) -> Node {
        let mut node = Node::scratch();
        node.set_header(NodeType::Leaf, entries.len());
        for (i, (key, value)) in entries.iter().enumerate() {
            node.insert_kv(i, 0, key, value);
        }
        node
    }

    fn numbered(count: usize, value_len: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..count)
            .map(|i| (format!("key{i:04}").into_bytes(), vec![b'v'; value_len]))
            .collect()
    }

    #[test]
    fn test_leaf_insert_keeps_order() {
        let old = leaf_of(&[(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]);
        let mut new = Node::scratch();
        leaf_insert(&mut new, &old, 1, b"b", b"2");

        assert_eq!(new.num_keys(), 3);
        assert_eq!(new.key(0), b"a");
        assert_eq!(new.key(1), b"b");
        assert_eq!(new.value(1), b"2");
        assert_eq!(new.key(2), b"c");
        assert_eq!(new.value(2), b"3");
    }

    #[test]
    fn test_leaf_update_replaces_value() {
        let old = leaf_of(&[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
        let mut new = Node::scratch();
        leaf_update(&mut new, &old, 1, b"b", b"twenty");

        assert_eq!(new.num_keys(), 2);
        assert_eq!(new.value(0), b"1");
        assert_eq!(new.value(1), b"twenty");
    }

    #[test]
    fn test_split_node3_keeps_small_node_whole() {
        let node = leaf_of(&numbered(10, 10));
        let parts = split_node3(node).expect("split");
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_split_node3_two_way() {
        // 30 entries of ~200 bytes: about 6.3KB.
        let node = leaf_of(&numbered(30, 200));
        assert!(node.nbytes() > MAX_PAGE_SIZE);

        let parts = split_node3(node).expect("split");
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.nbytes() <= MAX_PAGE_SIZE));
        assert_eq!(parts[0].num_keys() + parts[1].num_keys(), 30);
        assert!(parts[0].key(parts[0].num_keys() - 1) < parts[1].key(0));
    }

    #[test]
    fn test_split_node3_three_way() {
        // A large entry in the middle of small ones forces a second split.
        let mut entries = numbered(3, 10);
        entries.push((b"key0003".to_vec(), vec![b'x'; MAX_VALUE_SIZE]));
        entries.push((b"key0004".to_vec(), vec![b'y'; MAX_VALUE_SIZE]));
        entries.push((b"key0005".to_vec(), vec![b'z'; 2000]));
        let node = leaf_of(&entries);

        let parts = split_node3(node).expect("split");
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.nbytes() <= MAX_PAGE_SIZE));
        let total: usize = parts.iter().map(Node::num_keys).sum();
        assert_eq!(total, 6);
        assert!(parts[0].key(0) < parts[1].key(0));
        assert!(parts[1].key(0) < parts[2].key(0));
    }

    #[test]
    fn test_split_single_oversized_entry_is_a_fault() {
        let mut node = Node::scratch();
        node.set_header(NodeType::Leaf, 1);
        node.insert_kv(0, 0, b"k", &vec![0u8; MAX_PAGE_SIZE]);

        assert!(matches!(
            split_node3(node),
            Err(BTreeError::Invariant(InvariantFault::SplitOverflow { .. }))
        ));
    }

    #[test]
    fn test_node_replace_kid_n_allocates_each_kid() {
        let mut store = MemoryStore::new();
        let mut batch = PageBatch::new(&mut store);

        let mut parent = Node::new();
        parent.set_header(NodeType::Internal, 2);
        parent.insert_kv(0, 100, b"", &[]);
        parent.insert_kv(1, 200, b"m", &[]);

        let kids = vec![
            leaf_of(&[(b"".to_vec(), Vec::new()), (b"b".to_vec(), b"1".to_vec())]),
            leaf_of(&[(b"f".to_vec(), b"2".to_vec())]),
        ];

        let mut new = Node::scratch();
        node_replace_kid_n(&mut batch, &mut new, &parent, 0, &kids).expect("replace");
        batch.commit();

        assert_eq!(new.num_keys(), 3);
        assert_eq!(new.key(0), b"");
        assert_eq!(new.key(1), b"f");
        assert_eq!(new.key(2), b"m");
        assert_eq!(new.pointer(2), 200);
        assert!(store.is_live(new.pointer(0)));
        assert!(store.is_live(new.pointer(1)));
    }
}
