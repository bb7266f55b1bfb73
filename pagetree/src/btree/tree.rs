//! Copy-on-write B+Tree driver.
//!
//! The tree owns a `PageStore` and a root page id. Every mutation rebuilds
//! the path from the root to the affected leaf on fresh pages, installs the
//! new root, and only then frees the pages it replaced. A failed mutation
//! frees the pages it allocated and leaves the root untouched.
//!
//! The leftmost leaf always starts with the sentinel: an entry with the empty
//! key. It makes every internal node's first link key the empty key, so a
//! lookup never falls off the left edge. The sentinel is never returned by
//! `get` or iteration.

use crate::btree::batch::{PageBatch, read_node};
use crate::btree::delete::tree_delete;
use crate::btree::insert::{split_node3, tree_insert};
use crate::btree::node::{MAX_KEY_SIZE, MAX_VALUE_SIZE, Node, NodeError, NodeType};
use crate::config::TreeConfig;
use crate::storage::{PageId, PageStore, StoreError};

/// A B+Tree over a page store.
#[derive(Debug)]
pub struct BTree<S: PageStore> {
    store: S,
    root: PageId,
    config: TreeConfig,
}

/// Shape and size of a tree, as reported by `BTree::verify`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels; 0 for an empty tree.
    pub height: usize,
    pub internal_pages: usize,
    pub leaf_pages: usize,
    /// Stored entries, not counting the sentinel.
    pub entries: usize,
    /// Sum of `nbytes()` over every page.
    pub bytes_used: usize,
}

impl<S: PageStore> BTree<S> {
    /// Create an empty tree over `store`.
    pub fn new(store: S) -> Self {
        Self::open(store, 0)
    }

    /// Attach to an existing tree rooted at `root` (0 = empty).
    pub fn open(store: S, root: PageId) -> Self {
        Self {
            store,
            root,
            config: TreeConfig::default(),
        }
    }

    /// Replace the tree's configuration.
    #[must_use]
    pub const fn with_config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn root(&self) -> PageId {
        self.root
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root == 0
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the store. Freeing tree pages through it corrupts
    /// the tree.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Look up the value stored under `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BTreeError> {
        if self.root == 0 || key.is_empty() {
            return Ok(None);
        }

        let mut node = read_node(&mut self.store, self.root)?;
        loop {
            let idx = node.lookup_le(key);
            match node.node_type() {
                NodeType::Leaf => {
                    if idx < node.num_keys() && node.key(idx) == key {
                        return Ok(Some(node.value(idx).to_vec()));
                    }
                    return Ok(None);
                }
                NodeType::Internal => {
                    node = read_node(&mut self.store, node.pointer(idx))?;
                }
            }
        }
    }

    /// Insert `key` or replace its value.
    ///
    /// # Errors
    ///
    /// Rejects an empty key, a key over `MAX_KEY_SIZE` bytes and a value over
    /// `MAX_VALUE_SIZE` bytes before touching the store. Store and invariant
    /// failures leave the tree as it was.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), BTreeError> {
        validate_entry(key, value)?;

        let mut batch = PageBatch::new(&mut self.store);
        match insert_root(&mut batch, self.root, key, value) {
            Ok(new_root) => {
                self.root = new_root;
                batch.commit();
                Ok(())
            }
            Err(e) => {
                batch.abort();
                Err(e)
            }
        }
    }

    /// Delete `key`. Returns whether it was present.
    ///
    /// Deleting an absent key changes nothing and writes nothing.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, BTreeError> {
        if self.root == 0 || key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Ok(false);
        }

        let mut batch = PageBatch::new(&mut self.store);
        match delete_root(&mut batch, self.root, key, self.config.merge_threshold) {
            Ok(Some(new_root)) => {
                self.root = new_root;
                batch.commit();
                Ok(true)
            }
            // Nothing was allocated or superseded.
            Ok(None) => Ok(false),
            Err(e) => {
                batch.abort();
                Err(e)
            }
        }
    }

    /// Iterate over every entry in key order.
    pub fn iter(&mut self) -> Result<BTreeIterator<'_, S>, BTreeError> {
        self.iter_from(b"")
    }

    /// Iterate over entries with keys `>= start` in key order.
    pub fn iter_from(&mut self, start: &[u8]) -> Result<BTreeIterator<'_, S>, BTreeError> {
        let mut stack = Vec::new();

        if self.root != 0 {
            let mut node = read_node(&mut self.store, self.root)?;
            loop {
                let mut idx = node.lookup_le(start);
                if node.node_type() == NodeType::Leaf {
                    if idx < node.num_keys() && node.key(idx) < start {
                        idx += 1;
                    }
                    stack.push((node, idx));
                    break;
                }
                let child = read_node(&mut self.store, node.pointer(idx))?;
                stack.push((node, idx));
                node = child;
            }
        }

        Ok(BTreeIterator {
            store: &mut self.store,
            stack,
        })
    }

    /// Count the entries in the tree.
    pub fn count(&mut self) -> Result<usize, BTreeError> {
        let mut iter = self.iter()?;
        let mut count = 0;
        while iter.next_entry()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Number of levels; 0 for an empty tree.
    pub fn height(&mut self) -> Result<usize, BTreeError> {
        let mut height = 0;
        let mut page_id = self.root;
        while page_id != 0 {
            let node = read_node(&mut self.store, page_id)?;
            height += 1;
            page_id = match node.node_type() {
                NodeType::Leaf => 0,
                NodeType::Internal => node.pointer(0),
            };
        }
        Ok(height)
    }

    /// Walk the whole tree and check its structure.
    ///
    /// Checks that keys ascend within and across nodes, that every link key
    /// is the minimum key of its child, that all leaves share one depth, and
    /// that the leftmost leaf starts with the sentinel.
    ///
    /// # Errors
    ///
    /// Returns `BTreeError::Invariant` describing the first violation found.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let mut stats = TreeStats::default();
        if self.root == 0 {
            return Ok(stats);
        }

        let mut walk = Verifier {
            store: &mut self.store,
            stats: &mut stats,
            leaf_depth: None,
        };
        walk.visit(self.root, 1, b"", None)?;
        Ok(stats)
    }
}

fn validate_entry(key: &[u8], value: &[u8]) -> Result<(), BTreeError> {
    if key.is_empty() {
        return Err(BTreeError::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(BTreeError::KeyTooLarge(key.len()));
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(BTreeError::ValueTooLarge(value.len()));
    }
    Ok(())
}

/// Insert into the tree rooted at `root` and return the new root.
fn insert_root<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    root: PageId,
    key: &[u8],
    value: &[u8],
) -> Result<PageId, BTreeError> {
    if root == 0 {
        let mut leaf = Node::new();
        leaf.set_header(NodeType::Leaf, 2);
        leaf.insert_kv(0, 0, b"", b"");
        leaf.insert_kv(1, 0, key, value);
        let page_id = batch.allocate(&leaf)?;
        tracing::debug!(root = page_id, "created root leaf");
        return Ok(page_id);
    }

    let node = batch.read(root)?;
    let updated = tree_insert(batch, &node, key, value)?;
    batch.supersede(root);
    install_root(batch, updated)
}

/// Delete from the tree rooted at `root`. Returns the new root, or `None` if
/// the key was absent.
fn delete_root<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    root: PageId,
    key: &[u8],
    merge_threshold: usize,
) -> Result<Option<PageId>, BTreeError> {
    let node = batch.read(root)?;
    let Some(updated) = tree_delete(batch, &node, key, merge_threshold)? else {
        return Ok(None);
    };
    batch.supersede(root);

    let new_root = match (updated.node_type(), updated.num_keys()) {
        (NodeType::Internal, 0) | (NodeType::Leaf, 0 | 1) => {
            tracing::debug!("tree is now empty");
            0
        }
        (NodeType::Internal, 1) => collapse_root(batch, updated.pointer(0))?,
        _ => install_root(batch, updated)?,
    };
    Ok(Some(new_root))
}

/// Drop single-link internal nodes from the top of the tree.
///
/// `page_id` is the only child of the old root. Returns the new root, which
/// is 0 if all that is left is the sentinel.
fn collapse_root<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    mut page_id: PageId,
) -> Result<PageId, BTreeError> {
    loop {
        tracing::debug!(root = page_id, "root shrank");
        let node = batch.read(page_id)?;
        match (node.node_type(), node.num_keys()) {
            (NodeType::Internal, 1) => {
                batch.supersede(page_id);
                page_id = node.pointer(0);
            }
            (NodeType::Leaf, 0 | 1) => {
                batch.supersede(page_id);
                tracing::debug!("tree is now empty");
                return Ok(0);
            }
            _ => return Ok(page_id),
        }
    }
}

/// Split an updated root and write it out, growing the tree if it split.
fn install_root<S: PageStore>(
    batch: &mut PageBatch<'_, S>,
    updated: Node,
) -> Result<PageId, BTreeError> {
    let parts = split_node3(updated)?;
    if let [only] = parts.as_slice() {
        return batch.allocate(only);
    }

    let mut root = Node::new();
    root.set_header(NodeType::Internal, parts.len());
    for (i, part) in parts.iter().enumerate() {
        let ptr = batch.allocate(part)?;
        root.insert_kv(i, ptr, part.key(0), &[]);
    }
    let page_id = batch.allocate(&root)?;
    tracing::debug!(root = page_id, children = parts.len(), "root grew");
    Ok(page_id)
}

/// Recursive structure check behind `BTree::verify`.
struct Verifier<'a, S: PageStore> {
    store: &'a mut S,
    stats: &'a mut TreeStats,
    leaf_depth: Option<usize>,
}

impl<S: PageStore> Verifier<'_, S> {
    /// Check the subtree at `page_id`, whose minimum key must be `min` and
    /// whose keys must all be below `upper`.
    fn visit(
        &mut self,
        page_id: PageId,
        depth: usize,
        min: &[u8],
        upper: Option<&[u8]>,
    ) -> Result<(), BTreeError> {
        if page_id == 0 {
            return Err(structure(format!("null link at depth {depth}")));
        }
        let node = read_node(self.store, page_id)?;
        let nkeys = node.num_keys();

        if nkeys == 0 {
            return Err(structure(format!("page {page_id} has no keys")));
        }
        if node.key(0) != min {
            return Err(structure(format!(
                "page {page_id} starts with {:?}, parent link says {min:?}",
                node.key(0)
            )));
        }
        for i in 1..nkeys {
            if node.key(i - 1) >= node.key(i) {
                return Err(structure(format!("page {page_id} keys out of order at {i}")));
            }
        }
        if upper.is_some_and(|upper| node.key(nkeys - 1) >= upper) {
            return Err(structure(format!(
                "page {page_id} holds keys at or above its right neighbour's link"
            )));
        }

        self.stats.bytes_used += node.nbytes();

        match node.node_type() {
            NodeType::Leaf => {
                match self.leaf_depth {
                    None => self.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(structure(format!(
                            "leaf {page_id} at depth {depth}, expected {expected}"
                        )));
                    }
                    Some(_) => {}
                }
                self.stats.height = depth;
                self.stats.leaf_pages += 1;
                // Only the leftmost leaf can start with the empty key.
                let sentinel = usize::from(min.is_empty());
                self.stats.entries += nkeys - sentinel;
            }
            NodeType::Internal => {
                self.stats.internal_pages += 1;
                for i in 0..nkeys {
                    let next = if i + 1 < nkeys {
                        Some(node.key(i + 1))
                    } else {
                        upper
                    };
                    self.visit(node.pointer(i), depth + 1, node.key(i), next)?;
                }
            }
        }

        Ok(())
    }
}

fn structure(message: String) -> BTreeError {
    BTreeError::Invariant(InvariantFault::Structure(message))
}

/// Ordered iterator over tree entries.
///
/// Copy-on-write leaves carry no sibling links, so the iterator keeps the
/// path from the root: each frame is a node and the index of the child (or
/// entry, for the leaf) to visit next.
pub struct BTreeIterator<'a, S: PageStore> {
    store: &'a mut S,
    stack: Vec<(Node, usize)>,
}

impl<S: PageStore> BTreeIterator<'_, S> {
    /// Get the next entry.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, BTreeError> {
        loop {
            let Some((node, idx)) = self.stack.last_mut() else {
                return Ok(None);
            };

            if *idx >= node.num_keys() {
                self.stack.pop();
                if let Some((_, parent_idx)) = self.stack.last_mut() {
                    *parent_idx += 1;
                }
                continue;
            }

            if node.node_type() == NodeType::Leaf {
                let entry = (node.key(*idx).to_vec(), node.value(*idx).to_vec());
                *idx += 1;
                if entry.0.is_empty() {
                    continue;
                }
                return Ok(Some(entry));
            }

            let child = node.pointer(*idx);
            let child = read_node(self.store, child)?;
            self.stack.push((child, 0));
        }
    }
}

impl<S: PageStore> Iterator for BTreeIterator<'_, S> {
    type Item = Result<(Vec<u8>, Vec<u8>), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

/// Structural faults: conditions the algorithms guarantee cannot happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantFault {
    /// A split produced a part larger than a page.
    SplitOverflow { nbytes: usize },
    /// Siblings chosen for a merge have different node types.
    MergeTypeMismatch,
    /// `verify` found a malformed tree.
    Structure(String),
}

impl std::fmt::Display for InvariantFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SplitOverflow { nbytes } => {
                write!(f, "split left a {nbytes}-byte node")
            }
            Self::MergeTypeMismatch => write!(f, "merge of a leaf with an internal node"),
            Self::Structure(msg) => write!(f, "malformed tree: {msg}"),
        }
    }
}

impl std::error::Error for InvariantFault {}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Page store error.
    Store(StoreError),
    /// Node error.
    Node(NodeError),
    /// Keys must not be empty.
    EmptyKey,
    /// Key longer than `MAX_KEY_SIZE`.
    KeyTooLarge(usize),
    /// Value longer than `MAX_VALUE_SIZE`.
    ValueTooLarge(usize),
    /// The tree's structural invariants were violated.
    Invariant(InvariantFault),
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::EmptyKey => write!(f, "key must not be empty"),
            Self::KeyTooLarge(len) => {
                write!(f, "key too large: {len} bytes (max {MAX_KEY_SIZE})")
            }
            Self::ValueTooLarge(len) => {
                write!(f, "value too large: {len} bytes (max {MAX_VALUE_SIZE})")
            }
            Self::Invariant(e) => write!(f, "invariant violated: {e}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Invariant(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BTreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<InvariantFault> for BTreeError {
    fn from(e: InvariantFault) -> Self {
        Self::Invariant(e)
    }
}
