//! B-tree node layout and serialization.
//!
//! A node is the structured view of one page:
//!
//! ```text
//! +------+-------+------------------+-----------------+------------------+
//! | type | nkeys | pointers         | offsets         | key-values       |
//! | u16  | u16   | nkeys * u64      | nkeys * u16     | variable         |
//! +------+-------+------------------+-----------------+------------------+
//!
//! key-value entry: | klen: u16 | vlen: u16 | key | value |
//! ```
//!
//! `offsets[i]` is the byte offset of entry `i` inside the key-value region.
//! `offsets[0]` is always 0 and is not stored, so the stored table holds the
//! offsets of entries `1..=nkeys`; the last one marks the end of the node.
//! Leaves keep the pointer slots (zeroed) so both node types share one layout.
//!
//! Nodes under construction may use a scratch buffer of twice the page size.
//! Only nodes whose `nbytes()` fits a page can be turned back into a `Page`.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::{PAGE_SIZE, Page, PageId};

/// Largest node that may be written to a page.
pub const MAX_PAGE_SIZE: usize = PAGE_SIZE;

/// Size of the fixed node header (`type` + `nkeys`).
pub const HEADER: usize = 4;

/// Longest key accepted by the tree.
pub const MAX_KEY_SIZE: usize = 1000;

/// Longest value accepted by the tree.
pub const MAX_VALUE_SIZE: usize = 3000;

/// Capacity of a scratch node used while building and splitting.
const SCRATCH_SIZE: usize = 2 * MAX_PAGE_SIZE;

/// Per-entry bytes besides the key and value: pointer, offset, klen, vlen.
const ENTRY_OVERHEAD: usize = 8 + 2 + 4;

// A maximal entry must fit an otherwise empty page.
const _: () = assert!(HEADER + ENTRY_OVERHEAD + MAX_KEY_SIZE + MAX_VALUE_SIZE <= MAX_PAGE_SIZE);

/// Node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeType {
    Internal = 1,
    Leaf = 2,
}

impl TryFrom<u16> for NodeType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Internal),
            2 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// A B-tree node backed by an owned byte buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Node {
    data: Vec<u8>,
}

impl Node {
    /// Create a zeroed node of page capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![0u8; MAX_PAGE_SIZE],
        }
    }

    /// Create a zeroed node with room for up to two pages of entries.
    #[must_use]
    pub fn scratch() -> Self {
        Self {
            data: vec![0u8; SCRATCH_SIZE],
        }
    }

    /// Decode a node from a page read from the store.
    ///
    /// Validates the type tag and every offset, so the accessors cannot
    /// index outside the page afterwards.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let node = Self {
            data: page.as_bytes().to_vec(),
        };

        let raw_type = node.read_u16(0);
        NodeType::try_from(raw_type).map_err(NodeError::InvalidType)?;

        let nkeys = node.num_keys();
        if HEADER + 10 * nkeys > MAX_PAGE_SIZE {
            return Err(NodeError::Corrupt(format!(
                "{nkeys} keys do not fit in a page"
            )));
        }

        for i in 0..nkeys {
            let pos = node.kv_pos(i);
            if pos + 4 > MAX_PAGE_SIZE {
                return Err(NodeError::Corrupt(format!("entry {i} starts past the page")));
            }
            let klen = usize::from(node.read_u16(pos));
            let vlen = usize::from(node.read_u16(pos + 2));
            if node.offset(i + 1) != node.offset(i) + 4 + klen + vlen {
                return Err(NodeError::Corrupt(format!(
                    "offset of entry {} disagrees with entry {i} length",
                    i + 1
                )));
            }
        }

        if node.nbytes() > MAX_PAGE_SIZE {
            return Err(NodeError::Oversized {
                nbytes: node.nbytes(),
            });
        }

        Ok(node)
    }

    /// Encode the node into a page.
    ///
    /// Fails if the node does not fit; an oversized node must be split first.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        let nbytes = self.nbytes();
        if nbytes > MAX_PAGE_SIZE {
            return Err(NodeError::Oversized { nbytes });
        }
        let mut page = Page::new();
        page.write_bytes(0, &self.data[..nbytes]);
        Ok(page)
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// The node type.
    ///
    /// # Panics
    ///
    /// Panics if the header has not been set. Decoded nodes are validated.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        let raw = self.read_u16(0);
        NodeType::try_from(raw)
            .unwrap_or_else(|raw| panic!("node_type: invalid node type {raw}"))
    }

    /// Number of entries.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        usize::from(self.read_u16(2))
    }

    /// Set the node type and the final entry count.
    pub fn set_header(&mut self, node_type: NodeType, num_keys: usize) {
        assert!(
            num_keys <= usize::from(u16::MAX),
            "set_header: {num_keys} keys overflow the key count"
        );
        self.write_u16(0, node_type as u16);
        self.write_u16(2, num_keys as u16);
    }

    /// Child page id of entry `idx`.
    #[must_use]
    pub fn pointer(&self, idx: usize) -> PageId {
        assert!(
            idx < self.num_keys(),
            "pointer: index {idx} out of range ({} keys)",
            self.num_keys()
        );
        let pos = HEADER + 8 * idx;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[pos..pos + 8]);
        u64::from_le_bytes(buf)
    }

    /// Set the child page id of entry `idx`. `idx == num_keys()` is allowed.
    pub fn set_pointer(&mut self, idx: usize, ptr: PageId) {
        assert!(
            idx <= self.num_keys(),
            "set_pointer: index {idx} out of range ({} keys)",
            self.num_keys()
        );
        let pos = HEADER + 8 * idx;
        self.data[pos..pos + 8].copy_from_slice(&ptr.to_le_bytes());
    }

    /// Position of the stored offset for entry `idx` (1-based).
    fn offset_pos(&self, idx: usize) -> usize {
        assert!(
            (1..=self.num_keys()).contains(&idx),
            "offset_pos: index {idx} out of range ({} keys)",
            self.num_keys()
        );
        HEADER + 8 * self.num_keys() + 2 * (idx - 1)
    }

    /// Offset of entry `idx` inside the key-value region, `0..=num_keys()`.
    #[must_use]
    pub fn offset(&self, idx: usize) -> usize {
        if idx == 0 {
            return 0;
        }
        usize::from(self.read_u16(self.offset_pos(idx)))
    }

    /// Set the offset of entry `idx`, `1..=num_keys()`.
    pub fn set_offset(&mut self, idx: usize, offset: usize) {
        let pos = self.offset_pos(idx);
        self.write_u16(pos, offset as u16);
    }

    /// Absolute position of entry `idx`, `0..=num_keys()`.
    #[must_use]
    pub fn kv_pos(&self, idx: usize) -> usize {
        assert!(
            idx <= self.num_keys(),
            "kv_pos: index {idx} out of range ({} keys)",
            self.num_keys()
        );
        HEADER + 10 * self.num_keys() + self.offset(idx)
    }

    /// Key of entry `idx`.
    #[must_use]
    pub fn key(&self, idx: usize) -> &[u8] {
        assert!(
            idx < self.num_keys(),
            "key: index {idx} out of range ({} keys)",
            self.num_keys()
        );
        let pos = self.kv_pos(idx);
        let klen = usize::from(self.read_u16(pos));
        &self.data[pos + 4..pos + 4 + klen]
    }

    /// Value of entry `idx`. Empty for internal nodes.
    #[must_use]
    pub fn value(&self, idx: usize) -> &[u8] {
        assert!(
            idx < self.num_keys(),
            "value: index {idx} out of range ({} keys)",
            self.num_keys()
        );
        let pos = self.kv_pos(idx);
        let klen = usize::from(self.read_u16(pos));
        let vlen = usize::from(self.read_u16(pos + 2));
        &self.data[pos + 4 + klen..pos + 4 + klen + vlen]
    }

    /// Bytes used by the node: the position just past the last entry.
    #[must_use]
    pub fn nbytes(&self) -> usize {
        self.kv_pos(self.num_keys())
    }

    /// Write entry `idx` and advance the offset of entry `idx + 1`.
    ///
    /// The header must already hold the final key count and entries must be
    /// written in increasing index order.
    pub fn insert_kv(&mut self, idx: usize, ptr: PageId, key: &[u8], value: &[u8]) {
        self.set_pointer(idx, ptr);

        let pos = self.kv_pos(idx);
        self.write_u16(pos, key.len() as u16);
        self.write_u16(pos + 2, value.len() as u16);
        self.data[pos + 4..pos + 4 + key.len()].copy_from_slice(key);
        let value_pos = pos + 4 + key.len();
        self.data[value_pos..value_pos + value.len()].copy_from_slice(value);

        self.set_offset(idx + 1, self.offset(idx) + 4 + key.len() + value.len());
    }

    /// Copy `n` entries of `src` starting at `src_start` into this node
    /// starting at `dst_start`.
    pub fn copy_range(&mut self, src: &Self, dst_start: usize, src_start: usize, n: usize) {
        for i in 0..n {
            self.insert_kv(
                dst_start + i,
                src.pointer(src_start + i),
                src.key(src_start + i),
                src.value(src_start + i),
            );
        }
    }

    /// Index of the greatest key less than or equal to `key`.
    ///
    /// Returns 0 when every key is greater than `key` (or the node is
    /// empty), so leaf callers must compare the key at the returned index
    /// before treating it as a hit.
    #[must_use]
    pub fn lookup_le(&self, key: &[u8]) -> usize {
        let mut lo = 0;
        let mut hi = self.num_keys();
        let mut found = 0;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key(mid).cmp(key) {
                std::cmp::Ordering::Equal => return mid,
                std::cmp::Ordering::Less => {
                    found = mid;
                    lo = mid + 1;
                }
                std::cmp::Ordering::Greater => hi = mid,
            }
        }

        found
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Node");
        if let Ok(node_type) = NodeType::try_from(self.read_u16(0)) {
            debug.field("type", &node_type);
        }
        debug
            .field("num_keys", &self.num_keys())
            .field("capacity", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Errors that can occur when decoding or encoding nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Unknown node type tag.
    InvalidType(u16),
    /// Offsets or lengths point outside the page.
    Corrupt(String),
    /// Node is larger than a page.
    Oversized { nbytes: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidType(t) => write!(f, "invalid node type: {t}"),
            Self::Corrupt(msg) => write!(f, "corrupt node: {msg}"),
            Self::Oversized { nbytes } => {
                write!(f, "node too large: {nbytes} bytes (max {MAX_PAGE_SIZE})")
            }
        }
    }
}

impl std::error::Error for NodeError {}
