//! Copy-on-write B+Tree over fixed-size pages.
//!
//! # Structure
//!
//! The B-tree consists of:
//! - Internal nodes: link keys and child page ids
//! - Leaf nodes: key-value pairs
//!
//! Pages are never modified in place. An insert or delete writes the changed
//! path to fresh pages and frees the old ones after the new root is in
//! place, so a failed operation leaves the previous tree intact.
//!
//! # Limits
//!
//! Keys are 1 to `MAX_KEY_SIZE` bytes and values up to `MAX_VALUE_SIZE`
//! bytes, so any entry fits an empty page.
//!
//! # Usage
//!
//! ```
//! use pagetree::btree::BTree;
//! use pagetree::storage::MemoryStore;
//!
//! let mut tree = BTree::new(MemoryStore::new());
//! tree.insert(b"apple", b"red").unwrap();
//! tree.insert(b"kiwi", b"green").unwrap();
//!
//! assert_eq!(tree.get(b"apple").unwrap(), Some(b"red".to_vec()));
//! assert!(tree.delete(b"kiwi").unwrap());
//! assert_eq!(tree.count().unwrap(), 1);
//! ```

mod batch;
mod delete;
mod insert;
mod node;
mod tree;

pub use node::{HEADER, MAX_KEY_SIZE, MAX_PAGE_SIZE, MAX_VALUE_SIZE, Node, NodeError, NodeType};
pub use tree::{BTree, BTreeError, BTreeIterator, InvariantFault, TreeStats};
