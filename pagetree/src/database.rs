//! High-level database interface.
//!
//! A database is one `FileStore` file holding one B-tree. Every successful
//! mutation records the new root in the file header and syncs the file.

use std::path::Path;

use crate::btree::{BTree, BTreeError, TreeStats};
use crate::config::TreeConfig;
use crate::storage::{FileHeader, FileStore, StoreError};

/// A database instance.
#[derive(Debug)]
pub struct Database {
    tree: BTree<FileStore>,
}

impl Database {
    /// Create a new database at the given path.
    ///
    /// The path must not already exist.
    pub fn create(path: &Path, name: &str, config: TreeConfig) -> Result<Self, DatabaseError> {
        let store = FileStore::create(path, name)?;
        tracing::info!("created database '{name}' at {}", path.display());
        Ok(Self {
            tree: BTree::new(store).with_config(config),
        })
    }

    /// Open an existing database at the given path.
    pub fn open(path: &Path, config: TreeConfig) -> Result<Self, DatabaseError> {
        let store = FileStore::open(path)?;
        let root = store.root();
        tracing::info!(
            root,
            pages = store.header().total_page_count,
            "opened database '{}'",
            store.name()
        );
        Ok(Self {
            tree: BTree::open(store, root).with_config(config),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.tree.store().name()
    }

    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        self.tree.store().header()
    }

    /// Number of node pages in use.
    #[must_use]
    pub fn live_page_count(&self) -> u64 {
        self.tree.store().live_page_count()
    }

    /// Insert `key` or replace its value, then persist the new root.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        self.tree.insert(key, value)?;
        self.persist_root()
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(self.tree.get(key)?)
    }

    /// Delete `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, DatabaseError> {
        let deleted = self.tree.delete(key)?;
        if deleted {
            self.persist_root()?;
        }
        Ok(deleted)
    }

    /// All entries in key order.
    pub fn scan(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DatabaseError> {
        self.scan_from(b"")
    }

    /// Entries with keys `>= start` in key order.
    pub fn scan_from(&mut self, start: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DatabaseError> {
        let mut iter = self.tree.iter_from(start)?;
        let mut entries = Vec::new();
        while let Some(entry) = iter.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Check the tree's structure and report its shape.
    pub fn verify(&mut self) -> Result<TreeStats, DatabaseError> {
        Ok(self.tree.verify()?)
    }

    fn persist_root(&mut self) -> Result<(), DatabaseError> {
        let root = self.tree.root();
        let store = self.tree.store_mut();
        store.set_root(root);
        store.sync()?;
        Ok(())
    }
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// Page store error.
    Store(StoreError),
    /// B-tree error.
    Tree(BTreeError),
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Tree(e) => Some(e),
        }
    }
}

impl From<StoreError> for DatabaseError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<BTreeError> for DatabaseError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}
