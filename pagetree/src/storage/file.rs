//! Single-file page store.
//!
//! Page 0 holds the `FileHeader`; every other page is either a live node page
//! or a free page. Free pages form a linked list threaded through the pages
//! themselves: the first 8 bytes of a free page hold the id of the next free
//! page (0 terminates the list), followed by a tag and a CRC32 so that a
//! reused page is never mistaken for a link.
//!
//! # Durability
//!
//! Nothing the durable header refers to is overwritten before the next
//! `sync`:
//!
//! - `free` only records the page. It stays readable on disk, and cannot be
//!   reused, until a `sync` has made a header without it durable.
//! - `allocate` reuses the tail of the free list, so the chain from the
//!   durable head stays intact up to the first reused page.
//! - Pages appended since the last `sync` lie beyond the durable page count
//!   and are truncated away by `open`.
//!
//! A crash between a mutation and its `sync` therefore reopens to the last
//! synced tree; at worst the pages reused in between are leaked.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::header::FileHeader;
use crate::storage::io::{PageStore, StoreError};
use crate::storage::page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId};

/// Tag stored after the next-page link of every free page.
const FREE_PAGE_TAG: [u8; 8] = *b"MYDBFREE";

mod free_offsets {
    pub const NEXT: usize = 0;
    pub const TAG: usize = 8;
    pub const CHECKSUM: usize = super::PAGE_SIZE - 4;
}

/// Encode a free page linking to `next`.
fn free_page(next: PageId) -> Page {
    let mut page = Page::new();
    page.write_u64(free_offsets::NEXT, next);
    page.write_bytes(free_offsets::TAG, &FREE_PAGE_TAG);
    let checksum = page.checksum_prefix(free_offsets::CHECKSUM);
    page.write_u32(free_offsets::CHECKSUM, checksum);
    page
}

/// Next-page link of a free page, or `None` if `page` is not one.
fn free_page_next(page: &Page) -> Option<PageId> {
    let tagged = page.read_bytes(free_offsets::TAG, FREE_PAGE_TAG.len()) == FREE_PAGE_TAG;
    let intact =
        page.read_u32(free_offsets::CHECKSUM) == page.checksum_prefix(free_offsets::CHECKSUM);
    (tagged && intact).then(|| page.read_u64(free_offsets::NEXT))
}

/// A database file handle implementing `PageStore`.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    header: FileHeader,
    /// Reusable free pages in chain order; the first element is the head.
    free_list: Vec<PageId>,
    /// Pages freed since the last `sync`.
    pending: Vec<PageId>,
    /// Ids in `free_list` or `pending`, for O(1) liveness checks.
    free_set: HashSet<PageId>,
    /// Whether the tail of `free_list` was reused since the last `sync`.
    tail_reused: bool,
}

impl FileStore {
    /// Create a new database file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, name: &str) -> Result<Self, StoreError> {
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.to_path_buf()));
        }

        let header = FileHeader::new(name)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(header.to_page().as_bytes())?;
        file.sync_all()?;

        Ok(Self {
            file,
            header,
            free_list: Vec::new(),
            pending: Vec::new(),
            free_set: HashSet::new(),
            tail_reused: false,
        })
    }

    /// Open an existing database file.
    ///
    /// Pages beyond the header's page count were appended after the last
    /// `sync` and are truncated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < PAGE_SIZE_U64 {
            return Err(StoreError::InvalidFileSize(file_size));
        }

        let mut page = Page::new();
        file.read_exact(page.as_bytes_mut())?;
        let header = FileHeader::from_page(&page)?;

        let durable_size = header.total_page_count * PAGE_SIZE_U64;
        if header.total_page_count == 0 || file_size < durable_size {
            return Err(StoreError::InvalidFileSize(file_size));
        }
        if file_size > durable_size {
            tracing::warn!(
                "truncating {} bytes written after the last sync",
                file_size - durable_size
            );
            file.set_len(durable_size)?;
            file.sync_all()?;
        }

        let mut store = Self {
            file,
            header,
            free_list: Vec::new(),
            pending: Vec::new(),
            free_set: HashSet::new(),
            tail_reused: false,
        };
        store.load_free_list()?;

        Ok(store)
    }

    /// Walk the on-disk free list into memory.
    ///
    /// The walk stops early at a page that is no longer a free page; it was
    /// reused after the last `sync`, and it and its successors are leaked.
    fn load_free_list(&mut self) -> Result<(), StoreError> {
        let mut chain = Vec::new();
        let mut current = self.header.free_list_head;

        while current != 0 && (chain.len() as u64) < self.header.free_page_count {
            // A chain longer than the file or a repeated id means a cycle.
            if chain.len() as u64 >= self.header.total_page_count
                || self.free_set.contains(&current)
            {
                return Err(StoreError::PageNotAllocated(current));
            }
            let page = self.read_raw(current)?;
            let Some(next) = free_page_next(&page) else {
                break;
            };
            chain.push(current);
            self.free_set.insert(current);
            current = next;
        }

        if chain.len() as u64 != self.header.free_page_count {
            tracing::warn!(
                "free list holds {} pages but header records {}",
                chain.len(),
                self.header.free_page_count
            );
            self.header.free_page_count = chain.len() as u64;
        }

        self.free_list = chain;
        Ok(())
    }

    /// Get the file header.
    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Database name recorded in the header.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Root page recorded in the header.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.header.root
    }

    /// Record a new root page. Durable after `sync`.
    pub const fn set_root(&mut self, root: PageId) {
        self.header.root = root;
    }

    /// Number of free pages, including those freed since the last `sync`.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.free_set.len()
    }

    /// Number of live (allocated, not free) node pages.
    #[must_use]
    pub fn live_page_count(&self) -> u64 {
        self.header.total_page_count - 1 - self.free_set.len() as u64
    }

    /// Make the recorded root durable, then release the pages freed since
    /// the previous `sync`.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        if let Some(&tail) = self.free_list.last().filter(|_| self.tail_reused) {
            // Its old successor may now hold a node.
            self.write_raw(tail, &free_page(0))?;
        }
        self.write_header()?;
        self.tail_reused = false;

        if self.pending.is_empty() {
            return Ok(());
        }

        // Chain the pending pages in front of the current head.
        let mut next = self.free_list.first().copied().unwrap_or(0);
        for i in (0..self.pending.len()).rev() {
            let page_id = self.pending[i];
            self.write_raw(page_id, &free_page(next))?;
            next = page_id;
        }
        let mut free_list = std::mem::take(&mut self.pending);
        free_list.append(&mut self.free_list);
        self.free_list = free_list;

        self.write_header()
    }

    /// Flush page writes, then write the header and flush it.
    fn write_header(&mut self) -> Result<(), StoreError> {
        self.header.free_list_head = self.free_list.first().copied().unwrap_or(0);
        self.header.free_page_count = self.free_list.len() as u64;

        self.file.sync_all()?;
        let page = self.header.to_page();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(page.as_bytes())?;
        self.file.sync_all()?;
        Ok(())
    }

    fn is_live(&self, page_id: PageId) -> bool {
        page_id != 0
            && page_id < self.header.total_page_count
            && !self.free_set.contains(&page_id)
    }

    fn read_raw(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        if page_id == 0 || page_id >= self.header.total_page_count {
            return Err(StoreError::PageNotAllocated(page_id));
        }

        let mut page = Page::new();
        self.file.seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))?;
        self.file.read_exact(page.as_bytes_mut())?;
        Ok(page)
    }

    fn write_raw(&mut self, page_id: PageId, page: &Page) -> Result<(), StoreError> {
        self.file.seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))?;
        self.file.write_all(page.as_bytes())?;
        Ok(())
    }
}

impl PageStore for FileStore {
    fn read(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        if !self.is_live(page_id) {
            return Err(StoreError::PageNotAllocated(page_id));
        }
        self.read_raw(page_id)
    }

    fn allocate(&mut self, page: &Page) -> Result<PageId, StoreError> {
        let page_id = if let Some(page_id) = self.free_list.pop() {
            self.free_set.remove(&page_id);
            self.tail_reused = true;
            page_id
        } else {
            // Extend the file by one page.
            let page_id = self.header.total_page_count;
            let new_total = page_id + 1;
            self.file.set_len(new_total * PAGE_SIZE_U64)?;
            self.header.total_page_count = new_total;
            page_id
        };

        // A failed write leaks `page_id`; the page is unreachable but harmless.
        self.write_raw(page_id, page)?;

        Ok(page_id)
    }

    fn free(&mut self, page_id: PageId) -> Result<(), StoreError> {
        if !self.is_live(page_id) {
            return Err(StoreError::PageNotAllocated(page_id));
        }

        self.pending.push(page_id);
        self.free_set.insert(page_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_path() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");
        (dir, path)
    }

    fn page_with(byte: u8) -> Page {
        let mut page = Page::new();
        page.as_bytes_mut().fill(byte);
        page
    }

    #[test]
    fn test_create_writes_header() {
        let (_dir, path) = create_test_path();
        let store = FileStore::create(&path, "shop").expect("create");
        assert_eq!(store.name(), "shop");
        assert_eq!(store.root(), 0);

        let bytes = std::fs::read(&path).expect("read file");
        assert_eq!(bytes.len(), PAGE_SIZE);
        assert_eq!(&bytes[..5], b"MYDB\0");
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let (_dir, path) = create_test_path();
        FileStore::create(&path, "a").expect("create");
        assert!(matches!(
            FileStore::create(&path, "a"),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_allocate_read_free_reuse() {
        let (_dir, path) = create_test_path();
        let mut store = FileStore::create(&path, "a").expect("create");

        let first = store.allocate(&page_with(1)).expect("allocate");
        let second = store.allocate(&page_with(2)).expect("allocate");
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(store.read(second).expect("read"), page_with(2));

        store.free(first).expect("free");
        assert!(matches!(
            store.read(first),
            Err(StoreError::PageNotAllocated(1))
        ));
        assert!(matches!(
            store.free(first),
            Err(StoreError::PageNotAllocated(1))
        ));
        assert_eq!(store.free_page_count(), 1);

        // Not reusable until the free is durable.
        let third = store.allocate(&page_with(3)).expect("allocate");
        assert_eq!(third, 3);

        // Freed pages are reused before the file grows.
        store.sync().expect("sync");
        let fourth = store.allocate(&page_with(4)).expect("allocate");
        assert_eq!(fourth, first);
        assert_eq!(store.read(fourth).expect("read"), page_with(4));
        assert_eq!(store.header().total_page_count, 4);
    }

    #[test]
    fn test_free_leaves_page_intact_until_sync() {
        let (_dir, path) = create_test_path();
        let mut store = FileStore::create(&path, "a").expect("create");
        let id = store.allocate(&page_with(5)).expect("allocate");
        store.sync().expect("sync");
        store.free(id).expect("free");

        let offset = usize::try_from(id).expect("page id") * PAGE_SIZE;
        let bytes = std::fs::read(&path).expect("read file");
        assert_eq!(&bytes[offset..offset + PAGE_SIZE], page_with(5).as_bytes());

        store.sync().expect("sync");
        let bytes = std::fs::read(&path).expect("read file");
        assert_eq!(&bytes[offset..offset + PAGE_SIZE], free_page(0).as_bytes());
        assert_eq!(store.header().free_list_head, id);
    }

    #[test]
    fn test_open_truncates_pages_appended_after_sync() {
        let (_dir, path) = create_test_path();
        {
            let mut store = FileStore::create(&path, "a").expect("create");
            store.allocate(&page_with(1)).expect("allocate");
            store.sync().expect("sync");
            store.allocate(&page_with(2)).expect("allocate");
            store.allocate(&page_with(3)).expect("allocate");
        }
        assert_eq!(
            std::fs::metadata(&path).expect("metadata").len(),
            4 * PAGE_SIZE_U64
        );

        let mut store = FileStore::open(&path).expect("open");
        assert_eq!(store.header().total_page_count, 2);
        assert_eq!(
            std::fs::metadata(&path).expect("metadata").len(),
            2 * PAGE_SIZE_U64
        );
        assert_eq!(store.read(1).expect("read"), page_with(1));
        assert_eq!(store.allocate(&page_with(9)).expect("allocate"), 2);
    }

    #[test]
    fn test_reuse_before_sync_keeps_durable_free_list_readable() {
        let (_dir, path) = create_test_path();
        {
            let mut store = FileStore::create(&path, "a").expect("create");
            for i in 1..=3u8 {
                store.allocate(&page_with(i)).expect("allocate");
            }
            store.free(1).expect("free");
            store.free(2).expect("free");
            store.set_root(3);
            store.sync().expect("sync");
            assert_eq!(store.header().free_list_head, 1);

            // Reuses page 2, which the durable chain still links to.
            assert_eq!(store.allocate(&page_with(7)).expect("allocate"), 2);
        }

        let mut store = FileStore::open(&path).expect("open");
        assert_eq!(store.root(), 3);
        assert_eq!(store.read(3).expect("read"), page_with(3));
        assert_eq!(store.free_page_count(), 1);
        assert_eq!(store.allocate(&page_with(8)).expect("allocate"), 1);
        assert_eq!(store.allocate(&page_with(8)).expect("allocate"), 4);
    }

    #[test]
    fn test_free_page_tag() {
        assert_eq!(free_page_next(&free_page(42)), Some(42));
        assert_eq!(free_page_next(&page_with(7)), None);

        let mut corrupted = free_page(42);
        corrupted.write_u64(0, 43);
        assert_eq!(free_page_next(&corrupted), None);
    }

    #[test]
    fn test_header_page_is_not_a_node_page() {
        let (_dir, path) = create_test_path();
        let mut store = FileStore::create(&path, "a").expect("create");
        assert!(matches!(store.read(0), Err(StoreError::PageNotAllocated(0))));
        assert!(matches!(store.free(0), Err(StoreError::PageNotAllocated(0))));
    }

    #[test]
    fn test_reopen_restores_root_and_free_list() {
        let (_dir, path) = create_test_path();

        {
            let mut store = FileStore::create(&path, "persist").expect("create");
            let ids: Vec<PageId> = (0..5u8)
                .map(|i| store.allocate(&page_with(i)).expect("allocate"))
                .collect();
            store.free(ids[1]).expect("free");
            store.free(ids[3]).expect("free");
            store.set_root(ids[4]);
            store.sync().expect("sync");
        }

        let mut store = FileStore::open(&path).expect("open");
        assert_eq!(store.name(), "persist");
        assert_eq!(store.root(), 5);
        assert_eq!(store.free_page_count(), 2);
        assert_eq!(store.live_page_count(), 3);
        assert_eq!(store.read(5).expect("read"), page_with(4));
        assert!(store.read(2).is_err());

        // Most recently freed page comes back first.
        assert_eq!(store.allocate(&page_with(9)).expect("allocate"), 4);
        assert_eq!(store.allocate(&page_with(9)).expect("allocate"), 2);
        assert_eq!(store.allocate(&page_with(9)).expect("allocate"), 6);
    }

    #[test]
    fn test_open_rejects_truncated_file() {
        let (_dir, path) = create_test_path();
        {
            let mut store = FileStore::create(&path, "a").expect("create");
            store.allocate(&page_with(1)).expect("allocate");
            store.sync().expect("sync");
        }

        let file = OpenOptions::new().write(true).open(&path).expect("open raw");
        file.set_len(PAGE_SIZE_U64 + 10).expect("truncate");
        drop(file);

        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::InvalidFileSize(_))
        ));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let (_dir, path) = create_test_path();
        std::fs::write(&path, vec![0u8; PAGE_SIZE]).expect("write");
        assert!(matches!(FileStore::open(&path), Err(StoreError::Header(_))));
    }
}
