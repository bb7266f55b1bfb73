//! Page storage.
//!
//! The tree works against the `PageStore` trait. Two stores ship with the
//! crate:
//!
//! - `MemoryStore`: pages in a map, ids from a counter. Used by tests.
//! - `FileStore`: a single file of 4KB pages.
//!
//! # File Format
//!
//! - Page 0: header (magic number, name, root page, free list head)
//! - Pages 1-N: B-tree node pages and free pages
//!
//! # Usage
//!
//! ```
//! use pagetree::storage::{MemoryStore, Page, PageStore};
//!
//! let mut store = MemoryStore::new();
//! let mut page = Page::new();
//! page.write_bytes(0, b"hello");
//!
//! let id = store.allocate(&page).unwrap();
//! assert_eq!(store.read(id).unwrap().read_bytes(0, 5), b"hello");
//! store.free(id).unwrap();
//! ```

mod file;
mod header;
mod io;
mod memory;
mod page;

pub use file::FileStore;
pub use header::{FORMAT_VERSION, FileHeader, HeaderError, MAGIC, MAX_NAME_LEN};
pub use io::{PageStore, StoreError};
pub use memory::{MemoryStore, MemoryStoreStats};
pub use page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId};
