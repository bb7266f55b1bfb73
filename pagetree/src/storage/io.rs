//! Page store abstraction.
//!
//! The B-tree never talks to a file directly. It is handed a `PageStore`
//! that can read a page by id, allocate a fresh id for a page, and free an
//! id. The tree runs unchanged over the in-memory store used in tests and
//! over the single-file store used by the command line tool.

use std::path::PathBuf;

use crate::storage::header::HeaderError;
use crate::storage::page::{Page, PageId};

/// Errors that can occur during page store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// The page id was never allocated, or has already been freed.
    PageNotAllocated(PageId),
    /// The backing file is not a whole number of pages.
    InvalidFileSize(u64),
    /// The file header is invalid.
    Header(HeaderError),
    /// Refusing to create a database over an existing file.
    AlreadyExists(PathBuf),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::PageNotAllocated(page_id) => write!(f, "page {page_id} is not allocated"),
            Self::InvalidFileSize(size) => {
                write!(f, "file size {size} is not a multiple of the page size")
            }
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::AlreadyExists(path) => {
                write!(f, "database file '{}' already exists", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HeaderError> for StoreError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

/// Abstraction over page-based storage.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read` returns exactly the bytes passed to the `allocate` call that
///   produced the id, and has no other side effect
/// - `allocate` never returns 0 and never returns an id that is still live
/// - `read` and `free` on an id that is not live fail with
///   `StoreError::PageNotAllocated`
///
/// The tree calls a store from a single writer; any locking is the
/// implementation's business.
pub trait PageStore {
    /// Read a live page.
    fn read(&mut self, page_id: PageId) -> Result<Page, StoreError>;

    /// Persist `page` under a fresh id and return the id.
    fn allocate(&mut self, page: &Page) -> Result<PageId, StoreError>;

    /// Release a live page id for reuse.
    fn free(&mut self, page_id: PageId) -> Result<(), StoreError>;
}

impl<S: PageStore + ?Sized> PageStore for &mut S {
    fn read(&mut self, page_id: PageId) -> Result<Page, StoreError> {
        (**self).read(page_id)
    }

    fn allocate(&mut self, page: &Page) -> Result<PageId, StoreError> {
        (**self).allocate(page)
    }

    fn free(&mut self, page_id: PageId) -> Result<(), StoreError> {
        (**self).free(page_id)
    }
}
