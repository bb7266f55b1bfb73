//! File header structure and serialization.
//!
//! The header occupies page 0 of a database file and records where the tree
//! root and the free list live.

// PAGE_SIZE and name lengths are bounded and fit in the narrower types.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_SIZE, Page, PageId};

/// Magic number identifying a database file: "MYDB\0".
pub const MAGIC: [u8; 5] = *b"MYDB\0";

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// Longest database name the header can hold.
pub const MAX_NAME_LEN: usize = 255;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 5;
    pub const PAGE_SIZE: usize = 6;
    pub const ROOT: usize = 8;
    pub const TOTAL_PAGE_COUNT: usize = 16;
    pub const FREE_LIST_HEAD: usize = 24;
    pub const FREE_PAGE_COUNT: usize = 32;
    pub const NAME_LEN: usize = 40;
    pub const NAME: usize = 41;
    // 296-4091: reserved
    pub const CHECKSUM: usize = super::PAGE_SIZE - 4;
}

/// Metadata stored in page 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Human-readable database name.
    pub name: String,
    /// Root page of the tree (0 for an empty tree).
    pub root: PageId,
    /// Total number of pages in the file, including the header page.
    pub total_page_count: u64,
    /// First page of the free list (0 if empty).
    pub free_list_head: PageId,
    /// Number of pages on the free list.
    pub free_page_count: u64,
}

impl FileHeader {
    /// Create a header for a fresh database file.
    pub fn new(name: &str) -> Result<Self, HeaderError> {
        if name.len() > MAX_NAME_LEN {
            return Err(HeaderError::NameTooLong(name.len()));
        }
        Ok(Self {
            name: name.to_string(),
            root: 0,
            total_page_count: 1,
            free_list_head: 0,
            free_page_count: 0,
        })
    }

    /// Serialize the header to a page, checksum included.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();

        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u8(offsets::FORMAT_VERSION, FORMAT_VERSION);
        page.write_u16(offsets::PAGE_SIZE, PAGE_SIZE as u16);
        page.write_u64(offsets::ROOT, self.root);
        page.write_u64(offsets::TOTAL_PAGE_COUNT, self.total_page_count);
        page.write_u64(offsets::FREE_LIST_HEAD, self.free_list_head);
        page.write_u64(offsets::FREE_PAGE_COUNT, self.free_page_count);
        page.write_u8(offsets::NAME_LEN, self.name.len() as u8);
        page.write_bytes(offsets::NAME, self.name.as_bytes());

        let checksum = page.checksum_prefix(offsets::CHECKSUM);
        page.write_u32(offsets::CHECKSUM, checksum);

        page
    }

    /// Deserialize a header from a page.
    pub fn from_page(page: &Page) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 5];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 5));
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let format_version = page.read_u8(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u16(offsets::PAGE_SIZE);
        if usize::from(page_size) != PAGE_SIZE {
            return Err(HeaderError::InvalidPageSize(page_size));
        }

        let expected = page.read_u32(offsets::CHECKSUM);
        let actual = page.checksum_prefix(offsets::CHECKSUM);
        if expected != actual {
            return Err(HeaderError::ChecksumMismatch { expected, actual });
        }

        let name_len = usize::from(page.read_u8(offsets::NAME_LEN));
        let name = std::str::from_utf8(page.read_bytes(offsets::NAME, name_len))
            .map_err(|_| HeaderError::InvalidName)?
            .to_string();

        Ok(Self {
            name,
            root: page.read_u64(offsets::ROOT),
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            free_list_head: page.read_u64(offsets::FREE_LIST_HEAD),
            free_page_count: page.read_u64(offsets::FREE_PAGE_COUNT),
        })
    }
}

/// Errors that can occur when reading or building a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The magic number does not match.
    InvalidMagic([u8; 5]),
    /// The format version is not supported.
    UnsupportedVersion(u8),
    /// The recorded page size differs from `PAGE_SIZE`.
    InvalidPageSize(u16),
    /// The header checksum does not match its contents.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The stored name is not valid UTF-8.
    InvalidName,
    /// The name does not fit in the header.
    NameTooLong(usize),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => write!(f, "invalid database file format (magic {magic:?})"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(size) => write!(f, "invalid page size: {size}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "header checksum mismatch: expected {expected}, got {actual}")
            }
            Self::InvalidName => write!(f, "database name is not valid UTF-8"),
            Self::NameTooLong(len) => {
                write!(f, "database name too long: {len} bytes (max {MAX_NAME_LEN})")
            }
        }
    }
}

impl std::error::Error for HeaderError {}
