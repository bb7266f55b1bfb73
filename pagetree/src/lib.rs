// Tests use expect() to name the step that failed.
#![cfg_attr(test, allow(clippy::expect_used))]

//! Copy-on-write B+Tree storage over fixed-size pages.
//!
//! Components:
//!  - `storage`: 4KB pages and the `PageStore` trait, with an in-memory store
//!    and a single-file store
//!  - `btree`: the copy-on-write B+Tree on top of any `PageStore`
//!  - `database`: a file store and a tree bound together, as used by the
//!    `pagetree` command line tool

pub mod btree;
pub mod config;
pub mod database;
pub mod storage;

#[cfg(test)]
mod simulation;

pub use database::{Database, DatabaseError};
