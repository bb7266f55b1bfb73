//! Configuration.
//!
//! `TreeConfig` tunes the B-tree itself. `Config` is loaded by the command
//! line tool from environment variables.
//!
//! # Environment Variables
//!
//! - `PAGETREE_DATA_DIRECTORY`: Directory where database files are stored (default: `./cdatabases`)
//! - `PAGETREE_MERGE_THRESHOLD`: Byte size at or below which a shrunken node
//!   merges with a sibling (default: `1024`, range `1-4096`)

use std::path::PathBuf;

use crate::btree::MAX_PAGE_SIZE;

/// Tunables for a `BTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// A node whose footprint after a delete is at most this many bytes
    /// tries to merge with a sibling.
    pub merge_threshold: usize,
}

impl TreeConfig {
    /// Default merge threshold: a quarter page.
    pub const DEFAULT_MERGE_THRESHOLD: usize = MAX_PAGE_SIZE / 4;
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            merge_threshold: Self::DEFAULT_MERGE_THRESHOLD,
        }
    }
}

/// Command line tool configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()`, `tree.merge_threshold` is in
/// `1..=MAX_PAGE_SIZE`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory where database files are stored.
    /// Each database lives at `{data_directory}/{name}.db`.
    pub data_directory: PathBuf,
    /// Settings passed to every tree opened by the tool.
    pub tree: TreeConfig,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./cdatabases";

    const DATA_DIRECTORY_VAR: &'static str = "PAGETREE_DATA_DIRECTORY";
    const MERGE_THRESHOLD_VAR: &'static str = "PAGETREE_MERGE_THRESHOLD";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PAGETREE_MERGE_THRESHOLD` is set but is not an
    /// integer in `1..=4096`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_directory = Self::load_data_directory(std::env::var(Self::DATA_DIRECTORY_VAR).ok());
        let merge_threshold =
            Self::parse_merge_threshold(std::env::var(Self::MERGE_THRESHOLD_VAR).ok().as_deref())?;

        Ok(Self {
            data_directory,
            tree: TreeConfig { merge_threshold },
        })
    }

    /// Path of the database file for `name`.
    #[must_use]
    pub fn database_path(&self, name: &str) -> PathBuf {
        self.data_directory.join(format!("{name}.db"))
    }

    fn load_data_directory(value: Option<String>) -> PathBuf {
        value.map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from)
    }

    /// Parse the merge threshold, defaulting when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an integer in `1..=4096`.
    fn parse_merge_threshold(value: Option<&str>) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(TreeConfig::DEFAULT_MERGE_THRESHOLD);
        };

        match value.parse::<usize>() {
            Ok(threshold) if (1..=MAX_PAGE_SIZE).contains(&threshold) => Ok(threshold),
            _ => Err(ConfigError::InvalidValue {
                name: Self::MERGE_THRESHOLD_VAR.to_string(),
                message: format!("'{value}' is not a byte count between 1 and {MAX_PAGE_SIZE}"),
            }),
        }
    }
}
