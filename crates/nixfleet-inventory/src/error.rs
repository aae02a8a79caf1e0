//! Error types for nixfleet-inventory

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading an inventory
#[derive(Error, Debug)]
pub enum InventoryError {
    /// Inventory file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// YAML was malformed or did not match the expected shape
    #[error("invalid inventory: {0}")]
    Parse(String),

    /// A group in the limit filter does not exist
    #[error("unknown group in limit: {0}")]
    UnknownGroup(String),

    /// The same host address is declared more than once
    #[error("host {host} declared in both {first} and {second}")]
    DuplicateHost {
        /// Host address
        host: String,
        /// Group that declared it first
        first: String,
        /// Group that declared it again
        second: String,
    },
}

impl From<serde_yaml::Error> for InventoryError {
    fn from(e: serde_yaml::Error) -> Self {
        InventoryError::Parse(e.to_string())
    }
}
