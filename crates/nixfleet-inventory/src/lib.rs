//! nixfleet-inventory: Fleet inventory loading
//!
//! Reads the YAML inventory that declares groups, their hosts, host variables,
//! configuration modules and the NixOS channel each group tracks.

pub mod error;
pub mod loader;
pub mod types;

pub use error::InventoryError;
pub use loader::{load, parse};
pub use types::{InventoryGroup, InventoryHost, Vars};
