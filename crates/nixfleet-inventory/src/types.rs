//! Inventory data types

use std::collections::BTreeMap;

use serde::Serialize;

/// Free-form variables handed to templates
pub type Vars = BTreeMap<String, serde_json::Value>;

/// One host as declared in the inventory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryHost {
    /// IP address or hostname used to connect
    pub address: String,
    /// Host-specific template variables
    pub vars: Vars,
}

/// One group as declared in the inventory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryGroup {
    /// Group name (the top-level key)
    pub name: String,
    /// Hosts in declaration order
    pub hosts: Vec<InventoryHost>,
    /// Configuration modules applied to every host in the group
    pub modules: Vec<String>,
    /// NixOS channel the group tracks, e.g. `nixos-24.11`
    pub channel: String,
    /// Group-wide template variables
    pub vars: Vars,
}
