//! YAML inventory parsing and group filtering
//!
//! ```yaml
//! workers:
//!   nix-channel: nixos-24.11
//!   modules: [k3s.nix, ceph.nix]
//!   vars:
//!     join_address: 10.0.0.1
//!   hosts:
//!     10.0.0.2:
//!       boot_device: /dev/nvme0n1
//!     10.0.0.3:
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::InventoryError;
use crate::types::{InventoryGroup, InventoryHost, Vars};

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    hosts: Mapping,
    #[serde(default, alias = "templates")]
    modules: Vec<String>,
    #[serde(rename = "nix-channel", alias = "channel")]
    channel: String,
    #[serde(default)]
    vars: Vars,
}

/// Load an inventory file, keeping only the groups named in `limit`
///
/// # Errors
/// Returns `InventoryError` if the file cannot be read or is invalid
pub fn load(path: &Path, limit: Option<&[String]>) -> Result<Vec<InventoryGroup>, InventoryError> {
    let content = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content, limit)
}

/// Parse inventory YAML, keeping only the groups named in `limit`
///
/// Groups keep their declaration order. A host address may appear in only
/// one group.
///
/// # Errors
/// Returns `InventoryError` on malformed YAML, an unknown group in `limit`,
/// or a duplicate host
pub fn parse(content: &str, limit: Option<&[String]>) -> Result<Vec<InventoryGroup>, InventoryError> {
    let root: Mapping = serde_yaml::from_str(content)?;

    let mut groups = Vec::with_capacity(root.len());
    for (key, value) in root {
        let name = scalar_key(&key)?;
        let raw: RawGroup = serde_yaml::from_value(value)
            .map_err(|e| InventoryError::Parse(format!("group {name}: {e}")))?;
        groups.push(build_group(name, raw)?);
    }

    if let Some(limit) = limit {
        for wanted in limit {
            if !groups.iter().any(|g| &g.name == wanted) {
                return Err(InventoryError::UnknownGroup(wanted.clone()));
            }
        }
        groups.retain(|g| limit.contains(&g.name));
    }

    let mut seen: HashMap<&str, &str> = HashMap::new();
    for group in &groups {
        if group.hosts.is_empty() {
            warn!(group = %group.name, "group has no hosts");
        }
        for host in &group.hosts {
            if let Some(first) = seen.insert(&host.address, &group.name) {
                return Err(InventoryError::DuplicateHost {
                    host: host.address.clone(),
                    first: first.to_string(),
                    second: group.name.clone(),
                });
            }
        }
    }

    debug!(groups = groups.len(), hosts = seen.len(), "inventory loaded");

    Ok(groups)
}

fn build_group(name: String, raw: RawGroup) -> Result<InventoryGroup, InventoryError> {
    let mut hosts = Vec::with_capacity(raw.hosts.len());
    for (key, value) in raw.hosts {
        let address = scalar_key(&key)?;
        let vars: Vars = match value {
            Value::Null => Vars::new(),
            other => serde_yaml::from_value(other)
                .map_err(|e| InventoryError::Parse(format!("host {address}: {e}")))?,
        };
        hosts.push(InventoryHost { address, vars });
    }

    Ok(InventoryGroup {
        name,
        hosts,
        modules: raw.modules,
        channel: raw.channel,
        vars: raw.vars,
    })
}

fn scalar_key(key: &Value) -> Result<String, InventoryError> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(InventoryError::Parse(format!(
            "expected a name, found {other:?}"
        ))),
    }
}
