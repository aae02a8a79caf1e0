//! Host and group model

use std::fmt;
use std::sync::Arc;

use nixfleet_inventory::{InventoryGroup, Vars};
use serde::Serialize;
use uuid::Uuid;

/// Stable orchestrator-facing host name
///
/// A UUIDv5 of the connection address in the OID namespace, so the node name
/// used for drain and uncordon survives DNS and IP churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HostId(Uuid);

impl HostId {
    /// Derive the identifier for a connection address
    #[must_use]
    pub fn derive(address: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, address.as_bytes()))
    }

    /// Underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Settings shared by every host in a group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupInfo {
    pub name: String,
    /// Channel the group tracks
    pub channel: String,
    /// Configuration modules applied to every host
    pub modules: Vec<String>,
    pub vars: Vars,
}

/// One managed machine
#[derive(Debug, Clone)]
pub struct Host {
    /// IP address or hostname used to connect
    pub address: String,
    /// Identifier derived from `address`
    pub id: HostId,
    /// Host-specific template variables
    pub vars: Vars,
    /// Group the host belongs to
    pub group: Arc<GroupInfo>,
}

impl Host {
    /// Create a host, deriving its identifier from `address`
    pub fn new(address: impl Into<String>, vars: Vars, group: Arc<GroupInfo>) -> Self {
        let address = address.into();
        Self {
            id: HostId::derive(&address),
            address,
            vars,
            group,
        }
    }

    /// Name of the host's node in the cluster
    #[must_use]
    pub fn node_name(&self) -> String {
        self.id.to_string()
    }
}

/// Hosts sharing a channel and module list
#[derive(Debug, Clone)]
pub struct Group {
    pub info: Arc<GroupInfo>,
    pub hosts: Vec<Host>,
}

impl Group {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }
}

impl From<InventoryGroup> for Group {
    fn from(group: InventoryGroup) -> Self {
        let info = Arc::new(GroupInfo {
            name: group.name,
            channel: group.channel,
            modules: group.modules,
            vars: group.vars,
        });
        let hosts = group
            .hosts
            .into_iter()
            .map(|h| Host::new(h.address, h.vars, Arc::clone(&info)))
            .collect();
        Self { info, hosts }
    }
}
