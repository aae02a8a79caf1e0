//! kubectl operations: drain, uncordon, node and workload status

use std::sync::Arc;

use nixfleet_exec::{CommandResult, RemoteExecutor, shell_quote};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::SystemError;
use crate::types::{RolloutStatus, WorkloadKind};

#[derive(Debug, Deserialize)]
struct Node {
    status: NodeStatus,
}

#[derive(Debug, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

impl Condition {
    fn is_true(&self) -> bool {
        self.status == "True"
    }
}

#[derive(Debug, Deserialize)]
struct List<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DaemonSet {
    metadata: Metadata,
    #[serde(default)]
    status: DaemonSetStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaemonSetStatus {
    #[serde(default)]
    desired_number_scheduled: u32,
    #[serde(default)]
    number_available: u32,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    metadata: Metadata,
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Deserialize)]
struct DeploymentSpec {
    #[serde(default = "default_replicas")]
    replicas: u32,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
        }
    }
}

// Kubernetes defaults an unset replica count to 1
fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    available_replicas: u32,
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// kubectl client running on a cluster node
pub struct Kubectl {
    executor: Arc<dyn RemoteExecutor>,
}

impl Kubectl {
    /// Create a new client over a host session
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    async fn mutate(&self, cmd: String) -> Result<CommandResult, SystemError> {
        let result = self.executor.run(&cmd).await?;
        if !result.success() {
            return Err(SystemError::CommandFailed {
                command: cmd,
                status: result.status,
                message: result.combined_output(),
            });
        }
        Ok(result)
    }

    async fn query(&self, cmd: String) -> Result<String, SystemError> {
        let result = self.executor.run(&cmd).await?;
        if !result.success() {
            return Err(SystemError::CommandFailed {
                command: cmd,
                status: result.status,
                message: result.stderr,
            });
        }
        Ok(result.stdout)
    }

    /// Evict workloads from `node` and cordon it
    ///
    /// # Errors
    /// Returns `SystemError::CommandFailed` if kubectl exits non-zero
    #[instrument(skip(self))]
    pub async fn drain(&self, node: &str) -> Result<CommandResult, SystemError> {
        self.mutate(format!(
            "kubectl drain {} --ignore-daemonsets --delete-emptydir-data",
            shell_quote(node)
        ))
        .await
    }

    /// Mark `node` schedulable again
    ///
    /// # Errors
    /// Returns `SystemError::CommandFailed` if kubectl exits non-zero
    #[instrument(skip(self))]
    pub async fn uncordon(&self, node: &str) -> Result<CommandResult, SystemError> {
        self.mutate(format!("kubectl uncordon {}", shell_quote(node)))
            .await
    }

    /// Whether `node` reports a true `Ready` condition
    ///
    /// # Errors
    /// Returns `SystemError` if the query fails or returns malformed JSON
    pub async fn node_ready(&self, node: &str) -> Result<bool, SystemError> {
        let json = self
            .query(format!("kubectl get node {} -o json", shell_quote(node)))
            .await?;
        let ready = parse_node_ready(&json)?;
        debug!(node = %node, ready, "node status");
        Ok(ready)
    }

    /// Rollout state of every `kind` resource in `namespace`
    ///
    /// # Errors
    /// Returns `SystemError` if the query fails or returns malformed JSON
    pub async fn rollout(
        &self,
        namespace: &str,
        kind: WorkloadKind,
    ) -> Result<RolloutStatus, SystemError> {
        let json = self
            .query(format!(
                "kubectl get {} -o json -n {}",
                kind.resource(),
                shell_quote(namespace)
            ))
            .await?;
        parse_rollout(kind, &json)
    }
}

/// Parse `kubectl get node -o json` output into readiness
///
/// # Errors
/// Returns `SystemError::ParseError` on malformed JSON
pub fn parse_node_ready(json: &str) -> Result<bool, SystemError> {
    let node: Node = serde_json::from_str(json).map_err(|e| SystemError::ParseError(e.to_string()))?;
    Ok(node
        .status
        .conditions
        .iter()
        .any(|c| c.kind == "Ready" && c.is_true()))
}

/// Parse `kubectl get <kind> -o json` list output into rollout state
///
/// Daemonsets are healthy when every scheduled pod is available. Deployments
/// additionally need a true `MinimumReplicasAvailable` condition.
///
/// # Errors
/// Returns `SystemError::ParseError` on malformed JSON
pub fn parse_rollout(kind: WorkloadKind, json: &str) -> Result<RolloutStatus, SystemError> {
    let parse_err = |e: serde_json::Error| SystemError::ParseError(e.to_string());

    let (total, pending) = match kind {
        WorkloadKind::DaemonSet => {
            let list: List<DaemonSet> = serde_json::from_str(json).map_err(parse_err)?;
            let pending = list
                .items
                .iter()
                .filter(|ds| ds.status.number_available != ds.status.desired_number_scheduled)
                .map(|ds| ds.metadata.name.clone())
                .collect();
            (list.items.len(), pending)
        }
        WorkloadKind::Deployment => {
            let list: List<Deployment> = serde_json::from_str(json).map_err(parse_err)?;
            let pending = list
                .items
                .iter()
                .filter(|d| {
                    let min_available = d.status.conditions.iter().any(|c| {
                        c.reason.as_deref() == Some("MinimumReplicasAvailable") && c.is_true()
                    });
                    !(min_available && d.status.available_replicas == d.spec.replicas)
                })
                .map(|d| d.metadata.name.clone())
                .collect();
            (list.items.len(), pending)
        }
    };

    Ok(RolloutStatus { total, pending })
}
