//! Ceph (rook) storage health

use std::sync::Arc;

use nixfleet_exec::{RemoteExecutor, shell_quote};
use serde::Deserialize;

use crate::error::SystemError;

/// Overall status string Ceph reports when healthy
pub const HEALTH_OK: &str = "HEALTH_OK";

/// Namespace the rook operator and toolbox live in by default
pub const DEFAULT_NAMESPACE: &str = "rook-ceph";

#[derive(Debug, Deserialize)]
struct CephStatus {
    health: CephHealth,
}

#[derive(Debug, Deserialize)]
struct CephHealth {
    status: String,
}

/// Queries Ceph through the rook toolbox deployment
pub struct CephClient {
    executor: Arc<dyn RemoteExecutor>,
    namespace: String,
}

impl CephClient {
    /// Create a new client over a host session
    pub fn new(executor: Arc<dyn RemoteExecutor>, namespace: impl Into<String>) -> Self {
        Self {
            executor,
            namespace: namespace.into(),
        }
    }

    /// Command line for `ceph status` inside the toolbox
    #[must_use]
    pub fn status_command(&self) -> String {
        format!(
            "kubectl -n {} exec deployment/rook-ceph-tools --pod-running-timeout=5m -- ceph status -f json",
            shell_quote(&self.namespace)
        )
    }

    /// Overall health status string, e.g. `HEALTH_OK` or `HEALTH_WARN`
    ///
    /// # Errors
    /// Returns `SystemError` if the query fails or returns malformed JSON
    pub async fn health_status(&self) -> Result<String, SystemError> {
        let cmd = self.status_command();
        let result = self.executor.run(&cmd).await?;
        if !result.success() {
            return Err(SystemError::CommandFailed {
                command: cmd,
                status: result.status,
                message: result.stderr,
            });
        }
        parse_health(&result.stdout)
    }
}

/// Extract `health.status` from `ceph status -f json`
///
/// # Errors
/// Returns `SystemError::ParseError` on malformed JSON
pub fn parse_health(json: &str) -> Result<String, SystemError> {
    let status: CephStatus =
        serde_json::from_str(json).map_err(|e| SystemError::ParseError(e.to_string()))?;
    Ok(status.health.status)
}
