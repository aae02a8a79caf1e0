//! Message types for actor communication
//!
//! Message handlers are implemented in their respective actor modules.

use kameo_macros::Reply;

use crate::host::HostId;
use crate::report::{KernelChange, Outcome};
use crate::state::HostState;

/// Bring the host's configuration in line with its rendered templates
#[derive(Debug)]
pub struct Reconcile;

/// Reconcile and move the host to the newest channel generation
#[derive(Debug)]
pub struct Upgrade;

/// Get the host's workflow status
#[derive(Debug)]
pub struct GetStatus;

/// Result of a completed workflow
#[derive(Debug, Clone, Reply)]
pub struct WorkflowResult {
    pub outcome: Outcome,
    /// Files written
    pub changed_files: Vec<String>,
    /// Kernel before and after, when an upgrade restart changed it
    pub kernel: Option<KernelChange>,
}

/// Host status response
#[derive(Debug, Clone, Reply)]
pub struct HostStatus {
    pub address: String,
    pub id: HostId,
    /// Current state
    pub state: HostState,
    /// Every state visited
    pub trail: Vec<HostState>,
    /// Error message if in failed state
    pub error: Option<String>,
}
