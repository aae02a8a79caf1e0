//! Rebuild executor with rollback

use std::sync::Arc;

use nixfleet_exec::RemoteExecutor;
use nixfleet_system::{NixosManager, RestartPolicy, UpgradeActivity};
use tracing::{info, instrument, warn};

use crate::differ::{FileChange, restore_previous};
use crate::error::CoreError;

/// Lines of rebuild error output kept on failure
const STDERR_TAIL_LINES: usize = 20;

/// How to rebuild
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildRequest {
    pub policy: RestartPolicy,
    /// Rebuild with `--upgrade` and inspect the output for new store paths
    pub upgrade: bool,
    /// Log the remote rebuild output
    pub verbose: bool,
}

/// Result of a successful rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildOutcome {
    /// The host should be restarted into the new generation
    pub restart_required: bool,
    /// What an upgrade fetched and built; `None` outside upgrades
    pub activity: Option<UpgradeActivity>,
}

impl RebuildOutcome {
    /// Upgrade that neither fetched nor built anything
    #[must_use]
    pub fn is_noop_upgrade(&self) -> bool {
        self.activity.is_some_and(|a| a.is_noop())
    }
}

/// Point the host's `nixos` channel at `channel`
///
/// # Errors
/// Returns `CoreError::ChannelPinFailed` on any failure
#[instrument(skip(session))]
pub async fn pin_channel(session: &Arc<dyn RemoteExecutor>, channel: &str) -> Result<(), CoreError> {
    NixosManager::new(Arc::clone(session))
        .pin_channel(channel)
        .await
        .map_err(|e| CoreError::ChannelPinFailed(e.to_string()))
}

/// Run the rebuild; on a non-zero exit restore every file in `changes`
///
/// A restart is required only when the policy is restart-eligible and, for
/// upgrades, the output shows fetched paths or built derivations.
///
/// # Errors
/// Returns `CoreError::RebuildFailed` after restoring, or `CoreError::Exec`
/// if the transport fails mid-rebuild
#[instrument(skip_all, fields(policy = %request.policy, upgrade = request.upgrade))]
pub async fn rebuild(
    session: &Arc<dyn RemoteExecutor>,
    request: &RebuildRequest,
    changes: &[FileChange],
) -> Result<RebuildOutcome, CoreError> {
    info!("rebuilding NixOS");
    let result = NixosManager::new(Arc::clone(session))
        .rebuild(request.policy, request.upgrade)
        .await?;

    if request.verbose {
        info!(stdout = %result.stdout, stderr = %result.stderr, "rebuild output");
    }

    if !result.success() {
        warn!(
            status = result.status,
            files = changes.len(),
            "rebuild failed, restoring previous configuration"
        );
        let rollback_failures = restore_previous(session.as_ref(), changes).await;
        return Err(CoreError::RebuildFailed {
            status: result.status,
            stderr: tail(&result.stderr, STDERR_TAIL_LINES),
            rollback_failures,
        });
    }

    let activity = request
        .upgrade
        .then(|| NixosManager::parse_upgrade_activity(&result.combined_output()));

    if let Some(activity) = activity {
        match (activity.paths_fetched, activity.derivations_built) {
            (None, None) => info!("no upgrades needed"),
            (fetched, built) => info!(
                paths_fetched = fetched.unwrap_or(0),
                derivations_built = built.unwrap_or(0),
                "upgrade pulled in new store paths"
            ),
        }
    }

    let noop = activity.is_some_and(|a| a.is_noop());
    Ok(RebuildOutcome {
        restart_required: request.policy.is_restart_eligible() && !noop,
        activity,
    })
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
