//! Type definitions for system operations

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a rebuilt configuration is activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Activate immediately, no restart (`nixos-rebuild switch`)
    #[default]
    ApplyOnly,
    /// Make the new generation the boot default and restart into it (`nixos-rebuild boot`)
    ApplyAndMakeDefault,
}

impl RestartPolicy {
    /// `nixos-rebuild` action for this policy
    #[must_use]
    pub fn rebuild_action(self) -> &'static str {
        match self {
            RestartPolicy::ApplyOnly => "switch",
            RestartPolicy::ApplyAndMakeDefault => "boot",
        }
    }

    /// Whether a successful rebuild under this policy calls for a restart
    #[must_use]
    pub fn is_restart_eligible(self) -> bool {
        matches!(self, RestartPolicy::ApplyAndMakeDefault)
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::ApplyOnly => write!(f, "apply-only"),
            RestartPolicy::ApplyAndMakeDefault => write!(f, "apply-and-make-default"),
        }
    }
}

/// Evidence of new store paths in an upgrade's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeActivity {
    /// Paths substituted from a binary cache
    pub paths_fetched: Option<u32>,
    /// Derivations built locally
    pub derivations_built: Option<u32>,
}

impl UpgradeActivity {
    /// True when the upgrade neither fetched nor built anything
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.paths_fetched.is_none() && self.derivations_built.is_none()
    }
}

/// Workload resource kinds whose rollout health gates progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
}

impl WorkloadKind {
    /// Resource name as kubectl expects it
    #[must_use]
    pub fn resource(self) -> &'static str {
        match self {
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::Deployment => "deployment",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource())
    }
}

/// Rollout state of every resource of one kind in a namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutStatus {
    /// Number of resources inspected
    pub total: usize,
    /// Names of resources not yet fully available
    pub pending: Vec<String>,
}

impl RolloutStatus {
    /// Number of healthy resources
    #[must_use]
    pub fn healthy(&self) -> usize {
        self.total - self.pending.len()
    }

    /// True when every resource is available
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_actions() {
        assert_eq!(RestartPolicy::ApplyOnly.rebuild_action(), "switch");
        assert_eq!(RestartPolicy::ApplyAndMakeDefault.rebuild_action(), "boot");
        assert!(!RestartPolicy::ApplyOnly.is_restart_eligible());
        assert!(RestartPolicy::ApplyAndMakeDefault.is_restart_eligible());
    }

    #[test]
    fn test_upgrade_activity_noop() {
        assert!(UpgradeActivity::default().is_noop());
        assert!(
            !UpgradeActivity {
                paths_fetched: Some(3),
                derivations_built: None
            }
            .is_noop()
        );
    }
}
