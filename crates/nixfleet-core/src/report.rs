//! Per-host and fleet results

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::host::{Host, HostId};
use crate::state::HostState;

/// How a host's workflow ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Live configuration already matched; nothing rebuilt
    NoAction,
    /// Rebuilt and activated without a restart
    Applied,
    /// Rebuilt, restarted and health-gated
    AppliedAndRestarted,
    /// Failed; the previous configuration is back in place
    FailedAndRolledBack,
    /// Failed with the host in an unknown or partially changed state
    FailedUnrecoverable,
    /// Never started
    Skipped,
}

impl Outcome {
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::FailedAndRolledBack | Outcome::FailedUnrecoverable)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::NoAction => "no-action",
            Outcome::Applied => "applied",
            Outcome::AppliedAndRestarted => "applied-and-restarted",
            Outcome::FailedAndRolledBack => "failed-and-rolled-back",
            Outcome::FailedUnrecoverable => "failed-unrecoverable",
            Outcome::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Kernel release before and after an upgrade restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelChange {
    pub from: String,
    pub to: String,
}

/// Result of one host's workflow
#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub address: String,
    pub id: HostId,
    pub group: String,
    pub outcome: Outcome,
    /// Files written in this run
    pub changed_files: Vec<String>,
    pub kernel: Option<KernelChange>,
    /// Error that ended the workflow
    pub error: Option<String>,
    /// States visited, in order
    pub trail: Vec<HostState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HostReport {
    /// Report for a host whose workflow starts now; outcome pending as `Skipped`
    #[must_use]
    pub fn begin(host: &Host) -> Self {
        let now = Utc::now();
        Self {
            address: host.address.clone(),
            id: host.id,
            group: host.group.name.clone(),
            outcome: Outcome::Skipped,
            changed_files: Vec::new(),
            kernel: None,
            error: None,
            trail: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Report for a host that was never launched
    #[must_use]
    pub fn skipped(host: &Host, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::begin(host)
        }
    }
}

/// Result of a fleet run
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    /// Per-host results in completion order within each group
    pub hosts: Vec<HostReport>,
    /// Why the initial health gate stopped the run
    pub initial_gate_error: Option<String>,
    /// Highest number of host workflows observed in flight at once
    pub peak_concurrency: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FleetReport {
    /// True when the gate passed and no host failed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.initial_gate_error.is_none() && self.failures() == 0
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.hosts.iter().filter(|h| h.outcome.is_failure()).count()
    }

    /// Number of hosts that ended with `outcome`
    #[must_use]
    pub fn count(&self, outcome: Outcome) -> usize {
        self.hosts.iter().filter(|h| h.outcome == outcome).count()
    }

    /// Report for `address`, if it was part of the run
    #[must_use]
    pub fn host(&self, address: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.address == address)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use nixfleet_inventory::Vars;

    use super::*;
    use crate::host::GroupInfo;

    fn report(address: &str, outcome: Outcome) -> HostReport {
        let host = Host::new(
            address,
            Vars::new(),
            Arc::new(GroupInfo {
                name: "g".to_string(),
                channel: "nixos-24.11".to_string(),
                modules: vec![],
                vars: Vars::new(),
            }),
        );
        HostReport {
            outcome,
            ..HostReport::begin(&host)
        }
    }

    #[test]
    fn test_fleet_success() {
        let now = Utc::now();
        let mut fleet = FleetReport {
            hosts: vec![
                report("a", Outcome::NoAction),
                report("b", Outcome::AppliedAndRestarted),
                report("c", Outcome::Skipped),
            ],
            initial_gate_error: None,
            peak_concurrency: 1,
            started_at: now,
            finished_at: now,
        };
        assert!(fleet.is_success());
        assert_eq!(fleet.count(Outcome::Skipped), 1);

        fleet.hosts.push(report("d", Outcome::FailedAndRolledBack));
        assert!(!fleet.is_success());
        assert_eq!(fleet.failures(), 1);
        assert_eq!(fleet.host("d").unwrap().outcome, Outcome::FailedAndRolledBack);
    }

    #[test]
    fn test_gate_failure_is_not_success() {
        let now = Utc::now();
        let fleet = FleetReport {
            hosts: vec![],
            initial_gate_error: Some("timed out".to_string()),
            peak_concurrency: 0,
            started_at: now,
            finished_at: now,
        };
        assert!(!fleet.is_success());
    }

    #[test]
    fn test_outcome_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Outcome::FailedAndRolledBack).unwrap(),
            "\"failed-and-rolled-back\""
        );
        assert_eq!(Outcome::AppliedAndRestarted.to_string(), "applied-and-restarted");
    }
}
