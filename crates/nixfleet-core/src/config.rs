//! Run settings handed to the engine by its caller

use std::path::PathBuf;
use std::time::Duration;

use nixfleet_system::RestartPolicy;
use nixfleet_system::nixos::DEFAULT_CONFIG_DIR;
use nixfleet_system::storage::DEFAULT_NAMESPACE;

/// Fixed attempt-count by fixed-delay polling budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Emit a progress notice every this many attempts (0 disables)
    pub notice_every: u32,
}

impl RetryPolicy {
    /// Create a policy with the default notice interval
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            notice_every: 10,
        }
    }

    /// Override the progress notice interval
    #[must_use]
    pub const fn with_notice_every(mut self, every: u32) -> Self {
        self.notice_every = every;
        self
    }
}

/// Polling budgets for every wait the engine performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeBudgets {
    /// Opening a session and running the liveness command
    pub connect: RetryPolicy,
    /// A node reporting `Ready`
    pub node_ready: RetryPolicy,
    /// Storage reporting a healthy status
    pub storage: RetryPolicy,
    /// Daemonset and deployment rollouts
    pub rollout: RetryPolicy,
    /// Pause after issuing a reboot, before reconnecting
    pub reboot_settle: Duration,
}

impl Default for ProbeBudgets {
    fn default() -> Self {
        let second = Duration::from_secs(1);
        Self {
            connect: RetryPolicy::new(300, second),
            node_ready: RetryPolicy::new(300, second),
            storage: RetryPolicy::new(600, second),
            rollout: RetryPolicy::new(600, second),
            reboot_settle: Duration::from_secs(10),
        }
    }
}

/// What a fleet run does to each host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Push rendered configuration and rebuild when it changed
    #[default]
    Reconcile,
    /// Pin the channel and rebuild with `--upgrade`
    Upgrade,
}

/// Cluster integration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettings {
    /// Drain, uncordon and health-gate through kubectl
    pub enabled: bool,
    /// Namespaces whose daemonsets and deployments gate progress
    pub namespaces: Vec<String>,
    /// Include storage health in health gates
    pub storage: bool,
    /// Namespace of the storage toolbox
    pub storage_namespace: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            namespaces: vec!["kube-system".to_string(), "default".to_string()],
            storage: true,
            storage_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Settings for one fleet run
#[derive(Debug, Clone)]
pub struct FleetSettings {
    /// Reconcile or upgrade
    pub mode: RunMode,
    /// How rebuilt configuration is activated
    pub policy: RestartPolicy,
    /// Disruption budget; derived from the fleet size when unset
    pub concurrency: Option<usize>,
    /// Surface remote rebuild output
    pub verbose: bool,
    /// Health-gate the whole cluster before touching any host
    pub initial_health_gate: bool,
    /// Cluster integration
    pub cluster: ClusterSettings,
    /// Remote directory holding the system configuration
    pub config_dir: String,
    /// Local directory for audit copies of rendered files
    pub artifacts_dir: Option<PathBuf>,
    /// Polling budgets
    pub budgets: ProbeBudgets,
    /// Stop launching host workflows after this many failures
    pub max_failures: Option<usize>,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            mode: RunMode::Reconcile,
            policy: RestartPolicy::ApplyOnly,
            concurrency: None,
            verbose: false,
            initial_health_gate: true,
            cluster: ClusterSettings::default(),
            config_dir: DEFAULT_CONFIG_DIR.to_string(),
            artifacts_dir: None,
            budgets: ProbeBudgets::default(),
            max_failures: None,
        }
    }
}

impl FleetSettings {
    /// Number of host workflows allowed in flight at once
    ///
    /// Reconciling defaults to half the fleet, upgrading to one host at a
    /// time. Never less than one.
    #[must_use]
    pub fn disruption_budget(&self, fleet_size: usize) -> usize {
        let budget = self.concurrency.unwrap_or(match self.mode {
            RunMode::Reconcile => fleet_size / 2,
            RunMode::Upgrade => 1,
        });
        budget.max(1)
    }

    /// Whether failures so far should stop new host workflows from launching
    #[must_use]
    pub fn failure_cutoff_reached(&self, failures: usize) -> bool {
        self.max_failures.is_some_and(|max| failures >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let budgets = ProbeBudgets::default();
        assert_eq!(budgets.connect.attempts, 300);
        assert_eq!(budgets.node_ready.attempts, 300);
        assert_eq!(budgets.storage.attempts, 600);
        assert_eq!(budgets.rollout.attempts, 600);
        assert_eq!(budgets.connect.delay, Duration::from_secs(1));
        assert_eq!(budgets.connect.notice_every, 10);
        assert_eq!(budgets.reboot_settle, Duration::from_secs(10));
    }

    #[test]
    fn test_disruption_budget() {
        let mut settings = FleetSettings::default();
        assert_eq!(settings.disruption_budget(6), 3);
        assert_eq!(settings.disruption_budget(1), 1);

        settings.mode = RunMode::Upgrade;
        assert_eq!(settings.disruption_budget(6), 1);

        settings.concurrency = Some(4);
        assert_eq!(settings.disruption_budget(6), 4);

        settings.concurrency = Some(0);
        assert_eq!(settings.disruption_budget(6), 1);
    }

    #[test]
    fn test_failure_cutoff() {
        let mut settings = FleetSettings::default();
        assert!(!settings.failure_cutoff_reached(100));

        settings.max_failures = Some(2);
        assert!(!settings.failure_cutoff_reached(1));
        assert!(settings.failure_cutoff_reached(2));
    }
}
