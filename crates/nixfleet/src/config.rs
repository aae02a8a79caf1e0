//! Settings file loading and types

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::WrapErr;
use nixfleet_core::{ClusterSettings, ProbeBudgets, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Environment variable naming the settings file
pub const CONFIG_ENV: &str = "NIXFLEET_CONFIG";

/// Top-level settings for nixfleet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ssh: SshSettings,
    pub paths: PathSettings,
    pub cluster: ClusterSection,
    pub budgets: BudgetSettings,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssh: SshSettings::default(),
            paths: PathSettings::default(),
            cluster: ClusterSection::default(),
            budgets: BudgetSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

/// How hosts are reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub user: String,
    pub port: u16,
    /// Private key file; the default identity in `~/.ssh` when unset
    pub private_key: Option<PathBuf>,
    /// Environment variable holding a base64 private key
    pub key_env: Option<String>,
    /// Timeout for a single connect attempt
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            private_key: None,
            key_env: None,
            connect_timeout_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Remote configuration directory
    pub config_dir: String,
    /// Local template directory
    pub templates_dir: PathBuf,
    /// Local directory for audit copies of rendered files
    pub artifacts_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            config_dir: "/etc/nixos".to_string(),
            templates_dir: PathBuf::from("modules"),
            artifacts_dir: PathBuf::from("artifacts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    pub enabled: bool,
    /// Namespaces whose rollouts gate each host
    pub namespaces: Vec<String>,
    /// Check storage health
    pub storage: bool,
    pub storage_namespace: String,
}

impl Default for ClusterSection {
    fn default() -> Self {
        let defaults = ClusterSettings::default();
        Self {
            enabled: defaults.enabled,
            namespaces: defaults.namespaces,
            storage: defaults.storage,
            storage_namespace: defaults.storage_namespace,
        }
    }
}

impl From<&ClusterSection> for ClusterSettings {
    fn from(section: &ClusterSection) -> Self {
        ClusterSettings {
            enabled: section.enabled,
            namespaces: section.namespaces.clone(),
            storage: section.storage,
            storage_namespace: section.storage_namespace.clone(),
        }
    }
}

/// Polling budgets; attempts at a fixed delay in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub connect_attempts: u32,
    pub node_ready_attempts: u32,
    pub storage_attempts: u32,
    pub rollout_attempts: u32,
    pub delay_secs: u64,
    pub reboot_settle_secs: u64,
    /// Log a progress notice every this many attempts
    pub notice_every: u32,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            connect_attempts: 300,
            node_ready_attempts: 300,
            storage_attempts: 600,
            rollout_attempts: 600,
            delay_secs: 1,
            reboot_settle_secs: 10,
            notice_every: 10,
        }
    }
}

impl From<&BudgetSettings> for ProbeBudgets {
    fn from(budgets: &BudgetSettings) -> Self {
        let delay = Duration::from_secs(budgets.delay_secs);
        let policy =
            |attempts| RetryPolicy::new(attempts, delay).with_notice_every(budgets.notice_every);
        ProbeBudgets {
            connect: policy(budgets.connect_attempts),
            node_ready: policy(budgets.node_ready_attempts),
            storage: policy(budgets.storage_attempts),
            rollout: policy(budgets.rollout_attempts),
            reboot_settle: Duration::from_secs(budgets.reboot_settle_secs),
        }
    }
}

impl Settings {
    /// Load settings from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let settings: Settings =
            toml::from_str(&content).wrap_err_with(|| format!("parsing {}", path.display()))?;
        Ok(settings)
    }

    /// Load from an explicit path, `NIXFLEET_CONFIG`, or the default paths
    ///
    /// Falls back to defaults when no file is found. Returns the path used.
    ///
    /// # Errors
    /// Returns error if the chosen file cannot be read or parsed
    pub fn discover(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        let paths = [
            Some(PathBuf::from("nixfleet.toml")),
            Some(PathBuf::from("/etc/nixfleet/nixfleet.toml")),
            dirs::config_dir().map(|p| p.join("nixfleet/nixfleet.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Settings::default(), None))
    }
}
