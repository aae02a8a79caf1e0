//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use nixfleet_system::RestartPolicy;

#[derive(Debug, Parser)]
#[command(name = "nixfleet")]
#[command(about = "Reconcile and upgrade a fleet of NixOS hosts", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Inventory file
    #[arg(short, long, default_value = "inventory.yaml")]
    pub inventory: PathBuf,

    /// How rebuilt configuration is activated
    #[arg(short, long, value_enum, default_value_t = Action::Switch)]
    pub action: Action,

    /// Upgrade to the newest channel generation
    #[arg(short, long)]
    pub upgrade: bool,

    /// Show remote rebuild output and debug logs
    #[arg(short, long)]
    pub verbose: bool,

    /// Only process these groups (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub limit: Option<Vec<String>>,

    /// Disruption budget: hosts allowed in flight at once
    #[arg(short = 'd', long = "disruption-budget", value_parser = clap::value_parser!(u32).range(1..))]
    pub disruption_budget: Option<u32>,

    /// Do not health-check the cluster before touching any host
    #[arg(long)]
    pub skip_initial_health: bool,

    /// Hosts are not cluster nodes: no drain, uncordon or health checks
    #[arg(long)]
    pub no_cluster: bool,

    /// Stop launching host workflows after this many failures
    #[arg(long)]
    pub max_failures: Option<usize>,

    /// SSH private key
    #[arg(long)]
    pub private_key: Option<PathBuf>,

    /// Settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Write the fleet report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Rebuild action
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Activate now; never reboot
    Switch,
    /// Make the new generation the boot default and reboot into it
    Boot,
}

impl From<Action> for RestartPolicy {
    fn from(action: Action) -> Self {
        match action {
            Action::Switch => RestartPolicy::ApplyOnly,
            Action::Boot => RestartPolicy::ApplyAndMakeDefault,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["nixfleet"]);

        assert_eq!(cli.inventory, PathBuf::from("inventory.yaml"));
        assert_eq!(cli.action, Action::Switch);
        assert!(!cli.upgrade);
        assert_eq!(cli.limit, None);
        assert_eq!(RestartPolicy::from(cli.action), RestartPolicy::ApplyOnly);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "nixfleet",
            "-i",
            "fleet.yaml",
            "-a",
            "boot",
            "-u",
            "--limit",
            "control,workers",
            "-d",
            "2",
            "--skip-initial-health",
            "--log-format",
            "json",
        ]);

        assert_eq!(RestartPolicy::from(cli.action), RestartPolicy::ApplyAndMakeDefault);
        assert!(cli.upgrade);
        assert_eq!(
            cli.limit,
            Some(vec!["control".to_string(), "workers".to_string()])
        );
        assert_eq!(cli.disruption_budget, Some(2));
        assert!(cli.skip_initial_health);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        assert!(Cli::try_parse_from(["nixfleet", "-d", "0"]).is_err());
    }
}
