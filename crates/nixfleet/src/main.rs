//! nixfleet
//!
//! Reconciles and upgrades NixOS hosts listed in an inventory, group by group,
//! with rolling restarts gated on cluster health.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use eyre::{WrapErr, bail};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nixfleet_core::{FleetReport, FleetScheduler, FleetSettings, Group, RunMode, TemplateDir};

mod cli;
mod config;
mod factory;

use cli::{Cli, LogFormat};
use config::Settings;
use factory::SshConnector;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let (settings, settings_path) = Settings::discover(cli.config.as_deref())?;
    init_tracing(&settings.log_level, cli.verbose, cli.log_format);
    match &settings_path {
        Some(path) => info!(path = %path.display(), "loaded settings"),
        None => warn!("no settings file found, using defaults"),
    }

    let groups: Vec<Group> = nixfleet_inventory::load(&cli.inventory, cli.limit.as_deref())
        .wrap_err_with(|| format!("loading inventory {}", cli.inventory.display()))?
        .into_iter()
        .map(Group::from)
        .collect();
    if groups.iter().all(|g| g.hosts.is_empty()) {
        warn!("inventory selects no hosts");
        return Ok(ExitCode::SUCCESS);
    }

    let templates = &settings.paths.templates_dir;
    if !templates.is_dir() {
        bail!("template directory {} does not exist", templates.display());
    }
    let artifacts = &settings.paths.artifacts_dir;
    tokio::fs::create_dir_all(artifacts)
        .await
        .wrap_err_with(|| format!("creating artifacts directory {}", artifacts.display()))?;

    let fleet = fleet_settings(&cli, &settings);
    let scheduler = FleetScheduler::new(
        Arc::new(SshConnector::new(&settings.ssh, cli.private_key.clone())),
        Arc::new(TemplateDir::new(templates)),
        Arc::new(fleet),
    );
    let report = scheduler.run(groups).await;

    print_summary(&report);
    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(path, json)
            .await
            .wrap_err_with(|| format!("writing report {}", path.display()))?;
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(level: &str, verbose: bool, format: LogFormat) {
    let level = if verbose { "debug" } else { level };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}

/// Combine command-line flags with the settings file into run settings
fn fleet_settings(cli: &Cli, settings: &Settings) -> FleetSettings {
    let mut cluster = nixfleet_core::ClusterSettings::from(&settings.cluster);
    if cli.no_cluster {
        cluster.enabled = false;
    }

    FleetSettings {
        mode: if cli.upgrade {
            RunMode::Upgrade
        } else {
            RunMode::Reconcile
        },
        policy: cli.action.into(),
        concurrency: cli.disruption_budget.map(|n| n as usize),
        verbose: cli.verbose,
        initial_health_gate: !cli.skip_initial_health,
        cluster,
        config_dir: settings.paths.config_dir.clone(),
        artifacts_dir: Some(settings.paths.artifacts_dir.clone()),
        budgets: (&settings.budgets).into(),
        max_failures: cli.max_failures,
    }
}

fn print_summary(report: &FleetReport) {
    println!();
    println!("{:<18} {:<12} {:<24} {:>7}  KERNEL", "HOST", "GROUP", "OUTCOME", "CHANGED");
    for host in &report.hosts {
        let kernel = host
            .kernel
            .as_ref()
            .map(|k| format!("{} -> {}", k.from, k.to))
            .unwrap_or_default();
        println!(
            "{:<18} {:<12} {:<24} {:>7}  {kernel}",
            host.address,
            host.group,
            host.outcome.to_string(),
            host.changed_files.len()
        );
        if let Some(error) = &host.error {
            println!("    {error}");
        }
    }

    if let Some(error) = &report.initial_gate_error {
        println!();
        println!("initial health gate failed: {error}");
    }
    let elapsed = report.finished_at - report.started_at;
    println!();
    println!(
        "{} hosts, {} failed, peak concurrency {}, {}s",
        report.hosts.len(),
        report.failures(),
        report.peak_concurrency,
        elapsed.num_seconds()
    );
}
