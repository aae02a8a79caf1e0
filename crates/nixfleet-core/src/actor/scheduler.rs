//! `FleetScheduler`: Fleet-wide orchestration
//!
//! Runs one `HostActor` workflow per host under the disruption budget and
//! records every result in a `FleetReport`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use kameo::error::SendError;
use kameo::prelude::*;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::actor::host::{HostActor, HostActorArgs};
use crate::config::{FleetSettings, RunMode};
use crate::connect::{Connector, connect};
use crate::error::CoreError;
use crate::health::{HealthProber, HealthSignal};
use crate::host::{Group, Host};
use crate::message::{GetStatus, Reconcile, Upgrade, WorkflowResult};
use crate::render::TemplateRenderer;
use crate::report::{FleetReport, HostReport, Outcome};

/// Runs host workflows group by group
pub struct FleetScheduler {
    connector: Arc<dyn Connector>,
    renderer: Arc<dyn TemplateRenderer>,
    settings: Arc<FleetSettings>,
}

impl FleetScheduler {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        renderer: Arc<dyn TemplateRenderer>,
        settings: Arc<FleetSettings>,
    ) -> Self {
        Self {
            connector,
            renderer,
            settings,
        }
    }

    /// Get the run settings
    #[must_use]
    pub fn settings(&self) -> &FleetSettings {
        &self.settings
    }

    /// Run every host's workflow and collect the results
    ///
    /// Groups run one after another; hosts within a group run concurrently,
    /// never more than the disruption budget at once across the fleet. A
    /// host failure is recorded and does not stop other hosts. If the
    /// initial health gate fails no host is touched.
    pub async fn run(&self, groups: Vec<Group>) -> FleetReport {
        let started_at = Utc::now();
        let total: usize = groups.iter().map(|g| g.hosts.len()).sum();
        let budget = self.settings.disruption_budget(total);
        let cluster_nodes: Arc<[String]> = groups
            .iter()
            .flat_map(|g| &g.hosts)
            .map(Host::node_name)
            .collect();
        info!(
            mode = ?self.settings.mode,
            policy = %self.settings.policy,
            groups = groups.len(),
            hosts = total,
            budget,
            "starting fleet run"
        );

        if let Err(e) = self.initial_gate(&groups, &cluster_nodes).await {
            error!(error = %e, "initial health gate failed, no host was touched");
            let hosts = groups
                .iter()
                .flat_map(|g| &g.hosts)
                .map(|h| HostReport::skipped(h, "initial health gate failed"))
                .collect();
            return FleetReport {
                hosts,
                initial_gate_error: Some(e.to_string()),
                peak_concurrency: 0,
                started_at,
                finished_at: Utc::now(),
            };
        }

        let mut run = FleetRun {
            semaphore: Arc::new(Semaphore::new(budget)),
            gauge: Arc::new(ConcurrencyGauge::default()),
            reports: Vec::with_capacity(total),
            failures: 0,
            cluster_nodes,
        };

        for group in groups {
            let span = info_span!("group", group = %group.name());
            self.run_group(group, &mut run).instrument(span).await;
        }

        let report = FleetReport {
            peak_concurrency: run.gauge.peak(),
            hosts: run.reports,
            initial_gate_error: None,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            hosts = report.hosts.len(),
            failed = report.failures(),
            skipped = report.count(Outcome::Skipped),
            peak_concurrency = report.peak_concurrency,
            "fleet run finished"
        );
        report
    }

    /// Health-gate the whole cluster through the first host
    async fn initial_gate(&self, groups: &[Group], nodes: &[String]) -> Result<(), CoreError> {
        let settings = &self.settings;
        if !settings.initial_health_gate || !settings.cluster.enabled {
            return Ok(());
        }
        let Some(first) = groups.iter().flat_map(|g| &g.hosts).next() else {
            return Ok(());
        };

        info!(via = %first.address, "checking cluster health before any change");
        let session = connect(self.connector.as_ref(), first, &settings.budgets.connect).await?;
        let result = HealthProber::new(Arc::clone(&session), &settings.budgets, &settings.cluster)
            .wait_for_all(&HealthSignal::gate(nodes.iter().cloned(), &settings.cluster))
            .await;
        if let Err(e) = session.close().await {
            debug!(error = %e, "closing gate session");
        }
        result
    }

    async fn run_group(&self, group: Group, run: &mut FleetRun) {
        info!(hosts = group.hosts.len(), channel = %group.info.channel, "processing group");

        let mut set = JoinSet::new();
        let mut in_flight: HashMap<Id, HostReport> = HashMap::new();

        for host in group.hosts {
            let permit = loop {
                match Arc::clone(&run.semaphore).try_acquire_owned() {
                    Ok(permit) => break Some(permit),
                    Err(TryAcquireError::NoPermits) => match set.join_next_with_id().await {
                        Some(joined) => run.record(joined, &mut in_flight),
                        None => break Arc::clone(&run.semaphore).acquire_owned().await.ok(),
                    },
                    Err(TryAcquireError::Closed) => break None,
                }
            };

            let Some(permit) = permit else {
                run.reports
                    .push(HostReport::skipped(&host, "scheduler stopped"));
                continue;
            };
            if self.settings.failure_cutoff_reached(run.failures) {
                warn!(host = %host.address, failures = run.failures, "failure limit reached, skipping");
                run.reports
                    .push(HostReport::skipped(&host, "failure limit reached"));
                continue;
            }

            let placeholder = HostReport::begin(&host);
            let task = HostTask {
                host,
                connector: Arc::clone(&self.connector),
                renderer: Arc::clone(&self.renderer),
                settings: Arc::clone(&self.settings),
                gauge: Arc::clone(&run.gauge),
                cluster_nodes: Arc::clone(&run.cluster_nodes),
            };
            let id = set.spawn(task.run(permit)).id();
            in_flight.insert(id, placeholder);
        }

        while let Some(joined) = set.join_next_with_id().await {
            run.record(joined, &mut in_flight);
        }
    }
}

/// Mutable state of one fleet run
struct FleetRun {
    semaphore: Arc<Semaphore>,
    gauge: Arc<ConcurrencyGauge>,
    reports: Vec<HostReport>,
    failures: usize,
    /// Node names of every host in the run
    cluster_nodes: Arc<[String]>,
}

impl FleetRun {
    fn record(
        &mut self,
        joined: Result<(Id, HostReport), JoinError>,
        in_flight: &mut HashMap<Id, HostReport>,
    ) {
        let report = match joined {
            Ok((id, report)) => {
                in_flight.remove(&id);
                report
            }
            Err(e) => {
                let Some(mut report) = in_flight.remove(&e.id()) else {
                    error!(error = %e, "unknown host task failed");
                    return;
                };
                error!(host = %report.address, error = %e, "host task aborted");
                report.outcome = Outcome::FailedUnrecoverable;
                report.error = Some(format!("host task aborted: {e}"));
                report.finished_at = Utc::now();
                report
            }
        };

        if report.outcome.is_failure() {
            self.failures += 1;
        }
        self.reports.push(report);
    }
}

/// One host's workflow, run on its own task
struct HostTask {
    host: Host,
    connector: Arc<dyn Connector>,
    renderer: Arc<dyn TemplateRenderer>,
    settings: Arc<FleetSettings>,
    gauge: Arc<ConcurrencyGauge>,
    cluster_nodes: Arc<[String]>,
}

impl HostTask {
    async fn run(self, _permit: OwnedSemaphorePermit) -> HostReport {
        let _active = self.gauge.enter();
        let span = info_span!("host", host = %self.host.address, id = %self.host.id);
        let mut report = HostReport::begin(&self.host);

        let actor_ref = HostActor::spawn(HostActorArgs {
            host: self.host,
            connector: self.connector,
            renderer: self.renderer,
            settings: Arc::clone(&self.settings),
            cluster_nodes: self.cluster_nodes,
        });

        let result = match self.settings.mode {
            RunMode::Reconcile => actor_ref.ask(Reconcile).await.map_err(handler_error),
            RunMode::Upgrade => actor_ref.ask(Upgrade).await.map_err(handler_error),
        };

        match actor_ref.ask(GetStatus).await {
            Ok(status) => report.trail = status.trail,
            Err(e) => span.in_scope(|| warn!(error = %e, "could not read host status")),
        }
        actor_ref.stop_gracefully().await.ok();

        span.in_scope(|| match result {
            Ok(WorkflowResult {
                outcome,
                changed_files,
                kernel,
            }) => {
                info!(outcome = %outcome, changed = changed_files.len(), "host finished");
                report.outcome = outcome;
                report.changed_files = changed_files;
                report.kernel = kernel;
            }
            Err(e) => {
                report.outcome = e.outcome();
                error!(outcome = %report.outcome, error = %e, "host failed");
                report.error = Some(e.to_string());
            }
        });
        report.finished_at = Utc::now();
        report
    }
}

fn handler_error<M>(e: SendError<M, CoreError>) -> CoreError
where
    SendError<M, CoreError>: fmt::Display,
{
    match e {
        SendError::HandlerError(e) => e,
        other => CoreError::ActorError(other.to_string()),
    }
}

/// Counts host workflows in flight and remembers the highest count
#[derive(Debug, Default)]
struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct GaugeGuard(Arc<ConcurrencyGauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}
