//! `HostActor`: Per-host workflow
//!
//! Owns the host's session and state trail and runs one reconcile or upgrade
//! workflow from connect to health gate.

use std::sync::Arc;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use nixfleet_exec::RemoteExecutor;
use nixfleet_system::NixosManager;

use crate::config::{FleetSettings, RunMode};
use crate::connect::{Connector, connect};
use crate::differ::reconcile_config;
use crate::error::CoreError;
use crate::health::{HealthProber, HealthSignal};
use crate::host::Host;
use crate::message::{GetStatus, HostStatus, Reconcile, Upgrade, WorkflowResult};
use crate::rebuild::{RebuildRequest, pin_channel, rebuild};
use crate::render::{TemplateRenderer, render_desired, stage_artifacts};
use crate::report::{KernelChange, Outcome};
use crate::restart::{RestartPhase, rolling_restart};
use crate::state::{HostState, StateTrail};

/// Arguments for spawning a `HostActor`
pub struct HostActorArgs {
    /// Host to work on
    pub host: Host,
    /// Opens sessions to the host
    pub connector: Arc<dyn Connector>,
    /// Renders the host's target files
    pub renderer: Arc<dyn TemplateRenderer>,
    /// Run-wide settings
    pub settings: Arc<FleetSettings>,
    /// Node names of every inventory host, health-gated with this one
    pub cluster_nodes: Arc<[String]>,
}

/// Per-host actor running one workflow
pub struct HostActor {
    host: Host,
    connector: Arc<dyn Connector>,
    renderer: Arc<dyn TemplateRenderer>,
    settings: Arc<FleetSettings>,
    cluster_nodes: Arc<[String]>,
    /// Open session, if any
    session: Option<Arc<dyn RemoteExecutor>>,
    progress: StateTrail,
    span: Span,
}

impl HostActor {
    /// Get the host
    #[must_use]
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> HostState {
        self.progress.current()
    }

    /// Run one workflow, entering `Failed` on error
    async fn execute(&mut self, mode: RunMode) -> Result<WorkflowResult, CoreError> {
        if self.progress.current() != HostState::Idle {
            return Err(CoreError::InvalidTransition {
                from: self.progress.current(),
                to: HostState::Connecting,
            });
        }

        let span = self.span.clone();
        let result = self.run(mode).instrument(span).await;
        if let Err(e) = &result {
            self.progress.fail(e);
        }
        self.close_session().await;
        result
    }

    async fn run(&mut self, mode: RunMode) -> Result<WorkflowResult, CoreError> {
        let upgrade = mode == RunMode::Upgrade;

        self.progress.advance(HostState::Connecting)?;
        let session = connect(
            self.connector.as_ref(),
            &self.host,
            &self.settings.budgets.connect,
        )
        .await?;
        self.session = Some(Arc::clone(&session));

        let kernel_before = if upgrade {
            let release = NixosManager::new(Arc::clone(&session))
                .kernel_release()
                .await?;
            info!(kernel = %release, "running kernel");

            self.progress.advance(HostState::PinningChannel)?;
            pin_channel(&session, &self.host.group.channel).await?;
            Some(release)
        } else {
            None
        };

        self.progress.advance(HostState::Diffing)?;
        let desired = render_desired(self.renderer.as_ref(), &self.host)?;
        if let Some(dir) = &self.settings.artifacts_dir {
            stage_artifacts(dir, &self.host, &desired).await?;
        }
        let delta = match reconcile_config(session.as_ref(), &self.settings.config_dir, &desired)
            .await
        {
            Ok(delta) => delta,
            Err(e @ CoreError::PushFailed { .. }) => {
                self.progress.advance(HostState::RollingBack)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let changed_files = delta.changed_files();

        if delta.is_empty() && !upgrade {
            info!("configuration already up to date");
            self.progress.advance(HostState::Done)?;
            return Ok(WorkflowResult {
                outcome: Outcome::NoAction,
                changed_files,
                kernel: None,
            });
        }

        self.progress.advance(HostState::Rebuilding)?;
        let request = RebuildRequest {
            policy: self.settings.policy,
            upgrade,
            verbose: self.settings.verbose,
        };
        let rebuilt = match rebuild(&session, &request, &delta.changed).await {
            Ok(outcome) => outcome,
            Err(e @ CoreError::RebuildFailed { .. }) => {
                if !delta.is_empty() {
                    self.progress.advance(HostState::RollingBack)?;
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if rebuilt.is_noop_upgrade() && delta.is_empty() {
            info!("no upgrades needed");
            self.progress.advance(HostState::Done)?;
            return Ok(WorkflowResult {
                outcome: Outcome::NoAction,
                changed_files,
                kernel: None,
            });
        }

        if !rebuilt.restart_required {
            if self.settings.cluster.enabled {
                self.progress.advance(HostState::HealthGating)?;
                HealthProber::new(
                    Arc::clone(&session),
                    &self.settings.budgets,
                    &self.settings.cluster,
                )
                .wait_for_all(&HealthSignal::host_gate(
                    &self.host.node_name(),
                    &self.cluster_nodes,
                    &self.settings.cluster,
                ))
                .await?;
            }
            self.progress.advance(HostState::Done)?;
            return Ok(WorkflowResult {
                outcome: Outcome::Applied,
                changed_files,
                kernel: None,
            });
        }

        let progress = &mut self.progress;
        let mut on_phase = |phase: RestartPhase| {
            if phase == RestartPhase::Done {
                return;
            }
            if let Err(e) = progress.advance(phase.host_state()) {
                warn!(error = %e, "unexpected restart phase");
            }
        };
        // the pre-reboot session is closed inside the restart
        self.session = None;
        let session = rolling_restart(
            &self.host,
            session,
            self.connector.as_ref(),
            &self.settings,
            &self.cluster_nodes,
            &mut on_phase,
        )
        .await?;
        self.session = Some(Arc::clone(&session));

        let kernel = match kernel_before {
            Some(before) => {
                let after = NixosManager::new(Arc::clone(&session))
                    .kernel_release()
                    .await?;
                if after == before {
                    info!(kernel = %after, "kernel unchanged");
                    None
                } else {
                    info!(from = %before, to = %after, "kernel changed");
                    Some(KernelChange {
                        from: before,
                        to: after,
                    })
                }
            }
            None => None,
        };

        self.progress.advance(HostState::Done)?;
        Ok(WorkflowResult {
            outcome: Outcome::AppliedAndRestarted,
            changed_files,
            kernel,
        })
    }

    async fn close_session(&mut self) {
        if let Some(session) = self.session.take()
            && let Err(e) = session.close().await
        {
            debug!(error = %e, "closing session");
        }
    }
}

impl Actor for HostActor {
    type Args = HostActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        let span = info_span!("host", host = %args.host.address, id = %args.host.id);
        span.in_scope(|| debug!(actor = %actor_ref.id(), "HostActor starting"));

        Ok(Self {
            host: args.host,
            connector: args.connector,
            renderer: args.renderer,
            settings: args.settings,
            cluster_nodes: args.cluster_nodes,
            session: None,
            progress: StateTrail::default(),
            span,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        self.span
            .in_scope(|| debug!(reason = ?reason, state = %self.progress.current(), "HostActor stopping"));
        self.close_session().await;
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<Reconcile> for HostActor {
    type Reply = Result<WorkflowResult, CoreError>;

    async fn handle(
        &mut self,
        _msg: Reconcile,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.execute(RunMode::Reconcile).await
    }
}

impl Message<Upgrade> for HostActor {
    type Reply = Result<WorkflowResult, CoreError>;

    async fn handle(
        &mut self,
        _msg: Upgrade,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.execute(RunMode::Upgrade).await
    }
}

impl Message<GetStatus> for HostActor {
    type Reply = HostStatus;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        HostStatus {
            address: self.host.address.clone(),
            id: self.host.id,
            state: self.progress.current(),
            trail: self.progress.visited().to_vec(),
            error: self.progress.failure().map(|f| f.error.clone()),
        }
    }
}
