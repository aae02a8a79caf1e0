//! Rolling restart coordinator
//!
//! Drain, reboot, reconnect, uncordon, then health-gate one host. A failed
//! step aborts the restart; the configuration already applied stays.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use nixfleet_exec::RemoteExecutor;
use nixfleet_system::Kubectl;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::FleetSettings;
use crate::connect::{Connector, connect};
use crate::error::CoreError;
use crate::health::{HealthProber, HealthSignal};
use crate::host::Host;
use crate::state::HostState;

/// Stops the SSH daemon first so a reconnect cannot reach the host before it
/// goes down
pub const REBOOT_COMMAND: &str = "systemctl stop sshd && reboot";

/// How long to wait on the reboot command before closing the session anyway
pub const REBOOT_ISSUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Steps of a rolling restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPhase {
    Draining,
    Rebooting,
    Reconnecting,
    Uncordoning,
    HealthGating,
    Done,
}

impl RestartPhase {
    /// Host workflow state for this phase
    #[must_use]
    pub fn host_state(self) -> HostState {
        match self {
            RestartPhase::Draining => HostState::Draining,
            RestartPhase::Rebooting => HostState::Rebooting,
            RestartPhase::Reconnecting => HostState::Reconnecting,
            RestartPhase::Uncordoning => HostState::Uncordoning,
            RestartPhase::HealthGating => HostState::HealthGating,
            RestartPhase::Done => HostState::Done,
        }
    }
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RestartPhase::Draining => "draining",
            RestartPhase::Rebooting => "rebooting",
            RestartPhase::Reconnecting => "reconnecting",
            RestartPhase::Uncordoning => "uncordoning",
            RestartPhase::HealthGating => "health-gating",
            RestartPhase::Done => "done",
        };
        f.write_str(name)
    }
}

fn failed(phase: RestartPhase) -> impl FnOnce(CoreError) -> CoreError {
    move |e| CoreError::RestartFailed {
        phase,
        source: Box::new(e),
    }
}

/// Restart `host` into its new generation and return the fresh session
///
/// `session` is closed once the reboot is issued. `on_phase` is called as
/// each phase starts and once with `Done`. The final health gate waits on
/// every node in `cluster_nodes` as well as the host's own. With the cluster
/// disabled only the reboot and reconnect run.
///
/// # Errors
/// Returns `CoreError::RestartFailed` naming the phase that failed
#[instrument(skip_all, fields(host = %host.address, node = %host.id))]
pub async fn rolling_restart(
    host: &Host,
    session: Arc<dyn RemoteExecutor>,
    connector: &dyn Connector,
    settings: &FleetSettings,
    cluster_nodes: &[String],
    on_phase: &mut (dyn FnMut(RestartPhase) + Send),
) -> Result<Arc<dyn RemoteExecutor>, CoreError> {
    let node = host.node_name();
    let cluster = settings.cluster.enabled;

    if cluster {
        on_phase(RestartPhase::Draining);
        info!("draining");
        Kubectl::new(Arc::clone(&session))
            .drain(&node)
            .await
            .map_err(|e| failed(RestartPhase::Draining)(CoreError::UnexpectedRemote(e.to_string())))?;
    }

    on_phase(RestartPhase::Rebooting);
    info!("rebooting");
    match session.run_with_timeout(REBOOT_COMMAND, REBOOT_ISSUE_TIMEOUT).await {
        Ok(result) if !result.success() => {
            return Err(failed(RestartPhase::Rebooting)(CoreError::UnexpectedRemote(
                format!("`{REBOOT_COMMAND}` exited {}: {}", result.status, result.stderr.trim()),
            )));
        }
        Ok(_) => {}
        // the host dropping or stalling the session is the expected way for this to end
        Err(e) if e.is_retryable() => debug!(error = %e, "session dropped by reboot"),
        Err(e) => return Err(failed(RestartPhase::Rebooting)(e.into())),
    }
    if let Err(e) = session.close().await {
        debug!(error = %e, "closing session after reboot");
    }
    drop(session);
    tokio::time::sleep(settings.budgets.reboot_settle).await;

    on_phase(RestartPhase::Reconnecting);
    let session = connect(connector, host, &settings.budgets.connect)
        .await
        .map_err(failed(RestartPhase::Reconnecting))?;

    if cluster {
        on_phase(RestartPhase::Uncordoning);
        Kubectl::new(Arc::clone(&session))
            .uncordon(&node)
            .await
            .map_err(|e| {
                failed(RestartPhase::Uncordoning)(CoreError::UnexpectedRemote(e.to_string()))
            })?;
        info!("uncordoned");

        on_phase(RestartPhase::HealthGating);
        HealthProber::new(Arc::clone(&session), &settings.budgets, &settings.cluster)
            .wait_for_all(&HealthSignal::host_gate(&node, cluster_nodes, &settings.cluster))
            .await
            .map_err(failed(RestartPhase::HealthGating))?;
    }

    on_phase(RestartPhase::Done);
    Ok(session)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use nixfleet_exec::ExecError;
    use nixfleet_inventory::Vars;

    use super::*;
    use crate::config::{ClusterSettings, ProbeBudgets, RetryPolicy};
    use crate::connect::LIVENESS_COMMAND;
    use crate::host::GroupInfo;
    use crate::testing::MemoryExecutor;

    struct Reopen(Arc<MemoryExecutor>);

    #[async_trait]
    impl Connector for Reopen {
        async fn open(&self, _host: &Host) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
            Ok(self.0.clone())
        }
    }

    fn host() -> Host {
        Host::new(
            "10.0.0.5",
            Vars::new(),
            Arc::new(GroupInfo {
                name: "g".to_string(),
                channel: "nixos-24.11".to_string(),
                modules: vec![],
                vars: Vars::new(),
            }),
        )
    }

    fn settings(cluster: bool) -> FleetSettings {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        FleetSettings {
            cluster: ClusterSettings {
                enabled: cluster,
                storage: false,
                namespaces: vec![],
                ..ClusterSettings::default()
            },
            budgets: ProbeBudgets {
                connect: policy,
                node_ready: policy,
                storage: policy,
                rollout: policy,
                reboot_settle: Duration::ZERO,
            },
            ..FleetSettings::default()
        }
    }

    fn phases() -> (Arc<Mutex<Vec<RestartPhase>>>, impl FnMut(RestartPhase) + Send) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |phase| sink.lock().unwrap().push(phase))
    }

    #[tokio::test]
    async fn test_full_sequence() {
        let before = Arc::new(
            MemoryExecutor::default()
                .respond("kubectl drain", 0, "", "")
                .respond(REBOOT_COMMAND, 0, "", ""),
        );
        let after = Arc::new(
            MemoryExecutor::default()
                .respond(LIVENESS_COMMAND, 0, "n\n", "")
                .respond("kubectl uncordon", 0, "", "")
                .respond(
                    "kubectl get node",
                    0,
                    r#"{"status":{"conditions":[{"type":"Ready","status":"True"}]}}"#,
                    "",
                ),
        );
        let (seen, mut on_phase) = phases();
        let h = host();

        let session = rolling_restart(
            &h,
            before.clone(),
            &Reopen(after.clone()),
            &settings(true),
            &[],
            &mut on_phase,
        )
        .await
        .unwrap();

        assert_eq!(session.executor_type(), "memory");
        assert!(before.is_closed());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                RestartPhase::Draining,
                RestartPhase::Rebooting,
                RestartPhase::Reconnecting,
                RestartPhase::Uncordoning,
                RestartPhase::HealthGating,
                RestartPhase::Done,
            ]
        );
        assert_eq!(
            before.seen(),
            vec![
                format!("kubectl drain '{}' --ignore-daemonsets --delete-emptydir-data", h.id),
                REBOOT_COMMAND.to_string(),
            ]
        );
        assert_eq!(after.seen()[1], format!("kubectl uncordon '{}'", h.id));
    }

    #[tokio::test]
    async fn test_dropped_session_on_reboot_is_expected() {
        // no scripted reboot answer: the session reports a disconnect
        let before = Arc::new(MemoryExecutor::default());
        let after = Arc::new(MemoryExecutor::default().respond(LIVENESS_COMMAND, 0, "n\n", ""));
        let (seen, mut on_phase) = phases();

        rolling_restart(
            &host(),
            before.clone(),
            &Reopen(after),
            &settings(false),
            &[],
            &mut on_phase,
        )
        .await
        .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                RestartPhase::Rebooting,
                RestartPhase::Reconnecting,
                RestartPhase::Done
            ]
        );
        assert_eq!(before.seen(), vec![REBOOT_COMMAND.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reboot_is_abandoned() {
        let before = Arc::new(MemoryExecutor::default().stall_on(REBOOT_COMMAND));
        let after = Arc::new(MemoryExecutor::default().respond(LIVENESS_COMMAND, 0, "n\n", ""));
        let (seen, mut on_phase) = phases();
        let started = tokio::time::Instant::now();

        rolling_restart(
            &host(),
            before.clone(),
            &Reopen(after),
            &settings(false),
            &[],
            &mut on_phase,
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= REBOOT_ISSUE_TIMEOUT);
        assert!(before.is_closed());
        assert_eq!(seen.lock().unwrap().last(), Some(&RestartPhase::Done));
    }

    #[tokio::test]
    async fn test_unready_peer_node_fails_health_gate() {
        let h = host();
        let peer = "7f1c0b9e-peer".to_string();
        let before = Arc::new(
            MemoryExecutor::default()
                .respond("kubectl drain", 0, "", "")
                .respond(REBOOT_COMMAND, 0, "", ""),
        );
        let after = Arc::new(
            MemoryExecutor::default()
                .respond(LIVENESS_COMMAND, 0, "n\n", "")
                .respond("kubectl uncordon", 0, "", "")
                .respond(
                    &format!("kubectl get node '{peer}'"),
                    0,
                    r#"{"status":{"conditions":[{"type":"Ready","status":"False"}]}}"#,
                    "",
                )
                .respond(
                    "kubectl get node",
                    0,
                    r#"{"status":{"conditions":[{"type":"Ready","status":"True"}]}}"#,
                    "",
                ),
        );
        let (_, mut on_phase) = phases();

        let err = rolling_restart(
            &h,
            before,
            &Reopen(after.clone()),
            &settings(true),
            &[h.node_name(), peer.clone()],
            &mut on_phase,
        )
        .await
        .err()
        .unwrap();

        match err {
            CoreError::RestartFailed {
                phase: RestartPhase::HealthGating,
                source,
            } => assert!(matches!(*source, CoreError::Timeout { attempts: 2, .. })),
            other => panic!("unexpected error: {other}"),
        }
        let own_checks = after
            .seen()
            .iter()
            .filter(|c| c.starts_with(&format!("kubectl get node '{}'", h.id)))
            .count();
        let peer_checks = after.seen().iter().filter(|c| c.contains(&peer)).count();
        assert_eq!((own_checks, peer_checks), (1, 2));
    }

    #[tokio::test]
    async fn test_drain_failure_stops_before_reboot() {
        let before = Arc::new(MemoryExecutor::default().respond(
            "kubectl drain",
            1,
            "",
            "cannot evict pod as it would violate the pod's disruption budget",
        ));
        let after = Arc::new(MemoryExecutor::default());
        let (_, mut on_phase) = phases();

        let err = rolling_restart(
            &host(),
            before.clone(),
            &Reopen(after),
            &settings(true),
            &[],
            &mut on_phase,
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(
            err,
            CoreError::RestartFailed {
                phase: RestartPhase::Draining,
                ..
            }
        ));
        assert_eq!(before.seen().len(), 1);
        assert!(!before.is_closed());
    }
}
