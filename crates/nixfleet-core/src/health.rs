//! Cluster health prober

use std::fmt;
use std::sync::Arc;

use nixfleet_exec::RemoteExecutor;
use nixfleet_system::storage::HEALTH_OK;
use nixfleet_system::{CephClient, Kubectl, SystemError, WorkloadKind};
use tracing::{info, instrument};

use crate::config::{ClusterSettings, ProbeBudgets, RetryPolicy};
use crate::error::CoreError;
use crate::retry::{Attempt, poll_until};

/// A cluster-wide predicate evaluated by a live query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSignal {
    /// The named node reports a true `Ready` condition
    NodeReady(String),
    /// Storage reports `HEALTH_OK`
    StorageOk,
    /// Every resource of `kind` in `namespace` is fully available
    RolloutOk {
        namespace: String,
        kind: WorkloadKind,
    },
}

impl fmt::Display for HealthSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthSignal::NodeReady(node) => write!(f, "node {node} ready"),
            HealthSignal::StorageOk => write!(f, "storage healthy"),
            HealthSignal::RolloutOk { namespace, kind } => {
                write!(f, "{kind}s in {namespace} rolled out")
            }
        }
    }
}

impl HealthSignal {
    /// Signals that make up a health gate, in evaluation order
    ///
    /// Every node in `nodes` ready, then storage, then daemonsets in each
    /// namespace, then deployments in each namespace.
    #[must_use]
    pub fn gate<I, S>(nodes: I, cluster: &ClusterSettings) -> Vec<HealthSignal>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut signals: Vec<_> = nodes
            .into_iter()
            .map(|n| HealthSignal::NodeReady(n.into()))
            .collect();
        if cluster.storage {
            signals.push(HealthSignal::StorageOk);
        }
        for kind in [WorkloadKind::DaemonSet, WorkloadKind::Deployment] {
            for namespace in &cluster.namespaces {
                signals.push(HealthSignal::RolloutOk {
                    namespace: namespace.clone(),
                    kind,
                });
            }
        }
        signals
    }

    /// Gate after changing one host
    ///
    /// `own` first, then every other node in `cluster_nodes`, then the
    /// cluster-wide signals.
    #[must_use]
    pub fn host_gate(
        own: &str,
        cluster_nodes: &[String],
        cluster: &ClusterSettings,
    ) -> Vec<HealthSignal> {
        let others = cluster_nodes.iter().filter(|n| n.as_str() != own).cloned();
        Self::gate(std::iter::once(own.to_string()).chain(others), cluster)
    }
}

/// Polls health signals through one host's session
pub struct HealthProber {
    kubectl: Kubectl,
    ceph: CephClient,
    budgets: ProbeBudgets,
}

impl HealthProber {
    /// Create a prober querying through `session`
    pub fn new(
        session: Arc<dyn RemoteExecutor>,
        budgets: &ProbeBudgets,
        cluster: &ClusterSettings,
    ) -> Self {
        Self {
            kubectl: Kubectl::new(Arc::clone(&session)),
            ceph: CephClient::new(session, cluster.storage_namespace.clone()),
            budgets: budgets.clone(),
        }
    }

    /// Wait until `signal` holds
    ///
    /// Malformed output, failed status queries and transient transport
    /// errors are retried.
    ///
    /// # Errors
    /// Returns `CoreError::Timeout` once the signal's budget is exhausted
    #[instrument(skip_all, fields(signal = %signal))]
    pub async fn wait_for(&self, signal: &HealthSignal) -> Result<(), CoreError> {
        let what = signal.to_string();
        match signal {
            HealthSignal::NodeReady(node) => {
                let kubectl = &self.kubectl;
                self.poll(&self.budgets.node_ready, &what, move || async move {
                    Ok(if kubectl.node_ready(node).await? {
                        Attempt::Done(())
                    } else {
                        Attempt::Retry("not ready".to_string())
                    })
                })
                .await?;
            }
            HealthSignal::StorageOk => {
                let ceph = &self.ceph;
                self.poll(&self.budgets.storage, &what, move || async move {
                    let status = ceph.health_status().await?;
                    Ok(if status == HEALTH_OK {
                        Attempt::Done(())
                    } else {
                        Attempt::Retry(format!("ceph state is {status}"))
                    })
                })
                .await?;
            }
            HealthSignal::RolloutOk { namespace, kind } => {
                let kubectl = &self.kubectl;
                let kind = *kind;
                let healthy = self
                    .poll(&self.budgets.rollout, &what, move || async move {
                        let status = kubectl.rollout(namespace, kind).await?;
                        Ok(if status.is_ready() {
                            Attempt::Done(status.total)
                        } else {
                            Attempt::Retry(format!("waiting on {}", status.pending.join(", ")))
                        })
                    })
                    .await?;
                info!(healthy, "{kind}s healthy in namespace {namespace}");
                return Ok(());
            }
        }
        info!("{what}");
        Ok(())
    }

    /// Wait for each signal in turn
    ///
    /// # Errors
    /// Returns the first signal's `CoreError::Timeout`
    pub async fn wait_for_all(&self, signals: &[HealthSignal]) -> Result<(), CoreError> {
        for signal in signals {
            self.wait_for(signal).await?;
        }
        Ok(())
    }

    async fn poll<T, F, Fut>(&self, policy: &RetryPolicy, what: &str, mut query: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, SystemError>>,
    {
        poll_until(policy, what, |_| {
            let attempt = query();
            async move {
                match attempt.await {
                    Ok(answer) => Ok(answer),
                    Err(e) if e.is_unsettled_answer() || e.is_retryable() => {
                        Ok(Attempt::Retry(e.to_string()))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::MemoryExecutor;

    fn budgets(attempts: u32) -> ProbeBudgets {
        let policy = RetryPolicy::new(attempts, Duration::ZERO);
        ProbeBudgets {
            connect: policy,
            node_ready: policy,
            storage: policy,
            rollout: policy,
            reboot_settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_gate_order() {
        let cluster = ClusterSettings::default();
        let signals = HealthSignal::gate(["a", "b"], &cluster);

        assert_eq!(
            signals,
            vec![
                HealthSignal::NodeReady("a".to_string()),
                HealthSignal::NodeReady("b".to_string()),
                HealthSignal::StorageOk,
                HealthSignal::RolloutOk {
                    namespace: "kube-system".to_string(),
                    kind: WorkloadKind::DaemonSet
                },
                HealthSignal::RolloutOk {
                    namespace: "default".to_string(),
                    kind: WorkloadKind::DaemonSet
                },
                HealthSignal::RolloutOk {
                    namespace: "kube-system".to_string(),
                    kind: WorkloadKind::Deployment
                },
                HealthSignal::RolloutOk {
                    namespace: "default".to_string(),
                    kind: WorkloadKind::Deployment
                },
            ]
        );
    }

    #[test]
    fn test_gate_without_storage() {
        let cluster = ClusterSettings {
            storage: false,
            namespaces: vec![],
            ..ClusterSettings::default()
        };
        assert_eq!(
            HealthSignal::gate(["a"], &cluster),
            vec![HealthSignal::NodeReady("a".to_string())]
        );
    }

    #[test]
    fn test_host_gate_covers_every_node() {
        let cluster = ClusterSettings {
            storage: false,
            namespaces: vec![],
            ..ClusterSettings::default()
        };
        let nodes = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        assert_eq!(
            HealthSignal::host_gate("b", &nodes, &cluster),
            vec![
                HealthSignal::NodeReady("b".to_string()),
                HealthSignal::NodeReady("a".to_string()),
                HealthSignal::NodeReady("c".to_string()),
            ]
        );
        assert_eq!(
            HealthSignal::host_gate("z", &[], &cluster),
            vec![HealthSignal::NodeReady("z".to_string())]
        );
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried_until_timeout() {
        let session = Arc::new(MemoryExecutor::default().respond(
            "kubectl -n 'rook-ceph' exec",
            0,
            "Defaulted container \"rook-ceph-tools\" out of: ...",
            "",
        ));
        let prober = HealthProber::new(session.clone(), &budgets(4), &ClusterSettings::default());

        let err = prober.wait_for(&HealthSignal::StorageOk).await.unwrap_err();

        assert!(matches!(err, CoreError::Timeout { attempts: 4, .. }));
        assert_eq!(session.seen().len(), 4);
    }

    #[tokio::test]
    async fn test_single_unhealthy_deployment_blocks() {
        let session = Arc::new(MemoryExecutor::default().respond(
            "kubectl get deployment",
            0,
            r#"{"items":[
                {"metadata":{"name":"ok"},"spec":{"replicas":1},"status":{"availableReplicas":1,
                 "conditions":[{"type":"Available","status":"True","reason":"MinimumReplicasAvailable"}]}},
                {"metadata":{"name":"stuck"},"spec":{"replicas":2},"status":{"availableReplicas":1,
                 "conditions":[{"type":"Available","status":"True","reason":"MinimumReplicasAvailable"}]}}]}"#,
            "",
        ));
        let prober = HealthProber::new(session, &budgets(3), &ClusterSettings::default());

        let err = prober
            .wait_for(&HealthSignal::RolloutOk {
                namespace: "default".to_string(),
                kind: WorkloadKind::Deployment,
            })
            .await
            .unwrap_err();

        match err {
            CoreError::Timeout { last, .. } => assert_eq!(last, "waiting on stuck"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ready_node_passes() {
        let session = Arc::new(MemoryExecutor::default().respond(
            "kubectl get node",
            0,
            r#"{"status":{"conditions":[{"type":"Ready","status":"True","reason":"KubeletReady"}]}}"#,
            "",
        ));
        let prober = HealthProber::new(session, &budgets(1), &ClusterSettings::default());

        prober
            .wait_for(&HealthSignal::NodeReady("n1".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_transient_transport_error_is_fatal() {
        struct Closed;

        #[async_trait::async_trait]
        impl RemoteExecutor for Closed {
            async fn run(&self, _cmd: &str) -> Result<nixfleet_exec::CommandResult, nixfleet_exec::ExecError> {
                Err(nixfleet_exec::ExecError::NotConnected)
            }
            async fn run_with_timeout(
                &self,
                cmd: &str,
                _timeout: Duration,
            ) -> Result<nixfleet_exec::CommandResult, nixfleet_exec::ExecError> {
                self.run(cmd).await
            }
            async fn write_file(&self, _path: &str, _contents: &str) -> Result<(), nixfleet_exec::ExecError> {
                Err(nixfleet_exec::ExecError::NotConnected)
            }
            async fn close(&self) -> Result<(), nixfleet_exec::ExecError> {
                Ok(())
            }
            fn is_connected(&self) -> bool {
                false
            }
            fn executor_type(&self) -> &'static str {
                "closed"
            }
        }

        let prober = HealthProber::new(Arc::new(Closed), &budgets(5), &ClusterSettings::default());

        let err = prober.wait_for(&HealthSignal::StorageOk).await.unwrap_err();

        assert!(matches!(err, CoreError::Exec(nixfleet_exec::ExecError::NotConnected)));
    }
}
