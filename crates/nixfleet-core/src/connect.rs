//! Connectivity prober

use std::sync::Arc;

use async_trait::async_trait;
use nixfleet_exec::{ExecError, RemoteExecutor};
use tracing::{info, instrument};

use crate::config::RetryPolicy;
use crate::error::CoreError;
use crate::host::Host;
use crate::retry::{Attempt, poll_until};

/// Command used to confirm a fresh session accepts commands
pub const LIVENESS_COMMAND: &str = "hostname";

/// Opens transport sessions to hosts
///
/// One call is one attempt; retrying is the prober's job.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open an authenticated session to `host`
    async fn open(&self, host: &Host) -> Result<Arc<dyn RemoteExecutor>, ExecError>;
}

/// Open a session to `host` that has answered a liveness command
///
/// Transient transport failures (refused, unroutable, timed out, EOF) are
/// retried within `policy`; anything else is returned at once.
///
/// # Errors
/// Returns `CoreError::Unreachable` when the budget is exhausted, or
/// `CoreError::Exec` for a non-transient failure
#[instrument(skip_all, fields(host = %host.address))]
pub async fn connect(
    connector: &dyn Connector,
    host: &Host,
    policy: &RetryPolicy,
) -> Result<Arc<dyn RemoteExecutor>, CoreError> {
    let result = poll_until(policy, "connection", move |_| async move {
        match open_and_probe(connector, host).await {
            Ok(session) => Ok(Attempt::Done(session)),
            Err(e) if e.is_retryable() => Ok(Attempt::Retry(e.to_string())),
            Err(e) => Err(CoreError::Exec(e)),
        }
    })
    .await;

    match result {
        Ok(session) => {
            info!(transport = session.executor_type(), "host is reachable");
            Ok(session)
        }
        Err(CoreError::Timeout { attempts, last, .. }) => Err(CoreError::Unreachable {
            attempts,
            last_error: last,
        }),
        Err(e) => Err(e),
    }
}

async fn open_and_probe(
    connector: &dyn Connector,
    host: &Host,
) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
    let session = connector.open(host).await?;

    match session.run(LIVENESS_COMMAND).await {
        Ok(result) if result.success() => Ok(session),
        Ok(result) => {
            let _ = session.close().await;
            Err(ExecError::CommandFailed {
                status: result.status,
                stderr: result.stderr,
            })
        }
        Err(e) => {
            let _ = session.close().await;
            Err(e)
        }
    }
}
