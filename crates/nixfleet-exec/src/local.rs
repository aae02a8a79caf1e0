//! Sessions on the control machine itself

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::result::CommandResult;
use crate::traits::RemoteExecutor;

/// Runs commands through `sh -c` and touches files directly
///
/// Used when a fleet host is the machine nixfleet runs on. There is no
/// connection, so closing is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn shell(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        let started = Instant::now();
        let output = Command::new("sh")
            .args(["-c", cmd])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ExecError::SpawnError(format!("sh: {e}")),
                _ => ExecError::IoError(e.to_string()),
            })?;

        // no exit code means a signal ended the shell
        let status = output.status.code().unwrap_or(-1);
        let result = CommandResult::from_output(status, &output.stdout, &output.stderr, started);
        debug!(command = %cmd, status, duration = ?result.duration, "local command finished");
        Ok(result)
    }
}

fn io_error(path: &str) -> impl Fn(std::io::Error) -> ExecError + '_ {
    move |e| match e.kind() {
        ErrorKind::NotFound => ExecError::NotFound(path.to_string()),
        _ => ExecError::IoError(format!("{path}: {e}")),
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.shell(cmd).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        limit: Duration,
    ) -> Result<CommandResult, ExecError> {
        timeout(limit, self.shell(cmd)).await.unwrap_or_else(|_| {
            warn!(command = %cmd, limit = ?limit, "local command timed out");
            Err(ExecError::Timeout { timeout: limit })
        })
    }

    async fn read_file(&self, path: &str) -> Result<String, ExecError> {
        tokio::fs::read_to_string(path).await.map_err(io_error(path))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), ExecError> {
        let staging = format!("{path}.nixfleet.tmp");
        tokio::fs::write(&staging, contents)
            .await
            .map_err(io_error(&staging))?;
        tokio::fs::rename(&staging, path)
            .await
            .map_err(io_error(path))?;
        debug!(path = %path, bytes = contents.len(), "wrote local file");
        Ok(())
    }

    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
