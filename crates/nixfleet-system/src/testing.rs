//! Scripted executor for unit tests

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nixfleet_exec::{CommandResult, ExecError, RemoteExecutor};

/// Answers commands from a prefix table and records every command it saw
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    responses: Vec<(String, i32, String, String)>,
    pub(crate) commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub(crate) fn respond(mut self, prefix: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        self.responses
            .push((prefix.to_string(), status, stdout.to_string(), stderr.to_string()));
        self
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.commands.lock().unwrap().push(cmd.to_string());
        let (_, status, stdout, stderr) = self
            .responses
            .iter()
            .find(|(prefix, ..)| cmd.starts_with(prefix.as_str()))
            .ok_or_else(|| ExecError::Disconnected(format!("unscripted command: {cmd}")))?;
        Ok(CommandResult {
            status: *status,
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            duration: Duration::ZERO,
        })
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        _timeout: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.run(cmd).await
    }

    async fn write_file(&self, _path: &str, _contents: &str) -> Result<(), ExecError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ExecError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn executor_type(&self) -> &'static str {
        "scripted"
    }
}
