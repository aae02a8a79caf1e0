//! In-memory session for unit tests

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nixfleet_exec::{CommandResult, ExecError, RemoteExecutor};

/// Answers commands from a prefix table, keeps files in a map
#[derive(Default)]
pub(crate) struct MemoryExecutor {
    responses: Vec<(String, i32, String, String)>,
    files: Mutex<BTreeMap<String, String>>,
    failing_writes: Mutex<HashSet<String>>,
    /// Commands that never return
    stalls: Vec<String>,
    commands: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MemoryExecutor {
    pub(crate) fn respond(mut self, prefix: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        self.responses
            .push((prefix.to_string(), status, stdout.to_string(), stderr.to_string()));
        self
    }

    pub(crate) fn with_file(self, path: &str, contents: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
        self
    }

    pub(crate) fn fail_writes_to(self, path: &str) -> Self {
        self.failing_writes.lock().unwrap().insert(path.to_string());
        self
    }

    pub(crate) fn stall_on(mut self, prefix: &str) -> Self {
        self.stalls.push(prefix.to_string());
        self
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for MemoryExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.commands.lock().unwrap().push(cmd.to_string());
        if self.stalls.iter().any(|prefix| cmd.starts_with(prefix.as_str())) {
            std::future::pending::<()>().await;
        }
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
        limit: Duration,
    ) -> Result<CommandResult, ExecError> {
        tokio::time::timeout(limit, self.run(cmd))
            .await
            .unwrap_or(Err(ExecError::Timeout { timeout: limit }))
    }

    async fn read_file(&self, path: &str) -> Result<String, ExecError> {
        self.file(path)
            .ok_or_else(|| ExecError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), ExecError> {
        if self.failing_writes.lock().unwrap().contains(path) {
            return Err(ExecError::Disconnected(format!("write to {path}")));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), ExecError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }

    fn executor_type(&self) -> &'static str {
        "memory"
    }
}
