//! Remote executor trait

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::CommandResult;

/// One command/file-transfer session with a single host
///
/// A session is owned by exactly one host workflow. It must be closed before
/// the host reboots and a fresh one opened afterwards.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command and capture its exit status and output
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError>;

    /// Run a shell command, failing with `ExecError::Timeout` past `timeout`
    async fn run_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<CommandResult, ExecError>;

    /// Read a remote text file
    ///
    /// Fails with `ExecError::NotFound` when the file does not exist.
    async fn read_file(&self, path: &str) -> Result<String, ExecError> {
        let result = self.run(&format!("cat {}", shell_quote(path))).await?;
        if result.success() {
            Ok(result.stdout)
        } else if result.stderr.contains("No such file or directory") {
            Err(ExecError::NotFound(path.to_string()))
        } else {
            Err(ExecError::CommandFailed {
                status: result.status,
                stderr: result.stderr,
            })
        }
    }

    /// Replace a remote file with `contents`
    ///
    /// Implementations write to a sibling temporary file and rename it over
    /// `path`, so readers never observe a partially written file.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), ExecError>;

    /// Close the session; later calls fail with `ExecError::NotConnected`
    async fn close(&self) -> Result<(), ExecError>;

    /// Whether the session currently holds a live connection
    fn is_connected(&self) -> bool;

    /// Short name of the transport for logs
    fn executor_type(&self) -> &'static str;
}

/// Quote a string for POSIX `sh` using single quotes
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// Shell command that atomically replaces `path` with the data on stdin
#[must_use]
pub fn atomic_write_command(path: &str) -> String {
    let tmp = format!("{path}.nixfleet.tmp");
    format!(
        "cat > {tmp} && mv -f {tmp} {path}",
        tmp = shell_quote(&tmp),
        path = shell_quote(path)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/nixos/configuration.nix"), "'/etc/nixos/configuration.nix'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn test_atomic_write_command() {
        assert_eq!(
            atomic_write_command("/etc/nixos/k3s.nix"),
            "cat > '/etc/nixos/k3s.nix.nixfleet.tmp' && mv -f '/etc/nixos/k3s.nix.nixfleet.tmp' '/etc/nixos/k3s.nix'"
        );
    }
}
