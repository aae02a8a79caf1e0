//! Command results and SSH endpoints

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Exit status, captured output and wall time of one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status (0 for success, -1 when killed by a signal)
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    /// Build a result from raw output collected since `started`
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    #[must_use]
    pub fn from_output(status: i32, stdout: &[u8], stderr: &[u8], started: Instant) -> Self {
        Self {
            status,
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            duration: started.elapsed(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stdout followed by stderr, newline-separated when both are present
    #[must_use]
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Where and as whom an SSH session logs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Limit for one TCP connect plus SSH handshake
    pub connect_timeout: Duration,
}

impl SshEndpoint {
    pub const DEFAULT_PORT: u16 = 22;
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            user: user.into(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}
