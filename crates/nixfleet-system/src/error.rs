//! Error types for nixfleet-system

use nixfleet_exec::ExecError;
use thiserror::Error;

/// Errors that can occur while driving a host's system tooling
#[derive(Error, Debug, Clone)]
pub enum SystemError {
    /// Transport failure underneath the command
    #[error("execution error: {0}")]
    Execution(#[from] ExecError),

    /// Command exited non-zero
    #[error("`{command}` failed: {status} - {message}")]
    CommandFailed {
        /// Command line that failed
        command: String,
        /// Exit status
        status: i32,
        /// Error output
        message: String,
    },

    /// Failed to parse command output
    #[error("parse error: {0}")]
    ParseError(String),
}

impl SystemError {
    /// Check if the transport underneath reported a transient condition
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SystemError::Execution(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if a status query answered with something other than a clean result
    ///
    /// Pollers treat these as "not yet" rather than as hard failures.
    #[must_use]
    pub fn is_unsettled_answer(&self) -> bool {
        matches!(
            self,
            SystemError::ParseError(_) | SystemError::CommandFailed { .. }
        )
    }
}
