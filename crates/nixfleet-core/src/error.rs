//! Core error types for nixfleet-core

use nixfleet_exec::ExecError;
use nixfleet_system::SystemError;
use thiserror::Error;

use crate::report::Outcome;
use crate::restart::RestartPhase;
use crate::state::HostState;

/// Errors that end a host workflow or a fleet-wide gate
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Connectivity budget exhausted
    #[error("host unreachable after {attempts} attempts: {last_error}")]
    Unreachable {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// Rebuild exited non-zero; changed files were restored
    #[error("rebuild failed with status {status}: {stderr}")]
    RebuildFailed {
        /// Exit status of the rebuild
        status: i32,
        /// Tail of the rebuild's error output
        stderr: String,
        /// Files that could not be restored
        rollback_failures: Vec<String>,
    },

    /// Pointing the host at its channel failed; nothing was changed
    #[error("channel pin failed: {0}")]
    ChannelPinFailed(String),

    /// A health signal was not satisfied within its budget
    #[error("timed out waiting for {what} after {attempts} attempts: {last}")]
    Timeout {
        /// Signal or condition that was awaited
        what: String,
        /// Attempts made
        attempts: u32,
        /// Why the final attempt was not satisfied
        last: String,
    },

    /// A remote command failed outside the classified cases
    #[error("unexpected remote error: {0}")]
    UnexpectedRemote(String),

    /// Writing a changed file failed; files written before it were restored
    #[error("failed to push {file}: {message}")]
    PushFailed {
        /// File whose write failed
        file: String,
        /// Transport error
        message: String,
        /// Files that could not be restored
        restore_failures: Vec<String>,
    },

    /// A rolling restart step failed
    #[error("restart failed while {phase}: {source}")]
    RestartFailed {
        /// Step that failed
        phase: RestartPhase,
        /// Underlying failure
        source: Box<CoreError>,
    },

    /// Template rendering failed
    #[error("template rendering failed: {0}")]
    Render(String),

    /// Staging an audit copy failed
    #[error("failed to stage artifact: {0}")]
    Artifact(String),

    /// Transport failure that is not transient
    #[error("execution error: {0}")]
    Exec(#[from] ExecError),

    /// Invalid state transition attempted
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: HostState,
        /// Attempted target state
        to: HostState,
    },

    /// Actor communication error
    #[error("actor communication error: {0}")]
    ActorError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<SystemError> for CoreError {
    fn from(e: SystemError) -> Self {
        match e {
            SystemError::Execution(e) => CoreError::Exec(e),
            other => CoreError::UnexpectedRemote(other.to_string()),
        }
    }
}

impl CoreError {
    /// Classify a workflow-ending error into the host's outcome
    ///
    /// Only failures whose previous configuration was fully restored count
    /// as rolled back.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            CoreError::RebuildFailed {
                rollback_failures, ..
            } if rollback_failures.is_empty() => Outcome::FailedAndRolledBack,
            CoreError::PushFailed {
                restore_failures, ..
            } if restore_failures.is_empty() => Outcome::FailedAndRolledBack,
            _ => Outcome::FailedUnrecoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let clean = CoreError::RebuildFailed {
            status: 1,
            stderr: String::new(),
            rollback_failures: vec![],
        };
        assert_eq!(clean.outcome(), Outcome::FailedAndRolledBack);

        let dirty = CoreError::RebuildFailed {
            status: 1,
            stderr: String::new(),
            rollback_failures: vec!["k3s.nix: disconnected".to_string()],
        };
        assert_eq!(dirty.outcome(), Outcome::FailedUnrecoverable);

        let restart = CoreError::RestartFailed {
            phase: RestartPhase::Draining,
            source: Box::new(CoreError::UnexpectedRemote("cannot evict".to_string())),
        };
        assert_eq!(restart.outcome(), Outcome::FailedUnrecoverable);
        assert_eq!(
            restart.to_string(),
            "restart failed while draining: unexpected remote error: cannot evict"
        );
    }

    #[test]
    fn test_from_system_error() {
        let transport: CoreError = SystemError::Execution(ExecError::NotConnected).into();
        assert!(matches!(transport, CoreError::Exec(ExecError::NotConnected)));

        let parse: CoreError = SystemError::ParseError("eof".to_string()).into();
        assert!(matches!(parse, CoreError::UnexpectedRemote(_)));
    }
}
