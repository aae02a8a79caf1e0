//! Host workflow state machine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::error::CoreError;

/// States of a `HostActor` workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostState {
    Idle,
    Connecting,
    PinningChannel,
    Diffing,
    Rebuilding,
    RollingBack,
    Draining,
    Rebooting,
    Reconnecting,
    Uncordoning,
    HealthGating,
    Done,
    Failed,
}

impl HostState {
    /// Whether the workflow may move from `self` to `to`
    ///
    /// Any non-terminal state may fail. `Done` and `Failed` are terminal.
    #[must_use]
    pub fn can_transition_to(self, to: HostState) -> bool {
        use HostState::{
            Connecting, Diffing, Done, Draining, Failed, HealthGating, Idle, PinningChannel,
            Rebooting, Rebuilding, Reconnecting, RollingBack, Uncordoning,
        };

        if to == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, PinningChannel | Diffing)
                | (PinningChannel, Diffing)
                | (Diffing, Rebuilding | RollingBack | Done)
                | (
                    Rebuilding,
                    RollingBack | Draining | Rebooting | HealthGating | Done
                )
                | (Draining, Rebooting)
                | (Rebooting, Reconnecting)
                | (Reconnecting, Uncordoning | Done)
                | (Uncordoning, HealthGating)
                | (HealthGating, Done)
        )
    }

    /// `Done` or `Failed`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, HostState::Done | HostState::Failed)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Idle => "idle",
            HostState::Connecting => "connecting",
            HostState::PinningChannel => "pinning-channel",
            HostState::Diffing => "diffing",
            HostState::Rebuilding => "rebuilding",
            HostState::RollingBack => "rolling-back",
            HostState::Draining => "draining",
            HostState::Rebooting => "rebooting",
            HostState::Reconnecting => "reconnecting",
            HostState::Uncordoning => "uncordoning",
            HostState::HealthGating => "health-gating",
            HostState::Done => "done",
            HostState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Failed state details
#[derive(Debug, Clone, Serialize)]
pub struct FailedStateContext {
    /// State the workflow was in when it failed
    pub previous_state: HostState,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedStateContext {
    #[must_use]
    pub fn new(previous_state: HostState, error: impl Into<String>) -> Self {
        Self {
            previous_state,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Current state plus every state visited, starting at `Idle`
#[derive(Debug, Clone)]
pub struct StateTrail {
    current: HostState,
    visited: Vec<HostState>,
    failure: Option<FailedStateContext>,
}

impl Default for StateTrail {
    fn default() -> Self {
        Self {
            current: HostState::Idle,
            visited: vec![HostState::Idle],
            failure: None,
        }
    }
}

impl StateTrail {
    #[must_use]
    pub fn current(&self) -> HostState {
        self.current
    }

    #[must_use]
    pub fn visited(&self) -> &[HostState] {
        &self.visited
    }

    #[must_use]
    pub fn failure(&self) -> Option<&FailedStateContext> {
        self.failure.as_ref()
    }

    /// Move to `to`, validating the transition
    ///
    /// # Errors
    /// Returns `CoreError::InvalidTransition` if the move is not allowed
    pub fn advance(&mut self, to: HostState) -> Result<(), CoreError> {
        if !self.current.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.current,
                to,
            });
        }

        info!(from = %self.current, to = %to, "state transition");
        self.current = to;
        self.visited.push(to);
        Ok(())
    }

    /// Enter `Failed`, keeping the error and the state it interrupted
    pub fn fail(&mut self, error: &CoreError) {
        let previous = self.current;
        if previous.is_terminal() {
            return;
        }

        error!(previous_state = %previous, error = %error, "host entered failed state");
        self.failure = Some(FailedStateContext::new(previous, error.to_string()));
        self.current = HostState::Failed;
        self.visited.push(HostState::Failed);
    }
}
