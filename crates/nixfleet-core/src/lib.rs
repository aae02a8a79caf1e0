//! nixfleet-core: Fleet orchestration engine
//!
//! Implements the per-host `HostActor` workflow (connect, diff and push,
//! rebuild with rollback, rolling restart, health gating) on top of kameo,
//! and the `FleetScheduler` that runs those workflows under a disruption
//! budget and folds their results into a `FleetReport`.

pub mod actor;
pub mod config;
pub mod connect;
pub mod differ;
pub mod error;
pub mod health;
pub mod host;
pub mod message;
pub mod rebuild;
pub mod render;
pub mod report;
pub mod restart;
pub mod retry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use actor::host::{HostActor, HostActorArgs};
pub use actor::scheduler::FleetScheduler;
pub use config::{ClusterSettings, FleetSettings, ProbeBudgets, RetryPolicy, RunMode};
pub use connect::{Connector, connect};
pub use differ::{ConfigDelta, FileChange, reconcile_config, restore_previous};
pub use error::CoreError;
pub use health::{HealthProber, HealthSignal};
pub use host::{Group, GroupInfo, Host, HostId};
pub use message::{GetStatus, HostStatus, Reconcile, Upgrade, WorkflowResult};
pub use rebuild::{RebuildOutcome, RebuildRequest, pin_channel, rebuild};
pub use render::{DesiredFile, RenderContext, TemplateDir, TemplateRenderer, render_desired};
pub use report::{FleetReport, HostReport, KernelChange, Outcome};
pub use restart::{RestartPhase, rolling_restart};
pub use retry::{Attempt, poll_until};
pub use state::{FailedStateContext, HostState, StateTrail};
