//! nixfleet-system: Remote system vocabulary
//!
//! Commands and output parsing for the pieces of a host nixfleet drives:
//! NixOS rebuilds and channels, kubectl node and workload state, and Ceph health.

pub mod error;
pub mod kube;
pub mod nixos;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::SystemError;
pub use kube::Kubectl;
pub use nixos::NixosManager;
pub use storage::CephClient;
pub use types::{RestartPolicy, RolloutStatus, UpgradeActivity, WorkloadKind};
