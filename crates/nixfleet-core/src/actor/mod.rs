//! Actor implementations

pub mod host;
pub mod scheduler;

pub use host::{HostActor, HostActorArgs};
pub use scheduler::FleetScheduler;
