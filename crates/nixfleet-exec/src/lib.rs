//! nixfleet-exec: Transport sessions
//!
//! Provides the [`RemoteExecutor`] session trait plus SSH and local implementations
//! used to run commands and transfer files on fleet hosts.

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{KeyError, KeySource, LoadedKey};
pub use local::LocalExecutor;
pub use result::{CommandResult, SshEndpoint};
pub use ssh::{SshExecutor, SshExecutorBuilder};
pub use traits::{RemoteExecutor, shell_quote};
