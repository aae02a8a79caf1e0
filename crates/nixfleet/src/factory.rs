//! Session factory for reaching fleet hosts

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nixfleet_core::{Connector, Host};
use nixfleet_exec::{
    ExecError, KeySource, LoadedKey, LocalExecutor, RemoteExecutor, SshExecutor,
    SshExecutorBuilder,
};
use tokio::sync::OnceCell;

use crate::config::SshSettings;

/// Opens SSH sessions, or local ones for the control host itself
pub struct SshConnector {
    user: String,
    port: u16,
    key_source: KeySource,
    /// Loaded on the first SSH connect, then shared by every session
    key: OnceCell<LoadedKey>,
    connect_timeout: Duration,
}

impl SshConnector {
    /// Create a connector from SSH settings; `private_key` overrides the file's key
    #[must_use]
    pub fn new(settings: &SshSettings, private_key: Option<PathBuf>) -> Self {
        let private_key = private_key.or_else(|| settings.private_key.clone());
        let key_source = match (private_key, &settings.key_env) {
            (Some(path), _) => KeySource::Path(path),
            (None, Some(var)) => KeySource::Env(var.clone()),
            (None, None) => KeySource::DefaultIdentity,
        };

        Self {
            user: settings.user.clone(),
            port: settings.port,
            key_source,
            key: OnceCell::new(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }

    fn is_local(address: &str) -> bool {
        address == "localhost" || address == "127.0.0.1"
    }

    /// The private key, read and decoded on first use
    async fn key(&self) -> Result<LoadedKey, ExecError> {
        self.key
            .get_or_try_init(|| async {
                self.key_source
                    .load()
                    .map_err(|e| ExecError::SshKeyError(e.to_string()))
            })
            .await
            .cloned()
    }

    /// Build an unconnected SSH executor for `address`
    async fn executor(&self, address: &str) -> Result<SshExecutor, ExecError> {
        let key = self.key().await?;
        Ok(SshExecutorBuilder::new(address, &self.user)
            .with_port(self.port)
            .with_connect_timeout(self.connect_timeout)
            .build_with_key(key))
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn open(&self, host: &Host) -> Result<Arc<dyn RemoteExecutor>, ExecError> {
        if Self::is_local(&host.address) {
            return Ok(Arc::new(LocalExecutor::new()));
        }

        let executor = self.executor(&host.address).await?;
        executor.connect().await?;
        Ok(Arc::new(executor))
    }
}
