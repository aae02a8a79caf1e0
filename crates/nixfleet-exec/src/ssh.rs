//! SSH sessions over russh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::PrivateKeyWithHashAlg;
use russh::keys::ssh_key;
use russh::{ChannelMsg, Disconnect, client};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::keys::{KeySource, LoadedKey};
use crate::result::{CommandResult, SshEndpoint};
use crate::traits::{RemoteExecutor, atomic_write_command};

/// Accepts whatever host key the server presents
///
/// Fleet hosts are reinstalled and rekeyed routinely.
struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

type Session = client::Handle<AcceptAnyHostKey>;

/// Interval between keepalive requests on an idle session
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Unanswered keepalives before the session is declared dead
const KEEPALIVE_MAX: usize = 3;

/// Client settings for every session
///
/// Keepalives catch a peer that vanished without closing TCP, such as a
/// host powering off mid-command.
fn session_config() -> client::Config {
    client::Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        ..client::Config::default()
    }
}

fn dropped(e: impl std::fmt::Display) -> ExecError {
    ExecError::Disconnected(e.to_string())
}

/// Empty `slot` when `result` shows its session is gone, so the next command
/// redoes the handshake; true if the slot was emptied
fn forget_lost_session<S>(
    slot: &mut Option<S>,
    result: &Result<CommandResult, ExecError>,
) -> bool {
    if matches!(result, Err(ExecError::Disconnected(_))) && slot.is_some() {
        *slot = None;
        return true;
    }
    false
}

/// Output gathered from one exec channel
#[derive(Default)]
struct ChannelOutput {
    status: Option<u32>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ChannelOutput {
    /// Take one channel message; false once the channel is gone
    fn absorb(&mut self, msg: Option<ChannelMsg>) -> bool {
        match msg {
            Some(ChannelMsg::Data { data }) => self.stdout.extend_from_slice(&data),
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                self.stderr.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => self.status = Some(exit_status),
            Some(ChannelMsg::Close) | None => return false,
            Some(_) => {}
        }
        true
    }

    fn finish(self, cmd: &str, started: Instant) -> Result<CommandResult, ExecError> {
        // a reboot or a dying sshd closes the channel before any exit status
        let status = self
            .status
            .ok_or_else(|| dropped(format!("channel closed without exit status: {cmd}")))?;
        Ok(CommandResult::from_output(
            status.cast_signed(),
            &self.stdout,
            &self.stderr,
            started,
        ))
    }
}

/// One SSH session to one host
///
/// Connects on [`SshExecutor::connect`] or the first command, and stays
/// connected until [`RemoteExecutor::close`]. Commands on one session run
/// one at a time.
pub struct SshExecutor {
    endpoint: SshEndpoint,
    key: LoadedKey,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for SshExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshExecutor")
            .field("endpoint", &self.endpoint)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl SshExecutor {
    /// Create an unconnected executor, loading the key from `key_source`
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if the key cannot be loaded
    pub fn new(endpoint: SshEndpoint, key_source: &KeySource) -> Result<Self, ExecError> {
        let key = key_source
            .load()
            .map_err(|e| ExecError::SshKeyError(e.to_string()))?;
        Ok(Self::with_key(endpoint, key))
    }

    /// Create an unconnected executor sharing an already loaded key
    #[must_use]
    pub fn with_key(endpoint: SshEndpoint, key: LoadedKey) -> Self {
        Self {
            endpoint,
            key,
            session: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &SshEndpoint {
        &self.endpoint
    }

    /// Open and authenticate the session if it is not open yet
    ///
    /// Refused, unroutable and timed-out connects are retryable errors; a
    /// rejected key is not.
    ///
    /// # Errors
    /// Returns `ExecError` if connecting or authenticating fails
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn connect(&self) -> Result<(), ExecError> {
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_none_or(Session::is_closed) {
            let session = self.handshake().await?;
            info!(key = %self.key.origin(), "SSH session open");
            *slot = Some(session);
        }
        Ok(())
    }

    async fn handshake(&self) -> Result<Session, ExecError> {
        let limit = self.endpoint.connect_timeout;
        let addr = (self.endpoint.host.as_str(), self.endpoint.port);

        let mut session = timeout(
            limit,
            client::connect(Arc::new(session_config()), addr, AcceptAnyHostKey),
        )
        .await
        .map_err(|_| ExecError::Timeout { timeout: limit })?
        .map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        let hash_alg = session
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        let auth = session
            .authenticate_publickey(
                &self.endpoint.user,
                PrivateKeyWithHashAlg::new(self.key.private_key(), hash_alg),
            )
            .await
            .map_err(dropped)?;

        if !auth.success() {
            return Err(ExecError::AuthenticationFailed(format!(
                "{} rejected key {}",
                self.endpoint,
                self.key.origin()
            )));
        }
        Ok(session)
    }

    /// Run `cmd` on a fresh channel, writing `stdin` to it first if given
    ///
    /// A session lost mid-command is dropped; the next command reconnects.
    async fn exec(&self, cmd: &str, stdin: Option<&[u8]>) -> Result<CommandResult, ExecError> {
        self.connect().await?;
        let mut slot = self.session.lock().await;
        let session = slot.as_ref().ok_or(ExecError::NotConnected)?;

        let result = run_channel(session, cmd, stdin).await;
        if forget_lost_session(&mut *slot, &result) {
            warn!(endpoint = %self.endpoint, command = %cmd, "SSH session lost");
        }
        result
    }
}

async fn run_channel(
    session: &Session,
    cmd: &str,
    stdin: Option<&[u8]>,
) -> Result<CommandResult, ExecError> {
    let started = Instant::now();
    let mut channel = session.channel_open_session().await.map_err(dropped)?;
    channel.exec(true, cmd).await.map_err(dropped)?;
    if let Some(data) = stdin {
        channel.data(data).await.map_err(dropped)?;
        channel.eof().await.map_err(dropped)?;
    }

    // exit-status can follow EOF, so read until the channel closes
    let mut output = ChannelOutput::default();
    while output.absorb(channel.wait().await) {}

    let result = output.finish(cmd, started)?;
    debug!(command = %cmd, status = result.status, duration = ?result.duration, "ssh command finished");
    Ok(result)
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, cmd: &str) -> Result<CommandResult, ExecError> {
        self.exec(cmd, None).await
    }

    async fn run_with_timeout(
        &self,
        cmd: &str,
        limit: Duration,
    ) -> Result<CommandResult, ExecError> {
        self.connect().await?;
        timeout(limit, self.exec(cmd, None)).await.unwrap_or_else(|_| {
            warn!(command = %cmd, limit = ?limit, "ssh command timed out");
            Err(ExecError::Timeout { timeout: limit })
        })
    }

    #[instrument(skip(self, contents), fields(endpoint = %self.endpoint, bytes = contents.len()))]
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), ExecError> {
        let result = self
            .exec(&atomic_write_command(path), Some(contents.as_bytes()))
            .await?;

        if result.success() {
            Ok(())
        } else {
            Err(ExecError::CommandFailed {
                status: result.status,
                stderr: result.stderr,
            })
        }
    }

    async fn close(&self) -> Result<(), ExecError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;
        info!(endpoint = %self.endpoint, "SSH session closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        // a held lock means a command is running on an open session
        self.session
            .try_lock()
            .map_or(true, |s| s.as_ref().is_some_and(|session| !session.is_closed()))
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}

/// Builder for [`SshExecutor`]; the key defaults to the usual `~/.ssh` identities
pub struct SshExecutorBuilder {
    endpoint: SshEndpoint,
    key: KeySource,
}

impl SshExecutorBuilder {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            endpoint: SshEndpoint::new(host, user),
            key: KeySource::DefaultIdentity,
        }
    }

    /// Use the private key file at `path`
    #[must_use]
    pub fn with_key_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            key: KeySource::Path(path.into()),
            ..self
        }
    }

    /// Use a base64-encoded private key from the environment variable `var`
    #[must_use]
    pub fn with_env_key(self, var: impl Into<String>) -> Self {
        Self {
            key: KeySource::Env(var.into()),
            ..self
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.endpoint.port = port;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, limit: Duration) -> Self {
        self.endpoint.connect_timeout = limit;
        self
    }

    /// Load the key and create the executor, without connecting
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if the key cannot be loaded
    pub fn build(self) -> Result<SshExecutor, ExecError> {
        SshExecutor::new(self.endpoint, &self.key)
    }

    /// Create the executor with `key`, ignoring the configured key source
    #[must_use]
    pub fn build_with_key(self, key: LoadedKey) -> SshExecutor {
        SshExecutor::with_key(self.endpoint, key)
    }
}
