//! SSH private key loading
//!
//! Keys are decoded once, when an executor is built, and shared in memory by
//! every connect attempt. Nothing is written to disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use russh::keys::decode_secret_key;
use russh::keys::ssh_key::PrivateKey;
use tracing::debug;

/// Identity files probed under `~/.ssh` when no key is configured
const DEFAULT_IDENTITIES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// Where an executor's private key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// OpenSSH private key file
    Path(PathBuf),
    /// Environment variable holding a base64-encoded private key
    Env(String),
    /// First of the usual identity files in `~/.ssh`
    DefaultIdentity,
}

impl KeySource {
    /// Read and decode the key
    ///
    /// Key files must not be readable by group or others.
    ///
    /// # Errors
    /// Returns `KeyError` if the key is missing, too exposed or malformed
    pub fn load(&self) -> Result<LoadedKey, KeyError> {
        match self {
            KeySource::Path(path) => load_file(path),
            KeySource::Env(var) => {
                let encoded = std::env::var(var).map_err(|_| KeyError::EnvNotSet(var.clone()))?;
                let key = decode_env_key(&encoded)?;
                Ok(LoadedKey::new(format!("${var}"), key))
            }
            KeySource::DefaultIdentity => {
                let ssh_dir = dirs::home_dir()
                    .map(|home| home.join(".ssh"))
                    .ok_or_else(|| KeyError::NotFound("home directory".to_string()))?;
                load_file(&find_identity(&ssh_dir)?)
            }
        }
    }
}

/// A decoded private key and where it came from
#[derive(Clone)]
pub struct LoadedKey {
    origin: String,
    key: Arc<PrivateKey>,
}

impl LoadedKey {
    fn new(origin: String, key: PrivateKey) -> Self {
        debug!(origin = %origin, algorithm = %key.algorithm(), "loaded SSH key");
        Self {
            origin,
            key: Arc::new(key),
        }
    }

    /// File path or `$VAR` the key was read from
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Shared handle to the key
    #[must_use]
    pub fn private_key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }
}

impl fmt::Debug for LoadedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedKey")
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Key loading errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("cannot decode private key from {origin}: {reason}")]
    Malformed { origin: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn load_file(path: &Path) -> Result<LoadedKey, KeyError> {
    check_permissions(path)?;
    let origin = path.display().to_string();
    let text = std::fs::read_to_string(path)?;
    let key = decode_secret_key(&text, None).map_err(|e| KeyError::Malformed {
        origin: origin.clone(),
        reason: e.to_string(),
    })?;
    Ok(LoadedKey::new(origin, key))
}

/// Decode the base64 value of a key variable into a private key
fn decode_env_key(encoded: &str) -> Result<PrivateKey, KeyError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| KeyError::InvalidBase64)?;
    let text = String::from_utf8(bytes).map_err(|_| KeyError::InvalidBase64)?;
    decode_secret_key(&text, None).map_err(|e| KeyError::Malformed {
        origin: "environment".to_string(),
        reason: e.to_string(),
    })
}

fn find_identity(ssh_dir: &Path) -> Result<PathBuf, KeyError> {
    DEFAULT_IDENTITIES
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            KeyError::NotFound(format!(
                "no identity in {} (tried {})",
                ssh_dir.display(),
                DEFAULT_IDENTITIES.join(", ")
            ))
        })
}

fn check_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => KeyError::NotFound(path.display().to_string()),
        _ => KeyError::Io(e),
    })?;

    if metadata.permissions().mode() & 0o077 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }
    Ok(())
}
