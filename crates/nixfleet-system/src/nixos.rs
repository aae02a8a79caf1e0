//! NixOS rebuild and channel management

use std::sync::{Arc, LazyLock};

use nixfleet_exec::{CommandResult, RemoteExecutor, shell_quote};
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::error::SystemError;
use crate::types::{RestartPolicy, UpgradeActivity};

/// Where NixOS reads its system configuration from
pub const DEFAULT_CONFIG_DIR: &str = "/etc/nixos";

/// Base URL channels are resolved against
pub const CHANNEL_BASE_URL: &str = "https://nixos.org/channels";

static PATHS_FETCHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:these (\d+) paths|this path) will be fetched").expect("static regex")
});

static DERIVATIONS_BUILT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:these (\d+) derivations|this derivation) will be built").expect("static regex")
});

/// Drives `nixos-rebuild` and `nix-channel` on one host
pub struct NixosManager {
    executor: Arc<dyn RemoteExecutor>,
}

impl NixosManager {
    /// Create a new manager over a host session
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    /// Build the rebuild command line
    #[must_use]
    pub fn rebuild_command(policy: RestartPolicy, upgrade: bool) -> String {
        if upgrade {
            format!("nixos-rebuild {} --upgrade", policy.rebuild_action())
        } else {
            format!("nixos-rebuild {}", policy.rebuild_action())
        }
    }

    /// Build the command that points the `nixos` channel at `channel`
    #[must_use]
    pub fn channel_command(channel: &str) -> String {
        format!(
            "nix-channel --add {} nixos",
            shell_quote(&format!("{CHANNEL_BASE_URL}/{channel}"))
        )
    }

    /// Point the host's `nixos` channel at `channel`
    ///
    /// # Errors
    /// Returns `SystemError::CommandFailed` on a non-zero exit
    #[instrument(skip(self))]
    pub async fn pin_channel(&self, channel: &str) -> Result<(), SystemError> {
        let cmd = Self::channel_command(channel);
        let result = self.executor.run(&cmd).await?;

        if !result.success() {
            return Err(SystemError::CommandFailed {
                command: cmd,
                status: result.status,
                message: result.combined_output(),
            });
        }

        info!(channel = %channel, "channel pinned");
        Ok(())
    }

    /// Run the rebuild and hand back its raw result, successful or not
    ///
    /// The caller owns the decision on what a non-zero exit means.
    ///
    /// # Errors
    /// Returns `SystemError::Execution` only when the transport fails
    #[instrument(skip(self))]
    pub async fn rebuild(
        &self,
        policy: RestartPolicy,
        upgrade: bool,
    ) -> Result<CommandResult, SystemError> {
        let cmd = Self::rebuild_command(policy, upgrade);
        debug!(command = %cmd, "starting rebuild");

        let result = self.executor.run(&cmd).await?;

        debug!(
            status = result.status,
            duration = ?result.duration,
            "rebuild finished"
        );
        Ok(result)
    }

    /// Currently running kernel release (`uname -r`)
    ///
    /// # Errors
    /// Returns `SystemError` if the command cannot run or fails
    pub async fn kernel_release(&self) -> Result<String, SystemError> {
        let result = self.executor.run("uname -r").await?;
        if !result.success() {
            return Err(SystemError::CommandFailed {
                command: "uname -r".to_string(),
                status: result.status,
                message: result.stderr,
            });
        }
        Ok(result.stdout.trim().to_string())
    }

    /// Scan rebuild output for fetched paths and built derivations
    #[must_use]
    pub fn parse_upgrade_activity(output: &str) -> UpgradeActivity {
        UpgradeActivity {
            paths_fetched: count_marker(&PATHS_FETCHED, output),
            derivations_built: count_marker(&DERIVATIONS_BUILT, output),
        }
    }
}

fn count_marker(marker: &Regex, output: &str) -> Option<u32> {
    let caps = marker.captures(output)?;
    // the singular form has no count group
    Some(
        caps.get(1)
            .and_then(|n| n.as_str().parse().ok())
            .unwrap_or(1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;

    #[test]
    fn test_rebuild_command() {
        assert_eq!(
            NixosManager::rebuild_command(RestartPolicy::ApplyOnly, false),
            "nixos-rebuild switch"
        );
        assert_eq!(
            NixosManager::rebuild_command(RestartPolicy::ApplyAndMakeDefault, true),
            "nixos-rebuild boot --upgrade"
        );
    }

    #[test]
    fn test_channel_command() {
        assert_eq!(
            NixosManager::channel_command("nixos-24.11"),
            "nix-channel --add 'https://nixos.org/channels/nixos-24.11' nixos"
        );
    }

    #[test]
    fn test_parse_upgrade_activity() {
        let stderr = r"building the system configuration...
these 4 derivations will be built:
  /nix/store/abc-etc.drv
these 112 paths will be fetched (250.31 MiB download, 1201.12 MiB unpacked):
  /nix/store/def-linux-6.6.30";

        let activity = NixosManager::parse_upgrade_activity(stderr);

        assert_eq!(activity.derivations_built, Some(4));
        assert_eq!(activity.paths_fetched, Some(112));
        assert!(!activity.is_noop());
    }

    #[test]
    fn test_parse_upgrade_activity_singular() {
        let stderr = "this path will be fetched (0.01 MiB download):\n  /nix/store/x";

        let activity = NixosManager::parse_upgrade_activity(stderr);

        assert_eq!(activity.paths_fetched, Some(1));
        assert_eq!(activity.derivations_built, None);
    }

    #[test]
    fn test_parse_upgrade_activity_noop() {
        let stderr = "building the system configuration...\nupdating GRUB 2 menu...";
        assert!(NixosManager::parse_upgrade_activity(stderr).is_noop());
    }

    #[tokio::test]
    async fn test_pin_channel_failure() {
        let executor = Arc::new(ScriptedExecutor::default().respond(
            "nix-channel",
            1,
            "",
            "error: invalid URL",
        ));
        let manager = NixosManager::new(executor.clone());

        let err = manager.pin_channel("nixos-unstable").await.unwrap_err();

        assert!(matches!(err, SystemError::CommandFailed { status: 1, .. }));
        assert_eq!(executor.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_returns_failed_result() {
        let executor = Arc::new(ScriptedExecutor::default().respond(
            "nixos-rebuild switch",
            1,
            "",
            "error: undefined variable 'pkgs'",
        ));
        let manager = NixosManager::new(executor);

        let result = manager.rebuild(RestartPolicy::ApplyOnly, false).await.unwrap();

        assert!(!result.success());
        assert!(result.stderr.contains("undefined variable"));
    }

    #[tokio::test]
    async fn test_kernel_release_trims() {
        let executor =
            Arc::new(ScriptedExecutor::default().respond("uname -r", 0, "6.6.30\n", ""));
        let manager = NixosManager::new(executor);

        assert_eq!(manager.kernel_release().await.unwrap(), "6.6.30");
    }
}
