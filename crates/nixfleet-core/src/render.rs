//! Desired configuration rendering
//!
//! The engine only sees [`TemplateRenderer`]; [`TemplateDir`] is the
//! minijinja-backed implementation reading templates from a directory.

use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior, path_loader};
use nixfleet_inventory::Vars;
use serde::Serialize;
use tracing::debug;

use crate::error::CoreError;
use crate::host::Host;

/// Entry-point configuration file every host receives
pub const BASE_CONFIG: &str = "configuration.nix";

/// Values a template can reference
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext {
    /// Host-specific variables
    pub hostvars: Vars,
    /// Modules applied to the host, for imports
    pub modules: Vec<String>,
    pub host: HostContext,
    pub group: GroupContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostContext {
    pub address: String,
    /// Cluster node name
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupContext {
    pub name: String,
    pub channel: String,
    pub vars: Vars,
}

impl RenderContext {
    /// Build the context for one host
    #[must_use]
    pub fn for_host(host: &Host) -> Self {
        Self {
            hostvars: host.vars.clone(),
            modules: host.group.modules.clone(),
            host: HostContext {
                address: host.address.clone(),
                id: host.node_name(),
            },
            group: GroupContext {
                name: host.group.name.clone(),
                channel: host.group.channel.clone(),
                vars: host.group.vars.clone(),
            },
        }
    }
}

/// Produces configuration text for a named target file
pub trait TemplateRenderer: Send + Sync {
    /// Render `file` with `context`
    ///
    /// # Errors
    /// Returns `CoreError::Render` if the template is missing or fails
    fn render(&self, file: &str, context: &RenderContext) -> Result<String, CoreError>;
}

/// Templates loaded from a directory on the control machine
pub struct TemplateDir {
    env: Environment<'static>,
    root: PathBuf,
}

impl TemplateDir {
    /// Load templates from `root`; referencing an undefined value is an error
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut env = Environment::new();
        env.set_loader(path_loader(&root));
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env, root }
    }

    /// Directory templates are read from
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateRenderer for TemplateDir {
    fn render(&self, file: &str, context: &RenderContext) -> Result<String, CoreError> {
        let template = self
            .env
            .get_template(file)
            .map_err(|e| CoreError::Render(format!("{file}: {e}")))?;
        template
            .render(context)
            .map_err(|e| CoreError::Render(format!("{file}: {e}")))
    }
}

/// One rendered target file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredFile {
    /// File name relative to the configuration directory
    pub name: String,
    pub contents: String,
}

/// Files a host receives: the base configuration, then each group module once
#[must_use]
pub fn target_files(host: &Host) -> Vec<String> {
    let mut files = vec![BASE_CONFIG.to_string()];
    for module in &host.group.modules {
        if !files.contains(module) {
            files.push(module.clone());
        }
    }
    files
}

/// Render every target file for `host`
///
/// # Errors
/// Returns `CoreError::Render` on the first file that fails
pub fn render_desired(
    renderer: &dyn TemplateRenderer,
    host: &Host,
) -> Result<Vec<DesiredFile>, CoreError> {
    let context = RenderContext::for_host(host);
    target_files(host)
        .into_iter()
        .map(|name| {
            let contents = renderer.render(&name, &context)?;
            debug!(file = %name, bytes = contents.len(), "rendered");
            Ok(DesiredFile { name, contents })
        })
        .collect()
}

/// Write audit copies of rendered files as `<dir>/<host-id>_<file>`
///
/// # Errors
/// Returns `CoreError::Artifact` if a copy cannot be written
pub async fn stage_artifacts(
    dir: &Path,
    host: &Host,
    files: &[DesiredFile],
) -> Result<(), CoreError> {
    for file in files {
        let path = dir.join(format!("{}_{}", host.id, file.name.replace('/', "_")));
        tokio::fs::write(&path, &file.contents)
            .await
            .map_err(|e| CoreError::Artifact(format!("{}: {e}", path.display())))?;
    }
    Ok(())
}
