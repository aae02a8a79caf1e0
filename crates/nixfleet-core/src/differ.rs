//! Config differ and pusher

use nixfleet_exec::{ExecError, RemoteExecutor};
use similar::{DiffTag, TextDiff};
use tracing::{error, info, instrument, warn};

use crate::error::CoreError;
use crate::render::DesiredFile;

/// A target file whose live copy differs from the desired one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// File name relative to the configuration directory
    pub file: String,
    /// Absolute remote path
    pub remote_path: String,
    /// Live contents before this run; `None` if the file did not exist
    pub previous: Option<String>,
    /// Unified diff from the live copy to the desired one
    pub diff: String,
}

impl FileChange {
    /// Whether this run creates the file
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.previous.is_none()
    }
}

/// Changed and unchanged target files for one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDelta {
    /// Files written in this run, in target order
    pub changed: Vec<FileChange>,
    /// Files already matching the desired contents
    pub unchanged: Vec<String>,
}

impl ConfigDelta {
    /// True when nothing was written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    #[must_use]
    pub fn changed_files(&self) -> Vec<String> {
        self.changed.iter().map(|c| c.file.clone()).collect()
    }
}

/// Line-oriented unified diff, or `None` when the texts have the same lines
#[must_use]
pub fn unified_diff(file: &str, live: &str, desired: &str) -> Option<String> {
    let diff = TextDiff::from_lines(live, desired);
    if diff.ops().iter().all(|op| op.tag() == DiffTag::Equal) {
        return None;
    }
    Some(
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{file}"), &format!("b/{file}"))
            .to_string(),
    )
}

fn remote_path(config_dir: &str, file: &str) -> String {
    format!("{}/{file}", config_dir.trim_end_matches('/'))
}

/// Compare desired files against the live copies and write the ones that differ
///
/// A missing remote file counts as changed and is created. Previous contents
/// are kept in memory on the returned changes so they can be restored. If a
/// write fails, the files written before it are restored first.
///
/// # Errors
/// Returns `CoreError::PushFailed` if a write fails, or `CoreError::Exec` if
/// a live copy cannot be read
#[instrument(skip_all, fields(files = desired.len()))]
pub async fn reconcile_config(
    session: &dyn RemoteExecutor,
    config_dir: &str,
    desired: &[DesiredFile],
) -> Result<ConfigDelta, CoreError> {
    let mut delta = ConfigDelta::default();
    let mut pending = Vec::new();

    for file in desired {
        let path = remote_path(config_dir, &file.name);
        let previous = match session.read_file(&path).await {
            Ok(live) => Some(live),
            Err(ExecError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let diff = match &previous {
            Some(live) => unified_diff(&file.name, live, &file.contents),
            None => {
                info!(file = %file.name, "created");
                unified_diff(&file.name, "", &file.contents)
            }
        };

        match diff {
            Some(diff) => {
                info!(file = %file.name, "modified:\n{diff}");
                pending.push((
                    FileChange {
                        file: file.name.clone(),
                        remote_path: path,
                        previous,
                        diff,
                    },
                    &file.contents,
                ));
            }
            None if previous.is_none() => {
                // empty desired file that does not exist yet
                pending.push((
                    FileChange {
                        file: file.name.clone(),
                        remote_path: path,
                        previous,
                        diff: String::new(),
                    },
                    &file.contents,
                ));
            }
            None => delta.unchanged.push(file.name.clone()),
        }
    }

    for (change, contents) in pending {
        if let Err(e) = session.write_file(&change.remote_path, contents).await {
            error!(file = %change.file, error = %e, "write failed, restoring pushed files");
            let restore_failures = restore_previous(session, &delta.changed).await;
            return Err(CoreError::PushFailed {
                file: change.file,
                message: e.to_string(),
                restore_failures,
            });
        }
        delta.changed.push(change);
    }

    Ok(delta)
}

/// Write each change's previous contents back, one file at a time
///
/// Files created in this run are left in place. Each restore is attempted
/// once; the failures are returned as `"<file>: <error>"`.
pub async fn restore_previous(session: &dyn RemoteExecutor, changes: &[FileChange]) -> Vec<String> {
    let mut failures = Vec::new();

    for change in changes {
        let Some(previous) = &change.previous else {
            warn!(file = %change.file, "created in this run, left in place");
            continue;
        };
        match session.write_file(&change.remote_path, previous).await {
            Ok(()) => info!(file = %change.file, "restored"),
            Err(e) => {
                error!(file = %change.file, error = %e, "restore failed");
                failures.push(format!("{}: {e}", change.file));
            }
        }
    }

    failures
}
