//! Repository synchronizer
//!
//! Brings each source tree to a present, current state. A missing tree is
//! shallow-cloned; a present tree is fast-forwarded in place. Nothing here
//! ever deletes a tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::tools::{CommandRunner, Invocation, ToolError};
use crate::workspace::Workspace;

/// Well-known source tree names
pub mod tree {
    pub const KERNEL: &str = "kernel";
    pub const DTBS: &str = "dtbs";
    pub const MODULES: &str = "modules";
    pub const KSU: &str = "ksu";
    pub const SUSFS: &str = "susfs";
    pub const ANYKERNEL: &str = "anykernel";

    /// Every tree in sync order
    pub const ALL: [&str; 6] = [KERNEL, DTBS, MODULES, KSU, SUSFS, ANYKERNEL];

    /// Trees whose absence makes a build impossible
    pub fn is_essential(name: &str) -> bool {
        name == KERNEL
    }
}

/// Lifecycle of a local source tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Not on disk
    Absent,
    /// Freshly cloned this run
    Cloned,
    /// Fast-forwarded this run
    Updated,
    /// On disk but not refreshed (update failed or not attempted)
    Stale,
}

impl SyncState {
    /// True when the tree exists on disk
    pub fn is_present(&self) -> bool {
        !matches!(self, SyncState::Absent)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Absent => "absent",
            SyncState::Cloned => "cloned",
            SyncState::Updated => "updated",
            SyncState::Stale => "stale",
        };
        f.pad(s)
    }
}

/// An independently versioned source tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTree {
    pub name: String,
    pub url: String,
    pub branch: Option<String>,
    pub path: PathBuf,
    pub state: SyncState,
}

impl SourceTree {
    /// Describe a tree; the initial state reflects only whether it is on disk
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        branch: Option<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let state = if path.exists() {
            SyncState::Stale
        } else {
            SyncState::Absent
        };
        Self {
            name: name.into(),
            url: url.into(),
            branch,
            path,
            state,
        }
    }

    /// Build from settings. Trees without a configured URL are still
    /// described so a manually placed checkout can be used.
    pub fn from_settings(workspace: &Workspace, settings: &Settings, name: &str) -> Self {
        let (url, branch) = settings
            .repos
            .get(name)
            .map(|r| (r.url.clone(), r.branch.clone()))
            .unwrap_or_default();
        Self::new(name, url, branch, workspace.tree_path(name))
    }

    pub fn is_present(&self) -> bool {
        self.path.exists()
    }
}

/// Synchronization errors
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{tree}: no repository URL configured")]
    NotConfigured { tree: String },

    #[error("{tree}: clone failed ({status}): {stderr}")]
    CloneFailed {
        tree: String,
        status: String,
        stderr: String,
    },

    #[error("{tree}: update failed ({status}), keeping existing tree: {stderr}")]
    UpdateFailed {
        tree: String,
        status: String,
        stderr: String,
    },

    #[error("{tree}: cannot create parent directory: {source}")]
    Io {
        tree: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl SyncError {
    /// True when the tree is still usable despite the error
    pub fn tree_usable(&self) -> bool {
        matches!(self, SyncError::UpdateFailed { .. })
    }
}

/// Result of synchronizing one tree
pub type SyncResult = Result<SyncState, SyncError>;

/// Drives `git` to clone or update trees
pub struct Synchronizer<'r> {
    runner: &'r dyn CommandRunner,
}

impl<'r> Synchronizer<'r> {
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Clone when missing, fast-forward when present.
    ///
    /// A failed update marks the tree `Stale` and leaves it untouched.
    pub fn sync(&self, tree: &mut SourceTree) -> SyncResult {
        if tree.path.exists() {
            return self.update(tree);
        }

        if tree.url.is_empty() {
            return Err(SyncError::NotConfigured {
                tree: tree.name.clone(),
            });
        }

        if let Some(parent) = tree.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SyncError::Io {
                tree: tree.name.clone(),
                source,
            })?;
        }

        let mut clone = Invocation::new("git").args(["clone", "--depth=1"]);
        if let Some(ref branch) = tree.branch {
            clone = clone.args(["-b", branch.as_str()]);
        }
        clone = clone
            .arg(tree.url.as_str())
            .arg(tree.path.to_string_lossy());

        tracing::info!(tree = %tree.name, url = %tree.url, "cloning");
        let output = self.runner.run(&clone)?;
        if !output.success() {
            return Err(SyncError::CloneFailed {
                tree: tree.name.clone(),
                status: output.describe_status(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        tree.state = SyncState::Cloned;
        Ok(tree.state)
    }

    fn update(&self, tree: &mut SourceTree) -> SyncResult {
        tracing::info!(tree = %tree.name, "updating");
        let pull = Invocation::new("git")
            .args(["pull", "--ff-only"])
            .current_dir(&tree.path);

        let output = match self.runner.run(&pull) {
            Ok(output) => output,
            Err(e) => {
                tree.state = SyncState::Stale;
                return Err(e.into());
            }
        };

        if !output.success() {
            tree.state = SyncState::Stale;
            return Err(SyncError::UpdateFailed {
                tree: tree.name.clone(),
                status: output.describe_status(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        tree.state = SyncState::Updated;
        Ok(tree.state)
    }

    /// Current `HEAD` commit of a present tree, if it is a git checkout
    pub fn head_revision(&self, path: &Path) -> Option<String> {
        let inv = Invocation::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(path);
        let output = self.runner.run(&inv).ok()?;
        let sha = output.stdout.trim();
        (output.success() && !sha.is_empty()).then(|| sha.to_string())
    }
}
