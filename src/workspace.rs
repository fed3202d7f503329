//! Workspace layout and filesystem helpers
//!
//! One workspace directory holds a subtree per source tree plus `out/` for
//! everything the pipeline produces. Only `out/` is ever deleted.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Directory under the workspace root holding build outputs and logs
pub const OUT_DIR: &str = "out";

/// Workspace directory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `root`, resolved against the current directory.
    ///
    /// Child processes run from inside the trees, so every path handed to
    /// them has to be absolute.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: absolute(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of a named source tree
    pub fn tree_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join(OUT_DIR)
    }

    /// Kernel build output (`make O=`)
    pub fn kernel_out(&self) -> PathBuf {
        self.out_dir().join("kernel")
    }

    /// Flat location for final artifacts
    pub fn dist_dir(&self) -> PathBuf {
        self.out_dir().join("dist")
    }

    pub fn build_log(&self) -> PathBuf {
        self.out_dir().join("build.log")
    }

    pub fn integration_log(&self) -> PathBuf {
        self.out_dir().join("integration.log")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.out_dir().join("run_summary.json")
    }

    /// Workspace-level settings file
    pub fn settings_path(&self) -> PathBuf {
        self.root.join("kforge.toml")
    }

    /// Remove compiled outputs and logs. Source trees are never touched.
    pub fn clean(&self) -> io::Result<CleanReport> {
        let out = self.out_dir();
        if !out.exists() {
            return Ok(CleanReport::default());
        }

        let mut report = CleanReport::default();
        for entry in WalkDir::new(&out).follow_links(false) {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() || entry.file_type().is_symlink() {
                report.files_removed += 1;
                report.bytes_removed += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        fs::remove_dir_all(&out)?;
        report.removed = Some(out);
        Ok(report)
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    let joined = if path.is_absolute() {
        path
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return path,
        }
    };
    joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// What `Workspace::clean` removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Option<PathBuf>,
    pub files_removed: u64,
    pub bytes_removed: u64,
}

/// Content digest of a directory tree.
///
/// Covers relative paths, file contents and symlink targets in sorted order.
/// `.git` is skipped so that VCS bookkeeping does not count as a change.
pub fn tree_digest(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if rel.as_os_str().is_empty() {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            hasher.update(b"L\0");
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(fs::read_link(entry.path())?.to_string_lossy().as_bytes());
        } else if file_type.is_dir() {
            hasher.update(b"D\0");
            hasher.update(rel.to_string_lossy().as_bytes());
        } else {
            hasher.update(b"F\0");
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(fs::read(entry.path())?);
        }
        hasher.update(b"\n");
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Recursively copy `src` into `dst`, overwriting existing files.
///
/// Returns the number of files copied. Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            symlink(&link, &target)?;
            copied += 1;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    let resolved = target.parent().map(|p| p.join(link)).unwrap_or_else(|| link.to_path_buf());
    fs::copy(resolved, target).map(|_| ())
}
