//! Artifact packager
//!
//! Copies the selected image and device trees into `out/dist/`, then (when
//! archives are enabled) stages them into the packaging framework and writes
//! one archive next to them. Packaging failures never undo a successful
//! build; they are reported as a failed stage.

mod archive;
mod exclude;
mod manifest;

pub use archive::{archive_name, collect_files, write_tar, write_zip};
pub use exclude::{ExcludeRules, DIST_STALE_PATTERNS, LEFTOVER_PATTERNS};
pub use manifest::{
    InstallerManifest, PackageEntry, PackageManifest, INSTALLER_SCRIPT,
    PACKAGE_MANIFEST_SCHEMA_ID, PACKAGE_MANIFEST_SCHEMA_VERSION,
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::artifact::{device_trees, file_sha256, select_image, BuildArtifact};
use crate::config::Settings;
use crate::features::FeatureState;
use crate::sync::{SourceTree, Synchronizer};
use crate::tools::{CommandRunner, ToolError};

/// Manifest file written next to the flat artifacts
pub const PACKAGE_MANIFEST_FILE: &str = "package_manifest.json";

/// Archive container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Zip,
    Tar,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
        }
    }

    /// Zip archives are produced by the external `zip` utility
    pub fn needs_zip_utility(&self) -> bool {
        matches!(self, ArchiveFormat::Zip)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("no kernel image found (expected Image.gz-dtb, Image.gz or Image)")]
    NoImage,

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid exclude pattern: {0}")]
    Exclude(#[from] globset::Error),

    #[error("archive tool failed ({status}): {stderr}")]
    ArchiveFailed { status: String, stderr: String },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PackageError + '_ {
    move |source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What packaging produced
#[derive(Debug, Clone, Serialize)]
pub struct OutputPackage {
    pub dist_dir: PathBuf,
    /// The image copied into `dist_dir`
    pub image: PathBuf,
    /// Every file copied into `dist_dir`, image first
    pub files: Vec<PathBuf>,
    pub archive: Option<PathBuf>,
    pub manifest_path: PathBuf,
    #[serde(skip)]
    pub manifest: PackageManifest,
    pub warnings: Vec<String>,
}

pub struct Packager<'r> {
    runner: &'r dyn CommandRunner,
    settings: &'r Settings,
    dist_dir: PathBuf,
}

impl<'r> Packager<'r> {
    pub fn new(
        runner: &'r dyn CommandRunner,
        settings: &'r Settings,
        dist_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            settings,
            dist_dir: dist_dir.into(),
        }
    }

    /// Package the build outputs.
    ///
    /// `framework` is synchronized only when an archive is requested. An
    /// unusable framework tree downgrades to flat artifacts plus a warning.
    pub fn package(
        &self,
        artifacts: &[BuildArtifact],
        features: &FeatureState,
        framework: &mut SourceTree,
        now: DateTime<Local>,
    ) -> Result<OutputPackage, PackageError> {
        let image = select_image(artifacts).ok_or(PackageError::NoImage)?;
        let dtbs: Vec<&BuildArtifact> = device_trees(artifacts).collect();
        let mut warnings = Vec::new();

        tracing::info!(image = %image.file_name(), dtbs = dtbs.len(), "packaging");

        fs::create_dir_all(&self.dist_dir).map_err(io_err(&self.dist_dir))?;
        let cleared = clear_dist(&self.dist_dir)?;
        if cleared > 0 {
            tracing::debug!(cleared, "removed flat artifacts from previous run");
        }

        let staged = stage(image, &dtbs, &self.dist_dir, &mut warnings)?;

        let installer = InstallerManifest {
            kernel_string: self.settings.package.kernel_string.clone(),
            display: features.display_string(),
            device_names: self.settings.device_names(),
            os_min: self.settings.device.os_min.clone(),
            os_max: self.settings.device.os_max.clone(),
        };

        let mut entries = Vec::with_capacity(staged.len());
        for path in &staged {
            entries.push(entry_for(&self.dist_dir, path)?);
        }
        let mut manifest = PackageManifest::new(features.tag(), installer, entries);

        let archive = if features.zip {
            self.build_archive(image, &dtbs, features, framework, &manifest.installer, now, &mut warnings)?
        } else {
            tracing::debug!("archive disabled");
            None
        };

        if let Some(ref path) = archive {
            manifest.archive = path.file_name().map(|n| n.to_string_lossy().to_string());
            manifest.archive_sha256 = Some(file_sha256(path).map_err(io_err(path))?);
        }

        let manifest_path = self.dist_dir.join(PACKAGE_MANIFEST_FILE);
        manifest
            .write_to_file(&manifest_path)
            .map_err(io_err(&manifest_path))?;

        Ok(OutputPackage {
            dist_dir: self.dist_dir.clone(),
            image: staged[0].clone(),
            files: staged,
            archive,
            manifest_path,
            manifest,
            warnings,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_archive(
        &self,
        image: &BuildArtifact,
        dtbs: &[&BuildArtifact],
        features: &FeatureState,
        framework: &mut SourceTree,
        installer: &InstallerManifest,
        now: DateTime<Local>,
        warnings: &mut Vec<String>,
    ) -> Result<Option<PathBuf>, PackageError> {
        let usable = match Synchronizer::new(self.runner).sync(framework) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(tree = %framework.name, error = %e, "packaging framework sync failed");
                warnings.push(e.to_string());
                e.tree_usable()
            }
        };
        if !usable || !framework.is_present() {
            warnings.push("packaging framework unavailable; archive skipped".to_string());
            return Ok(None);
        }
        let root = framework.path.as_path();

        let removed = reset_leftovers(root)?;
        if removed > 0 {
            tracing::debug!(removed, "removed leftovers from packaging framework");
        }

        stage(image, dtbs, root, warnings)?;
        let script = root.join(INSTALLER_SCRIPT);
        installer.write_into(root).map_err(io_err(&script))?;

        let format = self.settings.package.format;
        let name = archive_name(&self.settings.package.prefix, features.tag(), format, &now);
        let dest = self.dist_dir.join(&name);
        let files = collect_files(root, &ExcludeRules::new()?).map_err(io_err(root))?;

        match format {
            ArchiveFormat::Zip => write_zip(self.runner, root, &files, &dest)?,
            ArchiveFormat::Tar => write_tar(root, &files, &dest).map_err(io_err(&dest))?,
        }

        tracing::info!(archive = %name, files = files.len(), "archive written");
        Ok(Some(dest))
    }
}

/// Copy the image and device trees flat into `dest`, image first
fn stage(
    image: &BuildArtifact,
    dtbs: &[&BuildArtifact],
    dest: &Path,
    warnings: &mut Vec<String>,
) -> Result<Vec<PathBuf>, PackageError> {
    let mut placed: Vec<PathBuf> = Vec::with_capacity(dtbs.len() + 1);

    for artifact in std::iter::once(image).chain(dtbs.iter().copied()) {
        let target = dest.join(artifact.file_name());
        if placed.contains(&target) {
            tracing::warn!(file = %artifact.file_name(), "duplicate file name, keeping the first");
            warnings.push(format!(
                "{} skipped: another artifact already uses that name",
                artifact.path.display()
            ));
            continue;
        }
        fs::copy(&artifact.path, &target).map_err(io_err(&artifact.path))?;
        placed.push(target);
    }

    Ok(placed)
}

/// Remove files from earlier runs; framework files are left alone
fn reset_leftovers(root: &Path) -> Result<usize, PackageError> {
    let leftovers = ExcludeRules::from_patterns(LEFTOVER_PATTERNS)?;
    let mut doomed = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| PackageError::Io {
            path: root.to_path_buf(),
            source: io::Error::other(e),
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if leftovers.is_excluded(rel) {
            doomed.push(entry.into_path());
        }
    }

    for path in &doomed {
        fs::remove_file(path).map_err(io_err(path))?;
    }
    Ok(doomed.len())
}

/// Remove the previous run's flat artifacts; earlier archives stay
fn clear_dist(dist: &Path) -> Result<usize, PackageError> {
    let stale = ExcludeRules::from_patterns(DIST_STALE_PATTERNS)?;
    let mut removed = 0;

    for entry in fs::read_dir(dist).map_err(io_err(dist))? {
        let entry = entry.map_err(io_err(dist))?;
        let path = entry.path();
        if path.is_dir() || !stale.is_excluded(Path::new(&entry.file_name())) {
            continue;
        }
        fs::remove_file(&path).map_err(io_err(&path))?;
        removed += 1;
    }
    Ok(removed)
}

fn entry_for(root: &Path, path: &Path) -> Result<PackageEntry, PackageError> {
    let size = fs::metadata(path).map_err(io_err(path))?.len();
    let sha256 = file_sha256(path).map_err(io_err(path))?;
    let rel = path.strip_prefix(root).unwrap_or(path);
    Ok(PackageEntry {
        path: rel.to_string_lossy().to_string(),
        size,
        sha256,
    })
}
