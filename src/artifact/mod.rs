//! Build artifacts
//!
//! Locates what a successful build produced and picks the image variant to
//! ship. Image preference: `Image.gz-dtb` > `Image.gz` > `Image`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of build output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RawImage,
    CompressedImage,
    ImageWithDtb,
    DeviceTreeBinary,
    LoadableModule,
}

impl ArtifactKind {
    /// Image variants, most preferred first
    pub const IMAGE_PREFERENCE: [ArtifactKind; 3] = [
        ArtifactKind::ImageWithDtb,
        ArtifactKind::CompressedImage,
        ArtifactKind::RawImage,
    ];

    pub fn is_image(&self) -> bool {
        Self::IMAGE_PREFERENCE.contains(self)
    }

    /// File name the kernel build gives this image variant
    pub fn image_file_name(&self) -> Option<&'static str> {
        match self {
            ArtifactKind::ImageWithDtb => Some("Image.gz-dtb"),
            ArtifactKind::CompressedImage => Some("Image.gz"),
            ArtifactKind::RawImage => Some("Image"),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::RawImage => "raw image",
            ArtifactKind::CompressedImage => "compressed image",
            ArtifactKind::ImageWithDtb => "image with dtb",
            ArtifactKind::DeviceTreeBinary => "device tree binary",
            ArtifactKind::LoadableModule => "loadable module",
        };
        f.write_str(s)
    }
}

/// One file produced by the build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl BuildArtifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Boot directory of a kernel build output
pub fn boot_dir(out_dir: &Path, arch: &str) -> PathBuf {
    out_dir.join("arch").join(arch).join("boot")
}

/// Image variants and device tree binaries under `<out>/arch/<arch>/boot/`.
///
/// Images come first in preference order, then `dts/**/*.dtb` sorted by
/// path, then `dtbo.img`.
pub fn scan_boot(out_dir: &Path, arch: &str) -> Vec<BuildArtifact> {
    let boot = boot_dir(out_dir, arch);
    let mut artifacts = Vec::new();

    for kind in ArtifactKind::IMAGE_PREFERENCE {
        if let Some(name) = kind.image_file_name() {
            let path = boot.join(name);
            if path.is_file() {
                artifacts.push(BuildArtifact::new(kind, path));
            }
        }
    }

    let mut dtbs: Vec<PathBuf> = find_files(&boot.join("dts"), |name| name.ends_with(".dtb"));
    dtbs.sort();
    artifacts.extend(
        dtbs.into_iter()
            .map(|p| BuildArtifact::new(ArtifactKind::DeviceTreeBinary, p)),
    );

    let dtbo = boot.join("dtbo.img");
    if dtbo.is_file() {
        artifacts.push(BuildArtifact::new(ArtifactKind::DeviceTreeBinary, dtbo));
    }

    artifacts
}

/// Delete image variants left in the boot directory by an earlier build.
///
/// Returns the paths removed. A missing boot directory removes nothing.
pub fn remove_images(out_dir: &Path, arch: &str) -> io::Result<Vec<PathBuf>> {
    let boot = boot_dir(out_dir, arch);
    let mut removed = Vec::new();
    for name in ArtifactKind::IMAGE_PREFERENCE
        .iter()
        .filter_map(ArtifactKind::image_file_name)
    {
        let path = boot.join(name);
        if path.is_file() {
            std::fs::remove_file(&path)?;
            removed.push(path);
        }
    }
    Ok(removed)
}

/// Every `*.ko` under `root`, sorted by path
pub fn scan_modules(root: &Path) -> Vec<BuildArtifact> {
    let mut modules = find_files(root, |name| name.ends_with(".ko"));
    modules.sort();
    modules
        .into_iter()
        .map(|p| BuildArtifact::new(ArtifactKind::LoadableModule, p))
        .collect()
}

fn find_files(root: &Path, accept: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| accept(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect()
}

/// The most preferred image variant present
pub fn select_image(artifacts: &[BuildArtifact]) -> Option<&BuildArtifact> {
    ArtifactKind::IMAGE_PREFERENCE
        .iter()
        .find_map(|kind| artifacts.iter().find(|a| a.kind == *kind))
}

/// Device tree binaries, in scan order
pub fn device_trees(artifacts: &[BuildArtifact]) -> impl Iterator<Item = &BuildArtifact> {
    artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::DeviceTreeBinary)
}

/// Stream a file through SHA-256
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
