//! Exclusion rules for archive contents

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Framework files that never ship inside the archive
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".git/**",
    ".github",
    ".github/**",
    "README*",
    "*.md",
    "LICENSE*",
];

/// Leftovers from earlier runs, removed from the framework before copying in
/// the new image. Matched against paths relative to the framework root.
pub const LEFTOVER_PATTERNS: &[&str] = &[
    "Image",
    "Image.*",
    "*.dtb",
    "dtb",
    "dtbo.img",
    "*.zip",
    "*.tar",
    "modules/**/*.ko",
];

/// Flat files a previous run left in the dist directory. Archives are kept.
pub const DIST_STALE_PATTERNS: &[&str] = &[
    "Image",
    "Image.*",
    "*.dtb",
    "dtbo.img",
    "package_manifest.json",
];

/// Glob set matched against paths relative to an archive root
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    glob_set: GlobSet,
}

impl ExcludeRules {
    /// Default archive exclusions
    pub fn new() -> Result<Self, globset::Error> {
        Self::from_patterns(DEFAULT_EXCLUDES)
    }

    /// Exactly the given patterns
    pub fn from_patterns(patterns: &[&str]) -> Result<Self, globset::Error> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns.iter().filter(|p| !p.is_empty()) {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            glob_set: builder.build()?,
        })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.glob_set.is_match(path)
    }
}
