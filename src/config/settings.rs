//! Typed pipeline settings
//!
//! The merged JSON produced by the layer merge is deserialized into these
//! structs. Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::package::ArchiveFormat;
use crate::sync::tree;

/// All pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSettings,
    /// Source trees keyed by name
    pub repos: BTreeMap<String, RepoSettings>,
    pub toolchain: ToolchainSettings,
    pub build: BuildSettings,
    pub features: FeatureSettings,
    pub package: PackageSettings,
}

/// Target device description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device codename, most specific defconfig candidate
    pub codename: String,
    /// SoC / platform name, second defconfig candidate
    pub soc: Option<String>,
    /// Kernel `ARCH`
    pub arch: String,
    /// Device identifiers accepted by the installer
    pub names: Vec<String>,
    /// Lowest supported OS version
    pub os_min: String,
    /// Highest supported OS version
    pub os_max: String,
    /// Explicit defconfig name, skips the candidate search
    pub defconfig: Option<String>,
    /// Device fragment path relative to the kernel tree
    pub fragment: Option<String>,
}

/// Where a source tree comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoSettings {
    /// Clone URL; empty means the tree is not used
    pub url: String,
    pub branch: Option<String>,
}

/// Cross-compilation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSettings {
    /// `CROSS_COMPILE` prefix
    pub cross_compile: String,
    /// `CROSS_COMPILE_COMPAT` prefix for the 32-bit vDSO
    pub cross_compile_compat: Option<String>,
    /// Build with clang (`CC=clang LLVM=1`)
    pub clang: bool,
    /// Extra `make` variables
    pub make_vars: BTreeMap<String, String>,
}

/// Build stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Image target passed to make
    pub image_target: String,
    /// Parallel jobs; defaults to available parallelism
    pub jobs: Option<usize>,
    /// Build loadable modules after the image
    pub modules: bool,
}

/// Feature overlay toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Privilege-management overlay
    pub ksu: bool,
    /// Filesystem-hiding overlay
    pub susfs: bool,
    /// Named variant passed to the overlay's setup script
    pub ksu_variant: String,
    /// Extra fragment files (relative to the workspace) appended after feature fragments
    pub extra_fragments: Vec<String>,
}

/// Packaging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSettings {
    /// Produce a flashable archive
    pub enabled: bool,
    pub format: ArchiveFormat,
    /// Archive file name prefix
    pub prefix: String,
    /// Kernel string shown by the installer
    pub kernel_string: String,
}

impl Default for Settings {
    fn default() -> Self {
        let mut repos = BTreeMap::new();
        repos.insert(tree::KERNEL.to_string(), RepoSettings::default());
        repos.insert(tree::DTBS.to_string(), RepoSettings::default());
        repos.insert(tree::MODULES.to_string(), RepoSettings::default());
        repos.insert(
            tree::KSU.to_string(),
            RepoSettings {
                url: "https://github.com/KernelSU-Next/KernelSU-Next".to_string(),
                branch: Some("next".to_string()),
            },
        );
        repos.insert(
            tree::SUSFS.to_string(),
            RepoSettings {
                url: "https://gitlab.com/simonpunk/susfs4ksu".to_string(),
                branch: Some("gki-android14-6.1".to_string()),
            },
        );
        repos.insert(
            tree::ANYKERNEL.to_string(),
            RepoSettings {
                url: "https://github.com/osm0sis/AnyKernel3".to_string(),
                branch: None,
            },
        );

        Self {
            device: DeviceSettings::default(),
            repos,
            toolchain: ToolchainSettings::default(),
            build: BuildSettings::default(),
            features: FeatureSettings::default(),
            package: PackageSettings::default(),
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            codename: "generic".to_string(),
            soc: None,
            arch: "arm64".to_string(),
            names: Vec::new(),
            os_min: "12".to_string(),
            os_max: "15".to_string(),
            defconfig: None,
            fragment: None,
        }
    }
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            cross_compile: "aarch64-linux-gnu-".to_string(),
            cross_compile_compat: None,
            clang: true,
            make_vars: BTreeMap::new(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            image_target: "Image.gz-dtb".to_string(),
            jobs: None,
            modules: true,
        }
    }
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            ksu: true,
            susfs: true,
            ksu_variant: "susfs-main".to_string(),
            extra_fragments: Vec::new(),
        }
    }
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ArchiveFormat::Zip,
            prefix: "kforge".to_string(),
            kernel_string: "kforge kernel".to_string(),
        }
    }
}

impl Settings {
    /// Repository settings for a tree, if configured with a URL
    pub fn repo(&self, name: &str) -> Option<&RepoSettings> {
        self.repos.get(name).filter(|r| !r.url.is_empty())
    }

    /// Parallel jobs to request from make
    pub fn jobs(&self) -> usize {
        self.build.jobs.filter(|j| *j > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Device identifiers for the installer; falls back to the codename
    pub fn device_names(&self) -> Vec<String> {
        if self.device.names.is_empty() {
            vec![self.device.codename.clone()]
        } else {
            self.device.names.clone()
        }
    }

    /// Check values that would make later stages meaningless
    pub fn validate(&self) -> Result<(), String> {
        if self.device.codename.trim().is_empty() {
            return Err("device.codename must not be empty".to_string());
        }
        if self.device.arch.trim().is_empty() {
            return Err("device.arch must not be empty".to_string());
        }
        if self.build.image_target.trim().is_empty() {
            return Err("build.image_target must not be empty".to_string());
        }
        if let (Ok(min), Ok(max)) = (
            self.device.os_min.parse::<u32>(),
            self.device.os_max.parse::<u32>(),
        ) {
            if min > max {
                return Err(format!(
                    "device.os_min ({}) is greater than device.os_max ({})",
                    min, max
                ));
            }
        }
        if self.package.prefix.contains('/') {
            return Err("package.prefix must not contain '/'".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.device.arch, "arm64");
        assert_eq!(settings.build.image_target, "Image.gz-dtb");
        assert!(settings.features.ksu);
        assert!(settings.features.susfs);
        assert_eq!(settings.features.ksu_variant, "susfs-main");
        assert_eq!(settings.package.format, ArchiveFormat::Zip);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_unconfigured_repos_are_hidden() {
        let settings = Settings::default();
        assert!(settings.repo(tree::KERNEL).is_none());
        assert!(settings.repo(tree::KSU).is_some());
        assert!(settings.repo("nonexistent").is_none());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let value = serde_json::json!({
            "device": {"codename": "alioth", "names": ["alioth", "aliothin"]},
            "build": {"jobs": 4}
        });
        let settings: Settings = serde_json::from_value(value).unwrap();

        assert_eq!(settings.device.codename, "alioth");
        assert_eq!(settings.device.arch, "arm64");
        assert_eq!(settings.jobs(), 4);
        assert_eq!(settings.device_names(), vec!["alioth", "aliothin"]);
        // Repos were not mentioned at all, so the default map is used
        assert!(settings.repo(tree::ANYKERNEL).is_some());
    }

    #[test]
    fn test_device_names_fallback() {
        let settings = Settings::default();
        assert_eq!(settings.device_names(), vec!["generic".to_string()]);
    }

    #[test]
    fn test_validate_os_range() {
        let mut settings = Settings::default();
        settings.device.os_min = "15".to_string();
        settings.device.os_max = "12".to_string();
        assert!(settings.validate().unwrap_err().contains("os_min"));
    }

    #[test]
    fn test_zero_jobs_means_auto() {
        let mut settings = Settings::default();
        settings.build.jobs = Some(0);
        assert!(settings.jobs() >= 1);
    }
}
