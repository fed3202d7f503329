//! Installer manifest (anykernel.sh) and package manifest (package_manifest.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Schema version for package_manifest.json
pub const PACKAGE_MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for package_manifest.json
pub const PACKAGE_MANIFEST_SCHEMA_ID: &str = "kforge/package_manifest@1";

/// Installer script file name inside the framework
pub const INSTALLER_SCRIPT: &str = "anykernel.sh";

const PROPERTIES_START: &str = "properties() { '";
const PROPERTIES_END: &str = "'; } # end properties";

/// Values templated into the installer script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerManifest {
    pub kernel_string: String,
    /// Feature-derived label shown by the installer
    pub display: String,
    /// Accepted device identifiers (`device.name1..N`)
    pub device_names: Vec<String>,
    pub os_min: String,
    pub os_max: String,
}

impl InstallerManifest {
    /// The `properties()` block body
    pub fn properties(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("kernel.string={} [{}]\n", self.kernel_string, self.display));
        out.push_str("do.devicecheck=1\n");
        out.push_str("do.modules=0\n");
        out.push_str("do.systemless=1\n");
        out.push_str("do.cleanup=1\n");
        out.push_str("do.cleanuponabort=0\n");
        for (i, name) in self.device_names.iter().enumerate() {
            out.push_str(&format!("device.name{}={}\n", i + 1, name));
        }
        out.push_str(&format!("supported.versions={}-{}\n", self.os_min, self.os_max));
        out.push_str("supported.patchlevels=\n");
        out
    }

    /// Render the installer script.
    ///
    /// With an existing script, only its properties block is replaced and
    /// everything else is kept. Without one, a minimal script is produced.
    pub fn render(&self, existing: Option<&str>) -> String {
        let block = format!("{}\n{}{}", PROPERTIES_START, self.properties(), PROPERTIES_END);

        if let Some(text) = existing {
            if let (Some(start), Some(end)) = (text.find(PROPERTIES_START), text.find(PROPERTIES_END)) {
                if start < end {
                    let mut out = String::with_capacity(text.len() + block.len());
                    out.push_str(&text[..start]);
                    out.push_str(&block);
                    out.push_str(&text[end + PROPERTIES_END.len()..]);
                    return out;
                }
            }
            tracing::warn!("installer script has no properties block, regenerating");
        }

        format!(
            "### AnyKernel3 Ramdisk Mod Script\n\
             ## generated by kforge\n\n\
             ### AnyKernel setup\n\
             # global properties\n\
             {}\n\n\
             ### AnyKernel install\n\
             # boot shell variables\n\
             BLOCK=auto;\n\
             IS_SLOT_DEVICE=auto;\n\
             RAMDISK_COMPRESSION=auto;\n\
             PATCH_VBMETA_FLAG=auto;\n\n\
             # import functions/variables and setup patching\n\
             . tools/ak3-core.sh;\n\n\
             # boot install\n\
             split_boot;\n\
             flash_boot;\n",
            block
        )
    }

    /// Render into `<framework>/anykernel.sh`
    pub fn write_into(&self, framework: &Path) -> io::Result<()> {
        let path = framework.join(INSTALLER_SCRIPT);
        let existing = match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        fs::write(&path, self.render(existing.as_deref()))
    }
}

/// One packaged file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Path relative to the package root
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// package_manifest.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    pub schema_version: u32,

    pub schema_id: String,

    pub created_at: DateTime<Utc>,

    /// Feature tag (KSU-SUSFS, KSU, SUSFS, stock)
    pub feature_tag: String,

    pub installer: InstallerManifest,

    /// Archive file name, when an archive was produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,

    /// Packaged files sorted by path
    pub entries: Vec<PackageEntry>,
}

impl PackageManifest {
    pub fn new(feature_tag: &str, installer: InstallerManifest, entries: Vec<PackageEntry>) -> Self {
        Self {
            schema_version: PACKAGE_MANIFEST_SCHEMA_VERSION,
            schema_id: PACKAGE_MANIFEST_SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            feature_tag: feature_tag.to_string(),
            installer,
            archive: None,
            archive_sha256: None,
            entries,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }
}
