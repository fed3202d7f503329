//! Feature toggles resolved from settings and the command line

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::Settings;

/// Composite build mode selected on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Everything the settings enable
    #[default]
    Full,
    KsuOnly,
    SusfsOnly,
    /// No feature overlays
    Stock,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Mode::Full),
            "ksu-only" => Ok(Mode::KsuOnly),
            "susfs-only" => Ok(Mode::SusfsOnly),
            "stock" => Ok(Mode::Stock),
            other => Err(format!(
                "unknown mode '{}' (expected full, ksu-only, susfs-only or stock)",
                other
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Full => "full",
            Mode::KsuOnly => "ksu-only",
            Mode::SusfsOnly => "susfs-only",
            Mode::Stock => "stock",
        };
        f.write_str(s)
    }
}

/// Explicit per-feature switches from the command line; each can only disable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Toggles {
    pub no_ksu: bool,
    pub no_susfs: bool,
    pub no_zip: bool,
}

/// Which features a run actually uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureState {
    pub ksu: bool,
    pub susfs: bool,
    /// Produce a flashable archive
    pub zip: bool,
}

impl FeatureState {
    /// Settings first, then the mode narrows, then explicit toggles disable
    pub fn resolve(settings: &Settings, mode: Mode, toggles: Toggles) -> Self {
        let (mode_ksu, mode_susfs) = match mode {
            Mode::Full => (true, true),
            Mode::KsuOnly => (true, false),
            Mode::SusfsOnly => (false, true),
            Mode::Stock => (false, false),
        };

        Self {
            ksu: settings.features.ksu && mode_ksu && !toggles.no_ksu,
            susfs: settings.features.susfs && mode_susfs && !toggles.no_susfs,
            zip: settings.package.enabled && !toggles.no_zip,
        }
    }

    /// All overlays off
    pub fn stock() -> Self {
        Self {
            ksu: false,
            susfs: false,
            zip: true,
        }
    }

    pub fn any_overlay(&self) -> bool {
        self.ksu || self.susfs
    }

    /// Tag used in archive names
    pub fn tag(&self) -> &'static str {
        match (self.ksu, self.susfs) {
            (true, true) => "KSU-SUSFS",
            (true, false) => "KSU",
            (false, true) => "SUSFS",
            (false, false) => "stock",
        }
    }

    /// Installer display string
    pub fn display_string(&self) -> String {
        match (self.ksu, self.susfs) {
            (true, true) => "KernelSU + SUSFS".to_string(),
            (true, false) => "KernelSU".to_string(),
            (false, true) => "SUSFS".to_string(),
            (false, false) => "Stock".to_string(),
        }
    }
}
