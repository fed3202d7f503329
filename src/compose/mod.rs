//! Config composer
//!
//! Builds the final `.config` from an ordered list of layers:
//!
//! 1. baseline defconfig, found by a most-specific-first search
//! 2. device fragment
//! 3. feature fragments (only when a feature is enabled), then user fragments
//!
//! Layers fold left to right, later assignments win. Whenever a fragment was
//! appended, dependency rules run in-process and the kernel's `olddefconfig`
//! resolves whatever is left. Composition itself never fails; problems are
//! reported as warnings.

mod fragments;

pub use fragments::{feature_fragments, normalization_rules};

use kforge_kconfig::{
    normalize, parse_fragment_lossy, ConfigFragment, Kconfig, ParseError, Resolution,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::build::MakeEnv;
use crate::config::DeviceSettings;
use crate::features::FeatureState;
use crate::tools::{CommandOutput, CommandRunner, Transcript};

/// Baseline defconfig names relative to `arch/<arch>/configs/`, most specific first
pub fn baseline_candidates(device: &DeviceSettings) -> Vec<String> {
    if let Some(ref explicit) = device.defconfig {
        return vec![explicit.clone()];
    }

    let mut names = vec![
        format!("{}_defconfig", device.codename),
        format!("vendor/{}_defconfig", device.codename),
    ];
    if let Some(ref soc) = device.soc {
        names.push(format!("{}_defconfig", soc));
        names.push(format!("vendor/{}_defconfig", soc));
    }
    names.push("gki_defconfig".to_string());
    names.push("defconfig".to_string());
    names
}

/// First candidate present in the kernel tree
pub fn find_baseline(kernel: &Path, device: &DeviceSettings) -> Option<(String, PathBuf)> {
    let configs = kernel.join("arch").join(&device.arch).join("configs");
    baseline_candidates(device)
        .into_iter()
        .map(|name| {
            let path = configs.join(&name);
            (name, path)
        })
        .find(|(_, path)| path.is_file())
}

/// Device fragment path relative to the kernel tree
pub fn device_fragment_path(device: &DeviceSettings) -> String {
    device
        .fragment
        .clone()
        .unwrap_or_else(|| format!("arch/{}/configs/{}.config", device.arch, device.codename))
}

/// Inputs to one composition
pub struct ComposeRequest<'a> {
    pub kernel: &'a Path,
    pub device: &'a DeviceSettings,
    pub features: &'a FeatureState,
    /// User fragment files, already resolved to absolute paths
    pub extra_fragments: &'a [PathBuf],
}

/// The composed configuration and how it came to be
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveKconfig {
    /// Baseline defconfig name, if one was found
    pub baseline: Option<String>,
    /// Layer names in fold order
    pub layers: Vec<String>,
    /// Feature fragment names appended
    pub feature_fragments: Vec<String>,
    /// At least one fragment was appended on top of the baseline
    pub fragments_appended: bool,
    /// The in-process normalization pass ran
    pub normalized: bool,
    /// Changes made by the dependency rules
    pub resolutions: Vec<Resolution>,
    /// Final configuration (read back after `olddefconfig` when it succeeded)
    #[serde(skip)]
    pub config: Kconfig,
    /// Where `.config` was written
    pub config_path: PathBuf,
    pub warnings: Vec<String>,
}

/// Composer errors; only losing the output directory is fatal
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct Composer<'r> {
    runner: &'r dyn CommandRunner,
    env: &'r MakeEnv,
}

impl<'r> Composer<'r> {
    pub fn new(runner: &'r dyn CommandRunner, env: &'r MakeEnv) -> Self {
        Self { runner, env }
    }

    /// Compose, write `<out>/.config` and let the kernel resolve defaults
    pub fn compose(
        &self,
        request: &ComposeRequest<'_>,
        transcript: &Transcript,
    ) -> Result<EffectiveKconfig, ComposeError> {
        let mut warnings = Vec::new();
        let mut layers: Vec<ConfigFragment> = Vec::new();

        let baseline = find_baseline(request.kernel, request.device);
        match baseline {
            Some((ref name, ref path)) => {
                tracing::info!(defconfig = %name, "baseline selected");
                if let Some(fragment) = read_fragment(name, path, &mut warnings) {
                    layers.push(fragment);
                }
            }
            None => {
                tracing::warn!(codename = %request.device.codename, "no defconfig found, starting empty");
                warnings.push(format!(
                    "no baseline defconfig found (tried {}); starting from an empty baseline",
                    baseline_candidates(request.device).join(", ")
                ));
            }
        }
        let baseline_layers = layers.len();

        let device_rel = device_fragment_path(request.device);
        let device_path = request.kernel.join(&device_rel);
        if device_path.is_file() {
            if let Some(fragment) = read_fragment(&device_rel, &device_path, &mut warnings) {
                layers.push(fragment);
            }
        } else {
            tracing::debug!(fragment = %device_rel, "no device fragment");
        }

        let features = feature_fragments(request.features);
        let feature_names: Vec<String> = features.iter().map(|f| f.name.clone()).collect();
        layers.extend(features);

        for path in request.extra_fragments {
            let name = path.display().to_string();
            if !path.is_file() {
                tracing::warn!(fragment = %name, "extra fragment not found");
                warnings.push(format!("extra fragment {} not found", name));
                continue;
            }
            if let Some(fragment) = read_fragment(&name, path, &mut warnings) {
                layers.push(fragment);
            }
        }

        let fragments_appended = layers.len() > baseline_layers;
        let mut config = Kconfig::fold(&layers);

        let resolutions = if fragments_appended {
            let resolutions = normalize(&mut config, &normalization_rules(request.features));
            for r in &resolutions {
                tracing::info!(option = %r.key, kind = ?r.kind, "normalized");
            }
            resolutions
        } else {
            Vec::new()
        };

        let config_path = self.env.out_dir.join(".config");
        fs::create_dir_all(&self.env.out_dir)
            .and_then(|_| fs::write(&config_path, config.render()))
            .map_err(|source| ComposeError::Write {
                path: config_path.clone(),
                source,
            })?;

        // A lone in-tree defconfig is expanded by the kernel itself.
        let target = match baseline {
            Some((ref name, _)) if !fragments_appended => name.clone(),
            _ => "olddefconfig".to_string(),
        };
        let inv = self.env.invocation(request.kernel, &[target.as_str()]);
        let output = self.runner.run(&inv).unwrap_or_else(|e| CommandOutput {
            status: None,
            stdout: String::new(),
            stderr: e.to_string(),
        });
        if let Err(e) = transcript.record(&inv, &output) {
            tracing::debug!(error = %e, "could not write transcript");
        }

        if output.success() {
            match fs::read_to_string(&config_path) {
                Ok(text) => {
                    let (resolved, errors) = Kconfig::from_text(".config", &text);
                    report_parse_errors(".config", &errors, &mut warnings);
                    config = resolved;
                }
                Err(e) => warnings.push(format!("cannot read back .config: {}", e)),
            }
        } else {
            tracing::warn!(make_target = %target, status = %output.describe_status(), "config resolution failed");
            warnings.push(format!(
                "make {} failed ({}); using the composed configuration as written",
                target,
                output.describe_status()
            ));
        }

        Ok(EffectiveKconfig {
            baseline: baseline.map(|(name, _)| name),
            layers: layers.iter().map(|l| l.name.clone()).collect(),
            feature_fragments: feature_names,
            fragments_appended,
            normalized: fragments_appended,
            resolutions,
            config,
            config_path,
            warnings,
        })
    }
}

fn read_fragment(name: &str, path: &Path, warnings: &mut Vec<String>) -> Option<ConfigFragment> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let (fragment, errors) = parse_fragment_lossy(name, &text);
            report_parse_errors(name, &errors, warnings);
            Some(fragment)
        }
        Err(e) => {
            tracing::warn!(fragment = %name, error = %e, "cannot read fragment");
            warnings.push(format!("cannot read {}: {}", name, e));
            None
        }
    }
}

fn report_parse_errors(name: &str, errors: &[ParseError], warnings: &mut Vec<String>) {
    for error in errors {
        tracing::warn!(fragment = %name, "{}", error);
        warnings.push(format!("{}: {}", name, error));
    }
}
