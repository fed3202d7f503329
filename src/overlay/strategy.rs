//! Integration strategies for the privilege overlay

use std::fs;
use std::path::Path;

use super::{IntegrationContext, IntegrationOutcome, PatchSet, PatchSummary, StrategyKind};
use crate::tools::{CommandOutput, Invocation};
use crate::workspace::copy_tree;

/// Driver location inside the base tree
pub const DRIVER_DIR: &str = "drivers/kernelsu";

/// Files that must exist in `DRIVER_DIR` for the driver to build
pub const DRIVER_REQUIRED_FILES: [&str; 2] = ["Kconfig", "Makefile"];

/// Self-contained setup script inside the overlay
const SETUP_SCRIPT: &str = "kernel/setup.sh";

/// Driver subtree inside the overlay
const DRIVER_SOURCE: &str = "kernel";

const PATCH_DIR: &str = "patches";

/// Copied verbatim from the overlay root when present
const AUX_DIRS: [&str; 2] = ["include", "fs"];

const MAKEFILE_LINE: &str = "obj-$(CONFIG_KSU) += kernelsu/";
const KCONFIG_LINE: &str = "source \"drivers/kernelsu/Kconfig\"";

/// Outcome of a single strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyAttempt {
    /// Post-condition satisfied; stop trying further strategies
    pub accepted: bool,
    pub outcome: IntegrationOutcome,
    pub evidence: Vec<String>,
    pub patches: PatchSummary,
    pub warnings: Vec<String>,
}

impl StrategyAttempt {
    fn rejected(warnings: Vec<String>) -> Self {
        Self {
            accepted: false,
            outcome: IntegrationOutcome::Failed,
            evidence: Vec::new(),
            patches: PatchSummary::default(),
            warnings,
        }
    }
}

/// One way of integrating an overlay
pub trait IntegrationStrategy {
    fn kind(&self) -> StrategyKind;

    /// Try to integrate and report evidence. Never fails the pipeline.
    fn attempt(&self, ctx: &IntegrationContext<'_>) -> StrategyAttempt;
}

/// Marker files present in the base tree, and the ones that are missing
fn check_markers(base: &Path) -> (Vec<String>, Vec<String>) {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for file in DRIVER_REQUIRED_FILES {
        let rel = format!("{}/{}", DRIVER_DIR, file);
        if base.join(&rel).is_file() {
            present.push(rel);
        } else {
            missing.push(rel);
        }
    }
    (present, missing)
}

/// Runs the overlay's own setup script, then verifies markers.
///
/// A zero exit is not trusted on its own; the driver files must exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomatedStrategy {
    variant: String,
}

impl AutomatedStrategy {
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
        }
    }
}

impl IntegrationStrategy for AutomatedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Automated
    }

    fn attempt(&self, ctx: &IntegrationContext<'_>) -> StrategyAttempt {
        let script = ctx.overlay.join(SETUP_SCRIPT);
        if !script.is_file() {
            tracing::debug!(script = %script.display(), "no setup script");
            return StrategyAttempt::rejected(Vec::new());
        }

        let inv = Invocation::new("bash")
            .arg(script.to_string_lossy())
            .arg(self.variant.as_str())
            .current_dir(ctx.base);
        let output = ctx.runner.run(&inv).unwrap_or_else(|e| CommandOutput {
            status: None,
            stdout: String::new(),
            stderr: e.to_string(),
        });
        if let Err(e) = ctx.transcript.record(&inv, &output) {
            tracing::debug!(error = %e, "could not write integration transcript");
        }

        if !output.success() {
            let warning = format!("setup script failed ({})", output.describe_status());
            tracing::warn!(status = %output.describe_status(), "setup script failed");
            return StrategyAttempt::rejected(vec![warning]);
        }

        let (present, missing) = check_markers(ctx.base);
        if !missing.is_empty() {
            let warning = format!(
                "setup script exited zero but markers are missing: {}",
                missing.join(", ")
            );
            tracing::warn!(missing = ?missing, "setup script left no integration markers");
            return StrategyAttempt::rejected(vec![warning]);
        }

        StrategyAttempt {
            accepted: true,
            outcome: IntegrationOutcome::Success,
            evidence: present,
            patches: PatchSummary::default(),
            warnings: Vec::new(),
        }
    }
}

/// Copies the driver subtree, applies patches and registers the driver.
///
/// Always accepted: `Success` when the required driver files exist afterwards,
/// `Partial` otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManualStrategy;

impl IntegrationStrategy for ManualStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Manual
    }

    fn attempt(&self, ctx: &IntegrationContext<'_>) -> StrategyAttempt {
        let mut warnings = Vec::new();

        let source = ctx.overlay.join(DRIVER_SOURCE);
        let driver_dir = ctx.base.join(DRIVER_DIR);
        if source.is_dir() {
            if let Err(e) = copy_tree(&source, &driver_dir) {
                tracing::warn!(error = %e, "copying driver subtree failed");
                warnings.push(format!("copying driver subtree failed: {}", e));
            }
        } else {
            warnings.push(format!("overlay has no {}/ subtree", DRIVER_SOURCE));
        }

        let (present, missing) = check_markers(ctx.base);
        for file in &missing {
            tracing::warn!(file = %file, "required driver file missing");
            warnings.push(format!("required driver file missing: {}", file));
        }

        let patches = match PatchSet::discover(&ctx.overlay.join(PATCH_DIR)) {
            Ok(set) => set.apply(ctx.runner, ctx.base, ctx.transcript, &mut warnings),
            Err(e) => {
                warnings.push(format!("cannot read patch directory: {}", e));
                PatchSummary::default()
            }
        };

        for dir in AUX_DIRS {
            let src = ctx.overlay.join(dir);
            if !src.is_dir() {
                continue;
            }
            // Best-effort
            if let Err(e) = copy_tree(&src, &ctx.base.join(dir)) {
                tracing::debug!(dir, error = %e, "auxiliary copy failed");
            }
        }

        if driver_dir.is_dir() {
            if let Err(e) = register_driver(ctx.base) {
                tracing::warn!(error = %e, "registering driver failed");
                warnings.push(format!("registering driver failed: {}", e));
            }
        }

        let outcome = if missing.is_empty() {
            IntegrationOutcome::Success
        } else {
            IntegrationOutcome::Partial
        };

        StrategyAttempt {
            accepted: true,
            outcome,
            evidence: present,
            patches,
            warnings,
        }
    }
}

/// Hook the driver into `drivers/Makefile` and `drivers/Kconfig`.
///
/// Each line is added only when absent. Missing build files are left alone.
pub fn register_driver(base: &Path) -> std::io::Result<()> {
    let makefile = base.join("drivers/Makefile");
    if makefile.is_file() {
        let text = fs::read_to_string(&makefile)?;
        if !text.lines().any(|l| l.trim() == MAKEFILE_LINE) {
            let mut updated = text;
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(MAKEFILE_LINE);
            updated.push('\n');
            fs::write(&makefile, updated)?;
        }
    }

    let kconfig = base.join("drivers/Kconfig");
    if kconfig.is_file() {
        let text = fs::read_to_string(&kconfig)?;
        if !text.lines().any(|l| l.trim() == KCONFIG_LINE) {
            fs::write(&kconfig, insert_before_endmenu(&text, KCONFIG_LINE))?;
        }
    }

    Ok(())
}

/// Insert `line` before the last `endmenu`, or append when there is none
fn insert_before_endmenu(text: &str, line: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    match lines.iter().rposition(|l| l.trim() == "endmenu") {
        Some(idx) => lines.insert(idx, line),
        None => lines.push(line),
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_driver_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let drivers = dir.path().join("drivers");
        fs::create_dir_all(&drivers).unwrap();
        fs::write(drivers.join("Makefile"), "obj-y += base/").unwrap();
        fs::write(
            drivers.join("Kconfig"),
            "menu \"Device Drivers\"\nsource \"drivers/base/Kconfig\"\nendmenu\n",
        )
        .unwrap();

        register_driver(dir.path()).unwrap();
        register_driver(dir.path()).unwrap();

        let makefile = fs::read_to_string(drivers.join("Makefile")).unwrap();
        assert_eq!(makefile, "obj-y += base/\nobj-$(CONFIG_KSU) += kernelsu/\n");

        let kconfig = fs::read_to_string(drivers.join("Kconfig")).unwrap();
        assert_eq!(kconfig.matches(KCONFIG_LINE).count(), 1);
        assert!(kconfig.trim_end().ends_with(&format!("{}\nendmenu", KCONFIG_LINE)));
    }

    #[test]
    fn test_register_driver_without_build_files() {
        let dir = tempfile::tempdir().unwrap();
        register_driver(dir.path()).unwrap();
        assert!(!dir.path().join("drivers/Makefile").exists());
    }

    #[test]
    fn test_insert_without_endmenu_appends() {
        assert_eq!(insert_before_endmenu("a\nb", "c"), "a\nb\nc\n");
    }

    #[test]
    fn test_check_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(DRIVER_DIR)).unwrap();
        fs::write(dir.path().join(DRIVER_DIR).join("Kconfig"), "").unwrap();

        let (present, missing) = check_markers(dir.path());
        assert_eq!(present, vec!["drivers/kernelsu/Kconfig"]);
        assert_eq!(missing, vec!["drivers/kernelsu/Makefile"]);
    }
}
