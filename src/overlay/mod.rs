//! Feature overlay integration
//!
//! Integrates optional, independently sourced trees into the base kernel
//! tree. Each overlay runs an ordered list of strategies; the first one whose
//! evidence satisfies the post-condition wins. Integration problems never
//! abort the pipeline, they are reported in `IntegrationReport`.
//!
//! Overlays are integrated in a fixed order, privilege overlay first. No
//! attempt is made to detect conflicting edits between overlays.

mod hiding;
mod patchset;
mod strategy;

pub use hiding::{HidingStrategy, HIDING_HEADER, HIDING_PATCH_DIR};
pub use patchset::{PatchOutcome, PatchResult, PatchSet, PatchSummary};
pub use strategy::{
    AutomatedStrategy, IntegrationStrategy, ManualStrategy, StrategyAttempt, DRIVER_DIR,
    DRIVER_REQUIRED_FILES,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tools::{CommandRunner, Transcript};

/// Which strategy produced the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Automated,
    Manual,
    NoneAttempted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationOutcome {
    Success,
    Partial,
    Failed,
    /// Overlay disabled; the base tree was not touched
    Skipped,
}

impl IntegrationOutcome {
    /// Anything short of a clean integration
    pub fn is_degraded(&self) -> bool {
        matches!(self, IntegrationOutcome::Partial | IntegrationOutcome::Failed)
    }
}

/// How an overlay is shaped and therefore which strategies apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayLayout {
    /// Driver subtree, setup script and patches
    Privilege {
        /// Named variant passed to the setup script
        variant: String,
    },
    /// Patches plus filesystem and header subtrees
    FsHiding,
}

/// An optional enhancement integrated into the base tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureOverlay {
    pub name: String,
    /// Local checkout of the overlay
    pub tree: PathBuf,
    pub enabled: bool,
    pub layout: OverlayLayout,
}

impl FeatureOverlay {
    pub fn privilege(name: impl Into<String>, tree: impl Into<PathBuf>, variant: &str) -> Self {
        Self {
            name: name.into(),
            tree: tree.into(),
            enabled: true,
            layout: OverlayLayout::Privilege {
                variant: variant.to_string(),
            },
        }
    }

    pub fn fs_hiding(name: impl Into<String>, tree: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            tree: tree.into(),
            enabled: true,
            layout: OverlayLayout::FsHiding,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Candidate strategies in the order they are tried
    pub fn strategies(&self) -> Vec<Box<dyn IntegrationStrategy>> {
        match &self.layout {
            OverlayLayout::Privilege { variant } => vec![
                Box::new(AutomatedStrategy::new(variant.clone())),
                Box::new(ManualStrategy),
            ],
            OverlayLayout::FsHiding => vec![Box::new(HidingStrategy)],
        }
    }
}

/// Everything a strategy needs to act on one overlay
pub struct IntegrationContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub transcript: &'a Transcript,
    /// Overlay checkout
    pub overlay: &'a Path,
    /// Base kernel tree
    pub base: &'a Path,
}

/// Result of integrating one overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub overlay: String,
    pub outcome: IntegrationOutcome,
    pub strategy: StrategyKind,
    /// Strategies tried, in order
    pub attempted: Vec<StrategyKind>,
    /// Verifiable facts backing the outcome (marker files found, header present)
    pub evidence: Vec<String>,
    #[serde(default)]
    pub patches: PatchSummary,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl IntegrationReport {
    fn skipped(overlay: &str) -> Self {
        Self {
            overlay: overlay.to_string(),
            outcome: IntegrationOutcome::Skipped,
            strategy: StrategyKind::NoneAttempted,
            attempted: Vec::new(),
            evidence: Vec::new(),
            patches: PatchSummary::default(),
            warnings: Vec::new(),
        }
    }
}

/// Runs overlay strategies against the base tree
pub struct Integrator<'a> {
    runner: &'a dyn CommandRunner,
    transcript: &'a Transcript,
}

impl<'a> Integrator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, transcript: &'a Transcript) -> Self {
        Self { runner, transcript }
    }

    /// Integrate one overlay.
    ///
    /// A disabled overlay is a no-op. Otherwise strategies run in order until
    /// one is accepted; warnings from rejected strategies are kept.
    pub fn integrate(&self, overlay: &FeatureOverlay, base: &Path) -> IntegrationReport {
        if !overlay.enabled {
            tracing::info!(overlay = %overlay.name, "disabled, skipping");
            return IntegrationReport::skipped(&overlay.name);
        }

        let mut report = IntegrationReport::skipped(&overlay.name);
        report.outcome = IntegrationOutcome::Failed;

        if !overlay.tree.is_dir() {
            let warning = format!("{}: overlay tree {} not present", overlay.name, overlay.tree.display());
            tracing::warn!(overlay = %overlay.name, "overlay tree not present");
            report.warnings.push(warning);
            return report;
        }

        self.note(&format!("integrating {}", overlay.name));
        let ctx = IntegrationContext {
            runner: self.runner,
            transcript: self.transcript,
            overlay: &overlay.tree,
            base,
        };

        for strategy in overlay.strategies() {
            let kind = strategy.kind();
            report.attempted.push(kind);
            tracing::info!(overlay = %overlay.name, strategy = ?kind, "trying strategy");

            let attempt = strategy.attempt(&ctx);
            report.warnings.extend(attempt.warnings);

            if attempt.accepted {
                report.strategy = kind;
                report.outcome = attempt.outcome;
                report.evidence = attempt.evidence;
                report.patches = attempt.patches;
                break;
            }
            tracing::info!(overlay = %overlay.name, strategy = ?kind, "not accepted, falling through");
        }

        if report.strategy == StrategyKind::NoneAttempted {
            tracing::warn!(overlay = %overlay.name, "no strategy succeeded");
        } else {
            tracing::info!(
                overlay = %overlay.name,
                outcome = ?report.outcome,
                strategy = ?report.strategy,
                patches_applied = report.patches.applied(),
                patches_total = report.patches.total(),
                "integrated"
            );
        }
        self.note(&format!("{}: {:?}", overlay.name, report.outcome));
        report
    }

    fn note(&self, message: &str) {
        if let Err(e) = self.transcript.note(message) {
            tracing::debug!(error = %e, "could not write integration transcript");
        }
    }
}
