//! Patch sets applied with the dry-run/commit protocol
//!
//! Every patch is first tried with `--dry-run`. Only a patch whose trial run
//! exits zero is applied for real. Patches are independent: one failure never
//! stops the rest.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::tools::{CommandOutput, CommandRunner, Invocation, Transcript};

/// What happened to one patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOutcome {
    Applied,
    /// Dry run predicted failure; never attempted for real
    SkippedWouldFail,
    /// Dry run passed but the real application did not
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    /// File name of the patch
    pub patch: String,
    pub outcome: PatchOutcome,
}

/// Per-patch outcomes of one patch set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSummary {
    pub results: Vec<PatchResult>,
}

impl PatchSummary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn applied(&self) -> usize {
        self.count(PatchOutcome::Applied)
    }

    pub fn skipped(&self) -> usize {
        self.count(PatchOutcome::SkippedWouldFail)
    }

    pub fn failed(&self) -> usize {
        self.count(PatchOutcome::Failed)
    }

    /// True when every patch applied (vacuously true for an empty set)
    pub fn all_applied(&self) -> bool {
        self.applied() == self.total()
    }

    fn count(&self, outcome: PatchOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

/// Ordered patch files belonging to one overlay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSet {
    patches: Vec<PathBuf>,
}

impl PatchSet {
    /// Collect `*.patch` files directly under `dir`, ordered by file name.
    ///
    /// A missing directory yields an empty set.
    pub fn discover(dir: &Path) -> std::io::Result<Self> {
        if !dir.is_dir() {
            return Ok(Self::default());
        }

        let mut patches = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "patch") {
                patches.push(path);
            }
        }
        patches.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(Self { patches })
    }

    pub fn patches(&self) -> &[PathBuf] {
        &self.patches
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Apply every patch to `base` in order.
    ///
    /// Outcomes are recorded per patch and each non-applied patch produces
    /// one warning.
    pub fn apply(
        &self,
        runner: &dyn CommandRunner,
        base: &Path,
        transcript: &Transcript,
        warnings: &mut Vec<String>,
    ) -> PatchSummary {
        let mut summary = PatchSummary::default();

        for path in &self.patches {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());

            let outcome = apply_one(runner, base, path, transcript);
            match outcome {
                PatchOutcome::Applied => {
                    tracing::info!(patch = %name, "applied");
                }
                PatchOutcome::SkippedWouldFail => {
                    tracing::warn!(patch = %name, "dry run failed, skipping");
                    warnings.push(format!("{}: dry run failed, not applied", name));
                }
                PatchOutcome::Failed => {
                    tracing::warn!(patch = %name, "apply failed after a clean dry run");
                    warnings.push(format!("{}: apply failed after a clean dry run", name));
                }
            }
            summary.results.push(PatchResult {
                patch: name,
                outcome,
            });
        }

        summary
    }
}

fn apply_one(
    runner: &dyn CommandRunner,
    base: &Path,
    patch: &Path,
    transcript: &Transcript,
) -> PatchOutcome {
    let invocation = |dry_run: bool| {
        let mut inv = Invocation::new("patch").args(["-p1", "--forward"]);
        if dry_run {
            inv = inv.arg("--dry-run");
        }
        inv.arg("-i").arg(patch.to_string_lossy()).current_dir(base)
    };

    let run = |inv: Invocation| -> bool {
        let output = runner.run(&inv).unwrap_or_else(|e| CommandOutput {
            status: None,
            stdout: String::new(),
            stderr: e.to_string(),
        });
        if let Err(e) = transcript.record(&inv, &output) {
            tracing::debug!(error = %e, "could not write integration transcript");
        }
        output.success()
    };

    if !run(invocation(true)) {
        return PatchOutcome::SkippedWouldFail;
    }
    if !run(invocation(false)) {
        return PatchOutcome::Failed;
    }
    PatchOutcome::Applied
}
