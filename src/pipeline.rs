//! Pipeline orchestration
//!
//! Runs the stages strictly in order:
//! - preflight (every external tool present, before any mutation)
//! - sync source trees
//! - integrate feature overlays
//! - compose the kernel configuration
//! - build image and modules
//! - package
//!
//! The interrupt flag is checked between stages and between steps inside a
//! stage. `out/run_summary.json` is written whatever the outcome.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use ulid::Ulid;

use crate::artifact::select_image;
use crate::build::{BuildError, BuildExecutor, BuildResult, MakeEnv};
use crate::compose::{ComposeError, ComposeRequest, Composer};
use crate::config::{ConfigError, Settings};
use crate::features::FeatureState;
use crate::overlay::{FeatureOverlay, Integrator};
use crate::package::{PackageError, Packager};
use crate::signal::{InterruptState, EXIT_CODE_INTERRUPTED};
use crate::summary::{Diagnostics, RunSummary, Stage, StageStatus, TreeRecord};
use crate::sync::{tree, SourceTree, SyncError, Synchronizer};
use crate::toolchain::{self, ToolchainError};
use crate::tools::{CommandRunner, Transcript};
use crate::workspace::Workspace;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("essential source tree unavailable: {0}")]
    Sync(#[from] SyncError),

    #[error("config composition failed: {0}")]
    Compose(#[from] ComposeError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("packaging failed: {0}")]
    Package(#[from] PackageError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("interrupted")]
    Interrupted,
}

impl PipelineError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Interrupted => EXIT_CODE_INTERRUPTED,
            _ => 1,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Everything a run needs besides the runner
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workspace: Workspace,
    pub settings: Settings,
    pub features: FeatureState,
}

/// Presence and revision of one source tree
#[derive(Debug, Clone, serde::Serialize)]
pub struct TreeStatus {
    pub name: String,
    pub path: PathBuf,
    pub present: bool,
    /// Configured clone URL (empty when not configured)
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Workspace status: source trees plus the last run, if any
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub workspace: PathBuf,
    pub trees: Vec<TreeStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunSummary>,
}

/// Outcome of a standalone sync
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub trees: Vec<TreeRecord>,
    pub warnings: Vec<String>,
}

/// Sequential build pipeline
pub struct Pipeline {
    runner: Arc<dyn CommandRunner>,
    interrupt: Arc<InterruptState>,
    options: PipelineOptions,
}

/// Mutable bookkeeping carried through one run
struct RunContext {
    summary: RunSummary,
    diag: Diagnostics,
}

impl Pipeline {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        interrupt: Arc<InterruptState>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            runner,
            interrupt,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    fn workspace(&self) -> &Workspace {
        &self.options.workspace
    }

    fn settings(&self) -> &Settings {
        &self.options.settings
    }

    /// Run every stage and persist the run summary.
    ///
    /// The summary is written before returning, on success and on error.
    pub fn run(&self) -> PipelineResult<RunSummary> {
        let run_id = Ulid::new().to_string();
        tracing::info!(
            run_id = %run_id,
            workspace = %self.workspace().root().display(),
            features = self.options.features.tag(),
            "starting run"
        );

        let mut ctx = RunContext {
            summary: RunSummary::begin(run_id, self.options.features),
            diag: Diagnostics::new(),
        };

        let result = self.run_stages(&mut ctx);
        let exit_code = match result {
            Ok(()) => 0,
            Err(ref e) => e.exit_code(),
        };

        let RunContext { mut summary, diag } = ctx;
        summary.finish(exit_code, diag.into_warnings());

        let path = self.workspace().summary_path();
        if let Err(e) = summary.write_to_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "could not write run summary");
        }

        match result {
            Ok(()) => {
                tracing::info!(warnings = summary.warning_count, "{}", summary.human_summary);
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(exit_code, "{}", summary.human_summary);
                Err(e)
            }
        }
    }

    fn run_stages(&self, ctx: &mut RunContext) -> PipelineResult<()> {
        self.stage(ctx, Stage::Preflight, |p, _| {
            toolchain::preflight(p.runner(), p.settings(), &p.options.features)?;
            Ok(None)
        })?;

        self.stage(ctx, Stage::Sync, |p, ctx| p.sync_stage(ctx))?;
        self.stage(ctx, Stage::Integrate, |p, ctx| p.integrate_stage(ctx))?;

        let env = MakeEnv::from_settings(self.settings(), self.workspace().kernel_out());
        self.stage(ctx, Stage::Compose, |p, ctx| p.compose_stage(ctx, &env))?;

        let mut built: Option<BuildResult> = None;
        self.stage(ctx, Stage::Build, |p, ctx| {
            let result = p.build_stage(ctx, env.clone())?;
            let detail = select_image(&result.artifacts).map(|a| a.file_name());
            built = Some(result);
            Ok(detail)
        })?;

        let artifacts = built.map(|b| b.artifacts).unwrap_or_default();
        self.stage(ctx, Stage::Package, |p, ctx| p.package_stage(ctx, &artifacts))?;
        Ok(())
    }

    /// Run one stage and record its outcome.
    ///
    /// A stage that added warnings is recorded as degraded. An error while
    /// the interrupt flag is set counts as an interruption.
    fn stage<F>(&self, ctx: &mut RunContext, stage: Stage, body: F) -> PipelineResult<()>
    where
        F: FnOnce(&Self, &mut RunContext) -> PipelineResult<Option<String>>,
    {
        if self.interrupt.is_interrupted() {
            ctx.summary.record(stage, StageStatus::Interrupted, None);
            return Err(PipelineError::Interrupted);
        }

        tracing::info!(stage = %stage, "stage started");
        let warnings_before = ctx.diag.count_for(stage);

        match body(self, ctx) {
            Ok(detail) => {
                let status = if ctx.diag.count_for(stage) > warnings_before {
                    StageStatus::Degraded
                } else {
                    StageStatus::Succeeded
                };
                tracing::info!(stage = %stage, status = %status, "stage finished");
                ctx.summary.record(stage, status, detail);
                Ok(())
            }
            Err(e) if self.interrupt.is_interrupted() || matches!(e, PipelineError::Interrupted) => {
                tracing::warn!(stage = %stage, "interrupted");
                ctx.summary.record(stage, StageStatus::Interrupted, None);
                Err(PipelineError::Interrupted)
            }
            Err(e) => {
                tracing::error!(stage = %stage, error = %e, "stage failed");
                ctx.summary.record(stage, StageStatus::Failed, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn checkpoint(&self) -> PipelineResult<()> {
        if self.interrupt.is_interrupted() {
            Err(PipelineError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Trees the build needs, overlays only when enabled
    fn build_trees(&self) -> Vec<&'static str> {
        let features = &self.options.features;
        let mut names = vec![tree::KERNEL, tree::DTBS, tree::MODULES];
        if features.ksu {
            names.push(tree::KSU);
        }
        if features.susfs {
            names.push(tree::SUSFS);
        }
        names
    }

    fn sync_stage(&self, ctx: &mut RunContext) -> PipelineResult<Option<String>> {
        let synchronizer = Synchronizer::new(self.runner());

        for name in self.build_trees() {
            self.checkpoint()?;
            let mut source = SourceTree::from_settings(self.workspace(), self.settings(), name);

            if !source.is_present() && self.settings().repo(name).is_none() && !tree::is_essential(name) {
                tracing::debug!(tree = name, "not configured, skipping");
                ctx.summary.trees.push(self.tree_record(&source));
                continue;
            }

            if let Err(e) = synchronizer.sync(&mut source) {
                if tree::is_essential(name) && !(e.tree_usable() && source.is_present()) {
                    ctx.summary.trees.push(self.tree_record(&source));
                    return Err(e.into());
                }
                tracing::warn!(tree = name, error = %e, "sync problem, continuing");
                ctx.diag.warn(Stage::Sync, e.to_string());
            }
            ctx.summary.trees.push(self.tree_record(&source));
        }

        Ok(None)
    }

    fn tree_record(&self, source: &SourceTree) -> TreeRecord {
        let revision = if source.is_present() {
            Synchronizer::new(self.runner()).head_revision(&source.path)
        } else {
            None
        };
        TreeRecord {
            name: source.name.clone(),
            state: source.state,
            revision,
        }
    }

    /// Overlays in integration order
    fn overlays(&self) -> Vec<FeatureOverlay> {
        let ws = self.workspace();
        let features = &self.options.features;
        vec![
            FeatureOverlay::privilege(
                tree::KSU,
                ws.tree_path(tree::KSU),
                &self.settings().features.ksu_variant,
            )
            .enabled(features.ksu),
            FeatureOverlay::fs_hiding(tree::SUSFS, ws.tree_path(tree::SUSFS)).enabled(features.susfs),
        ]
    }

    fn integrate_stage(&self, ctx: &mut RunContext) -> PipelineResult<Option<String>> {
        let transcript = Transcript::create(self.workspace().integration_log())?;
        let integrator = Integrator::new(self.runner(), &transcript);
        let base = self.workspace().tree_path(tree::KERNEL);

        for overlay in self.overlays() {
            self.checkpoint()?;
            let report = integrator.integrate(&overlay, &base);
            ctx.diag.extend(Stage::Integrate, report.warnings.iter().cloned());
            if report.outcome.is_degraded() {
                ctx.diag.warn(
                    Stage::Integrate,
                    format!("{}: integration {:?}", report.overlay, report.outcome),
                );
            }
            ctx.summary.overlays.push(report);
        }

        if self.options.features.any_overlay() {
            Ok(None)
        } else {
            Ok(Some("no overlays enabled".to_string()))
        }
    }

    fn compose_stage(&self, ctx: &mut RunContext, env: &MakeEnv) -> PipelineResult<Option<String>> {
        // The build log starts here so config resolution output is kept with the build.
        let transcript = Transcript::create(self.workspace().build_log())?;
        let kernel = self.workspace().tree_path(tree::KERNEL);
        let extra: Vec<PathBuf> = self
            .settings()
            .features
            .extra_fragments
            .iter()
            .map(|f| self.workspace().root().join(f))
            .collect();

        let request = ComposeRequest {
            kernel: &kernel,
            device: &self.settings().device,
            features: &self.options.features,
            extra_fragments: &extra,
        };
        let composed = Composer::new(self.runner(), env).compose(&request, &transcript)?;
        ctx.diag.extend(Stage::Compose, composed.warnings);

        Ok(composed.baseline)
    }

    fn build_stage(&self, ctx: &mut RunContext, env: MakeEnv) -> PipelineResult<BuildResult> {
        let ws = self.workspace();
        let kernel = ws.tree_path(tree::KERNEL);
        let external: Vec<PathBuf> = [ws.tree_path(tree::MODULES)]
            .into_iter()
            .filter(|dir| dir.join("Makefile").is_file() || dir.join("Kbuild").is_file())
            .collect();

        let result = BuildExecutor::new(self.runner(), env).build(
            &kernel,
            &self.settings().build.image_target,
            self.settings().build.modules,
            &external,
            &ws.build_log(),
        )?;
        ctx.diag.extend(Stage::Build, result.warnings.iter().cloned());
        Ok(result)
    }

    fn package_stage(
        &self,
        ctx: &mut RunContext,
        artifacts: &[crate::artifact::BuildArtifact],
    ) -> PipelineResult<Option<String>> {
        let ws = self.workspace();
        let mut framework = SourceTree::from_settings(ws, self.settings(), tree::ANYKERNEL);

        let output = Packager::new(self.runner(), self.settings(), ws.dist_dir()).package(
            artifacts,
            &self.options.features,
            &mut framework,
            Local::now(),
        )?;
        ctx.diag.extend(Stage::Package, output.warnings.iter().cloned());

        let image = output
            .image
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        ctx.summary.image = image.clone();
        ctx.summary.archive = output
            .archive
            .as_ref()
            .map(|p| p.display().to_string());

        Ok(ctx.summary.archive.clone().or(image))
    }

    /// Synchronize every known tree; only an unusable kernel tree is an error
    pub fn sync_all(&self) -> PipelineResult<SyncReport> {
        let synchronizer = Synchronizer::new(self.runner());
        let mut report = SyncReport::default();

        for name in tree::ALL {
            self.checkpoint()?;
            let mut source = SourceTree::from_settings(self.workspace(), self.settings(), name);
            if let Err(e) = synchronizer.sync(&mut source) {
                if tree::is_essential(name) && !(e.tree_usable() && source.is_present()) {
                    return Err(e.into());
                }
                tracing::warn!(tree = name, error = %e, "sync problem");
                report.warnings.push(e.to_string());
            }
            report.trees.push(self.tree_record(&source));
        }

        Ok(report)
    }

    /// Presence of every tree plus the last run summary
    pub fn status(&self) -> StatusReport {
        let synchronizer = Synchronizer::new(self.runner());
        let trees = tree::ALL
            .iter()
            .map(|&name| {
                let source = SourceTree::from_settings(self.workspace(), self.settings(), name);
                let present = source.is_present();
                TreeStatus {
                    revision: if present {
                        synchronizer.head_revision(&source.path)
                    } else {
                        None
                    },
                    name: source.name,
                    path: source.path,
                    present,
                    url: source.url,
                }
            })
            .collect();

        let last_run = RunSummary::from_file(&self.workspace().summary_path()).ok();

        StatusReport {
            workspace: self.workspace().root().to_path_buf(),
            trees,
            last_run,
        }
    }
}
