//! Build executor
//!
//! Drives the kernel build system. The image target's exit status is the
//! only success signal; build output goes to the transcript and is never
//! scanned for error strings. Module builds are best-effort.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::artifact::{remove_images, scan_boot, scan_modules, BuildArtifact};
use crate::config::Settings;
use crate::tools::{CommandRunner, Invocation, ToolError, Transcript};

/// Variables passed to every `make` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeEnv {
    pub arch: String,
    pub cross_compile: String,
    pub cross_compile_compat: Option<String>,
    pub clang: bool,
    pub jobs: usize,
    /// Out-of-tree build directory (`O=`)
    pub out_dir: PathBuf,
    pub vars: BTreeMap<String, String>,
}

impl MakeEnv {
    pub fn from_settings(settings: &Settings, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            arch: settings.device.arch.clone(),
            cross_compile: settings.toolchain.cross_compile.clone(),
            cross_compile_compat: settings.toolchain.cross_compile_compat.clone(),
            clang: settings.toolchain.clang,
            jobs: settings.jobs(),
            out_dir: out_dir.into(),
            vars: settings.toolchain.make_vars.clone(),
        }
    }

    /// `make -j<N> O=<out> ARCH=<arch> CROSS_COMPILE=<prefix> [CC=clang LLVM=1] <targets>`
    pub fn invocation(&self, kernel: &Path, targets: &[&str]) -> Invocation {
        let mut inv = Invocation::new("make")
            .arg(format!("-j{}", self.jobs.max(1)))
            .arg(format!("O={}", self.out_dir.display()))
            .arg(format!("ARCH={}", self.arch))
            .arg(format!("CROSS_COMPILE={}", self.cross_compile));
        if let Some(ref compat) = self.cross_compile_compat {
            inv = inv.arg(format!("CROSS_COMPILE_COMPAT={}", compat));
        }
        if self.clang {
            inv = inv.args(["CC=clang", "LLVM=1"]);
        }
        for (key, value) in &self.vars {
            inv = inv.arg(format!("{}={}", key, value));
        }
        inv.args(targets.iter().copied()).current_dir(kernel)
    }
}

/// What happened to the module build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModuleBuild {
    Built,
    Failed { status: String },
    Skipped,
}

/// Result of a successful image build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub image_target: String,
    pub artifacts: Vec<BuildArtifact>,
    pub modules: ModuleBuild,
    /// Transcript holding the output of every invocation
    pub log_path: PathBuf,
    pub warnings: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{target} failed ({status}); see {}", .log.display())]
    ImageFailed {
        target: String,
        status: String,
        log: PathBuf,
    },

    #[error("cannot open build log {}: {source}", .path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot remove previous image {}: {source}", .path.display())]
    StaleImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Runs the image and module builds
pub struct BuildExecutor<'r> {
    runner: &'r dyn CommandRunner,
    env: MakeEnv,
}

impl<'r> BuildExecutor<'r> {
    pub fn new(runner: &'r dyn CommandRunner, env: MakeEnv) -> Self {
        Self { runner, env }
    }

    /// Build `image_target`, then modules when requested.
    ///
    /// `external` lists out-of-tree module directories (`M=`) built after the
    /// in-tree modules. Module failures only add warnings. Output is appended
    /// to `log`.
    pub fn build(
        &self,
        kernel: &Path,
        image_target: &str,
        build_modules: bool,
        external: &[PathBuf],
        log: &Path,
    ) -> Result<BuildResult, BuildError> {
        let transcript = Transcript::open(log).map_err(|source| BuildError::Log {
            path: log.to_path_buf(),
            source,
        })?;
        let mut warnings = Vec::new();

        // The output directory outlives runs; only this build's image may be picked up
        let boot = crate::artifact::boot_dir(&self.env.out_dir, &self.env.arch);
        let stale = remove_images(&self.env.out_dir, &self.env.arch)
            .map_err(|source| BuildError::StaleImage { path: boot, source })?;
        for path in &stale {
            tracing::debug!(path = %path.display(), "removed previous image");
        }

        tracing::info!(image = image_target, jobs = self.env.jobs, "building image");
        let image = self.env.invocation(kernel, &[image_target]);
        self.note(&transcript, &image.to_string());
        let output = self.runner.run(&image.log_to(log))?;
        if !output.success() {
            return Err(BuildError::ImageFailed {
                target: image_target.to_string(),
                status: output.describe_status(),
                log: log.to_path_buf(),
            });
        }

        let mut artifacts = scan_boot(&self.env.out_dir, &self.env.arch);

        let modules = if build_modules {
            let state = self.run_modules(kernel, None, &transcript, log, &mut warnings)?;
            if state == ModuleBuild::Built {
                for dir in external {
                    self.run_modules(kernel, Some(dir), &transcript, log, &mut warnings)?;
                }
                artifacts.extend(scan_modules(&self.env.out_dir));
                for dir in external {
                    artifacts.extend(scan_modules(dir));
                }
            }
            state
        } else {
            ModuleBuild::Skipped
        };

        Ok(BuildResult {
            image_target: image_target.to_string(),
            artifacts,
            modules,
            log_path: log.to_path_buf(),
            warnings,
        })
    }

    fn run_modules(
        &self,
        kernel: &Path,
        external: Option<&PathBuf>,
        transcript: &Transcript,
        log: &Path,
        warnings: &mut Vec<String>,
    ) -> Result<ModuleBuild, BuildError> {
        let mut inv = self.env.invocation(kernel, &[]);
        if let Some(dir) = external {
            inv = inv.arg(format!("M={}", dir.display()));
        }
        let inv = inv.arg("modules");
        tracing::info!(external = ?external, "building modules");
        self.note(transcript, &inv.to_string());

        let output = self.runner.run(&inv.log_to(log))?;
        if output.success() {
            return Ok(ModuleBuild::Built);
        }

        let status = output.describe_status();
        let what = match external {
            Some(dir) => format!("external modules in {}", dir.display()),
            None => "modules".to_string(),
        };
        tracing::warn!(status = %status, "{} build failed, continuing", what);
        warnings.push(format!("{} build failed ({})", what, status));
        Ok(ModuleBuild::Failed { status })
    }

    fn note(&self, transcript: &Transcript, message: &str) {
        if let Err(e) = transcript.note(message) {
            tracing::debug!(error = %e, "could not write build transcript");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::tools::{CommandOutput, MockRunner};
    use std::fs;

    fn env(out: &Path) -> MakeEnv {
        let mut settings = Settings::default();
        settings.build.jobs = Some(4);
        MakeEnv::from_settings(&settings, out)
    }

    fn produce(path: PathBuf) -> impl Fn(&Invocation) -> CommandOutput + Send + Sync {
        move |_| {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"kernel").unwrap();
            CommandOutput::ok().with_stdout("  LD      vmlinux\n")
        }
    }

    #[test]
    fn test_invocation_shape() {
        let mut e = env(Path::new("/w/out/kernel"));
        e.vars.insert("LOCALVERSION".into(), "-kforge".into());
        let inv = e.invocation(Path::new("/w/kernel"), &["Image.gz-dtb"]);

        assert_eq!(
            inv.to_string(),
            "make -j4 O=/w/out/kernel ARCH=arm64 CROSS_COMPILE=aarch64-linux-gnu- \
             CC=clang LLVM=1 LOCALVERSION=-kforge Image.gz-dtb"
        );
        assert_eq!(inv.cwd.as_deref(), Some(Path::new("/w/kernel")));
    }

    #[test]
    fn test_successful_build_collects_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out/kernel");
        let log = dir.path().join("out/build.log");
        let runner = MockRunner::new();
        runner.on(
            |inv| inv.has_arg("Image.gz-dtb"),
            produce(out.join("arch/arm64/boot/Image.gz-dtb")),
        );
        runner.on(|inv| inv.has_arg("modules"), produce(out.join("drivers/x.ko")));

        let result = BuildExecutor::new(&runner, env(&out))
            .build(dir.path(), "Image.gz-dtb", true, &[], &log)
            .unwrap();

        assert_eq!(result.modules, ModuleBuild::Built);
        assert_eq!(result.artifacts[0].kind, ArtifactKind::ImageWithDtb);
        assert!(result.artifacts.iter().any(|a| a.kind == ArtifactKind::LoadableModule));
        assert!(fs::read_to_string(&log).unwrap().contains("LD      vmlinux"));
    }

    #[test]
    fn test_previous_image_variant_is_not_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out/kernel");
        let boot = out.join("arch/arm64/boot");
        fs::create_dir_all(&boot).unwrap();
        fs::write(boot.join("Image.gz-dtb"), b"from an earlier target").unwrap();
        let runner = MockRunner::new();
        runner.on(|inv| inv.has_arg("Image"), produce(boot.join("Image")));

        let result = BuildExecutor::new(&runner, env(&out))
            .build(dir.path(), "Image", false, &[], &dir.path().join("build.log"))
            .unwrap();

        assert!(!boot.join("Image.gz-dtb").exists());
        assert!(!result.artifacts.iter().any(|a| a.kind == ArtifactKind::ImageWithDtb));
        let image = crate::artifact::select_image(&result.artifacts).unwrap();
        assert_eq!(image.kind, ArtifactKind::RawImage);
    }

    #[test]
    fn test_image_failure_is_fatal_and_names_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("build.log");
        let runner = MockRunner::new();
        runner.on_program("make", |_| CommandOutput::failed(2, "error: implicit declaration"));

        let err = BuildExecutor::new(&runner, env(&dir.path().join("out")))
            .build(dir.path(), "Image.gz-dtb", true, &[], &log)
            .unwrap_err();

        assert!(err.to_string().contains("build.log"));
        assert_eq!(runner.calls_to("make").len(), 1);
        assert!(fs::read_to_string(&log).unwrap().contains("implicit declaration"));
    }

    #[test]
    fn test_error_text_with_zero_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = MockRunner::new();
        runner.on_program("make", |_| CommandOutput::ok().with_stdout("error: not really\n"));

        let result = BuildExecutor::new(&runner, env(&dir.path().join("out")))
            .build(dir.path(), "Image", false, &[], &dir.path().join("build.log"))
            .unwrap();
        assert_eq!(result.modules, ModuleBuild::Skipped);
    }

    #[test]
    fn test_module_failure_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let external = dir.path().join("modules");
        let runner = MockRunner::new();
        runner.on(|inv| inv.has_arg("modules"), |_| CommandOutput::failed(2, ""));

        let result = BuildExecutor::new(&runner, env(&dir.path().join("out")))
            .build(dir.path(), "Image", true, &[external], &dir.path().join("build.log"))
            .unwrap();

        assert!(matches!(result.modules, ModuleBuild::Failed { .. }));
        assert_eq!(result.warnings.len(), 1);
        // External trees are not attempted once in-tree modules failed
        assert_eq!(runner.calls_to("make").len(), 2);
    }

    #[test]
    fn test_external_module_trees() {
        let dir = tempfile::tempdir().unwrap();
        let external = dir.path().join("modules");
        let runner = MockRunner::new();
        runner.on(
            |inv| inv.args.iter().any(|a| a.starts_with("M=")),
            produce(external.join("wlan.ko")),
        );

        let result = BuildExecutor::new(&runner, env(&dir.path().join("out")))
            .build(dir.path(), "Image", true, &[external.clone()], &dir.path().join("build.log"))
            .unwrap();

        let calls = runner.calls_to("make");
        assert_eq!(calls.len(), 3);
        assert!(calls[2].has_arg(&format!("M={}", external.display())));
        assert!(result.artifacts.iter().any(|a| a.file_name() == "wlan.ko"));
    }
}
