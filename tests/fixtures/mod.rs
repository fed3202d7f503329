//! Workspace fixtures for integration tests
//!
//! Builds throwaway workspaces with a minimal kernel tree, overlay trees and
//! a packaging framework, and a scripted runner that emulates `make`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kforge::config::Settings;
use kforge::features::FeatureState;
use kforge::pipeline::{Pipeline, PipelineOptions};
use kforge::signal::InterruptState;
use kforge::tools::{CommandOutput, CommandRunner, Invocation, MockRunner};
use kforge::workspace::Workspace;
use tempfile::TempDir;

pub const DRIVERS_KCONFIG: &str = "menu \"Device Drivers\"\n\nsource \"drivers/base/Kconfig\"\n\nendmenu\n";

/// A temporary workspace plus the runner scripted against it
pub struct Fixture {
    pub dir: TempDir,
    pub ws: Workspace,
    pub runner: Arc<MockRunner>,
    pub interrupt: Arc<InterruptState>,
}

impl Fixture {
    /// Empty workspace; no trees on disk
    pub fn empty() -> Self {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        Self {
            dir,
            ws,
            runner: Arc::new(MockRunner::new()),
            interrupt: Arc::new(InterruptState::new()),
        }
    }

    /// Workspace with a kernel tree and a `make` that produces `images`
    pub fn with_kernel(images: &[&str]) -> Self {
        let fixture = Self::empty();
        write_kernel_tree(&fixture.ws.tree_path("kernel"));
        make_produces(&fixture.runner, &fixture.ws.kernel_out(), images);
        fixture
    }

    pub fn kernel(&self) -> PathBuf {
        self.ws.tree_path("kernel")
    }

    pub fn pipeline(&self, settings: Settings, features: FeatureState) -> Pipeline {
        let runner: Arc<dyn CommandRunner> = self.runner.clone();
        Pipeline::new(
            runner,
            self.interrupt.clone(),
            PipelineOptions {
                workspace: self.ws.clone(),
                settings,
                features,
            },
        )
    }
}

pub fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Minimal kernel source layout: a baseline defconfig and driver build files
pub fn write_kernel_tree(root: &Path) {
    write(
        &root.join("arch/arm64/configs/gki_defconfig"),
        "CONFIG_LOCALVERSION=\"-gki\"\nCONFIG_MODULES=y\n# CONFIG_OVERLAY_FS is not set\n",
    );
    write(&root.join("drivers/Makefile"), "obj-y += base/\n");
    write(&root.join("drivers/Kconfig"), DRIVERS_KCONFIG);
    write(&root.join("fs/namei.c"), "int vfs_create(void);\n");
    write(&root.join("Makefile"), "VERSION = 6\nPATCHLEVEL = 1\n");
}

/// Privilege overlay checkout. `driver_files` are created under `kernel/`.
pub fn write_ksu_overlay(root: &Path, driver_files: &[&str], setup_script: bool) {
    for file in driver_files {
        write(&root.join("kernel").join(file), "# driver\n");
    }
    write(&root.join("kernel/ksu.c"), "int ksu_init(void);\n");
    if setup_script {
        write(&root.join("kernel/setup.sh"), "#!/bin/sh\nexit 0\n");
    }
}

/// Filesystem-hiding overlay with two patches, fs/ sources and the header
pub fn write_susfs_overlay(root: &Path) {
    write(
        &root.join("kernel_patches/50_add_susfs_in_gki.patch"),
        "--- a/fs/namei.c\n+++ b/fs/namei.c\n",
    );
    write(
        &root.join("kernel_patches/60_namespace.patch"),
        "--- a/fs/namespace.c\n+++ b/fs/namespace.c\n",
    );
    write(&root.join("kernel_patches/fs/susfs.c"), "int susfs_init(void);\n");
    write(
        &root.join("kernel_patches/include/linux/susfs.h"),
        "#ifndef KS_SUSFS_H\n#define KS_SUSFS_H\n#endif\n",
    );
}

/// AnyKernel3-style packaging framework checkout
pub fn write_anykernel(root: &Path) {
    write(&root.join("tools/ak3-core.sh"), "# core\n");
    write(&root.join("META-INF/com/google/android/update-binary"), "#!/sbin/sh\n");
    write(&root.join("README.md"), "# AnyKernel3\n");
    write(&root.join("LICENSE"), "GPL\n");
    write(&root.join(".git/HEAD"), "ref: refs/heads/master\n");
    write(
        &root.join("anykernel.sh"),
        "### AnyKernel3 Ramdisk Mod Script\nproperties() { '\nkernel.string=placeholder\n'; } # end properties\n\n. tools/ak3-core.sh;\n",
    );
}

/// Script `make`: image targets write the listed boot images and a dtb
pub fn make_produces(runner: &MockRunner, out: &Path, images: &[&str]) {
    let boot = out.join("arch/arm64/boot");
    let images: Vec<String> = images.iter().map(|s| s.to_string()).collect();
    runner.on(
        |inv| inv.program == "make" && inv.args.iter().any(|a| a.starts_with("Image")),
        move |_| {
            for image in &images {
                write(&boot.join(image), "kernel image");
            }
            if !images.is_empty() {
                write(&boot.join("dts/vendor/qcom/kona.dtb"), "dtb");
            }
            CommandOutput::ok().with_stdout("  OBJCOPY arch/arm64/boot/Image\n")
        },
    );
}

/// Script `zip`: write a placeholder archive at the destination argument
pub fn zip_writes_archive(runner: &MockRunner) {
    runner.on(
        |inv| inv.program == "zip" && !inv.has_arg("--version"),
        |inv| {
            write(Path::new(&inv.args[4]), "PK");
            CommandOutput::ok()
        },
    );
}

/// True when the invocation is a real (non dry-run) `patch`
pub fn is_patch_commit(inv: &Invocation) -> bool {
    inv.program == "patch" && !inv.has_arg("--dry-run") && !inv.has_arg("--version")
}

/// Settings with every source tree configured
pub fn settings() -> Settings {
    let mut settings = Settings::default();
    for name in ["kernel", "dtbs", "modules"] {
        if let Some(repo) = settings.repos.get_mut(name) {
            repo.url = format!("https://example.invalid/{}", name);
        }
    }
    settings.device.names = vec!["kona".to_string()];
    settings.build.jobs = Some(2);
    settings
}
