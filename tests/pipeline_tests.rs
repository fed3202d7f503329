//! End-to-end pipeline tests
//!
//! Full runs against a scripted runner: stage ordering, exit codes,
//! packaging and the persisted run summary.

mod fixtures;

use std::fs;

use fixtures::Fixture;
use kforge::build::BuildError;
use kforge::features::FeatureState;
use kforge::package::{PackageError, INSTALLER_SCRIPT};
use kforge::pipeline::PipelineError;
use kforge::summary::{RunStatus, RunSummary, Stage, StageStatus};
use kforge::toolchain::ToolchainError;
use kforge::tools::CommandOutput;
use kforge::workspace::tree_digest;

fn stock_no_zip() -> FeatureState {
    FeatureState {
        ksu: false,
        susfs: false,
        zip: false,
    }
}

#[test]
fn test_stock_run_leaves_kernel_tree_alone() {
    let fixture = Fixture::with_kernel(&["Image.gz-dtb", "Image.gz", "Image"]);
    let before = tree_digest(&fixture.kernel()).unwrap();

    let summary = fixture
        .pipeline(fixtures::settings(), stock_no_zip())
        .run()
        .unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.exit_code, 0);
    for stage in Stage::ALL {
        assert_eq!(summary.stage(stage).unwrap().status, StageStatus::Succeeded, "{}", stage);
    }
    assert_eq!(tree_digest(&fixture.kernel()).unwrap(), before);
    assert!(fixture.runner.calls_to("bash").is_empty());
    assert!(fixture.runner.calls_to("patch").is_empty());

    // Lone defconfig: the kernel expands it, no olddefconfig pass
    let make = fixture.runner.calls_to("make");
    assert!(make.iter().any(|inv| inv.has_arg("gki_defconfig")));
    assert!(!make.iter().any(|inv| inv.has_arg("olddefconfig")));

    let dist = fixture.ws.dist_dir();
    assert!(dist.join("Image.gz-dtb").is_file());
    assert!(dist.join("kona.dtb").is_file());
    assert!(!dist.join("Image").exists());
    assert!(summary.archive.is_none());

    let persisted = RunSummary::from_file(&fixture.ws.summary_path()).unwrap();
    assert_eq!(persisted.run_id, summary.run_id);
    assert!(persisted.human_summary.starts_with("Build succeeded [stock]: Image.gz-dtb"));
}

#[test]
fn test_raw_image_is_last_resort() {
    let fixture = Fixture::with_kernel(&["Image"]);

    let summary = fixture
        .pipeline(fixtures::settings(), stock_no_zip())
        .run()
        .unwrap();

    assert_eq!(summary.image.as_deref(), Some("Image"));
    assert!(fixture.ws.dist_dir().join("Image").is_file());
}

#[test]
fn test_packaging_failure_keeps_successful_build() {
    let fixture = Fixture::with_kernel(&[]);

    let err = fixture
        .pipeline(fixtures::settings(), stock_no_zip())
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::Package(PackageError::NoImage)));
    assert_eq!(err.exit_code(), 1);

    let summary = RunSummary::from_file(&fixture.ws.summary_path()).unwrap();
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.exit_code, 1);
    assert_eq!(summary.stage(Stage::Build).unwrap().status, StageStatus::Succeeded);
    let package = summary.stage(Stage::Package).unwrap();
    assert_eq!(package.status, StageStatus::Failed);
    assert!(package.detail.as_deref().unwrap().contains("no kernel image"));
    assert!(summary.human_summary.starts_with("package failed"));
}

#[test]
fn test_image_build_failure_skips_packaging() {
    let fixture = Fixture::with_kernel(&["Image.gz-dtb"]);
    fixture.runner.on(
        |inv| inv.program == "make" && inv.has_arg("Image.gz-dtb"),
        |_| CommandOutput::failed(2, "drivers/kernelsu/ksu.c:1: error: expected ';'"),
    );

    let err = fixture
        .pipeline(fixtures::settings(), stock_no_zip())
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::Build(BuildError::ImageFailed { .. })));
    let summary = RunSummary::from_file(&fixture.ws.summary_path()).unwrap();
    assert_eq!(summary.stage(Stage::Build).unwrap().status, StageStatus::Failed);
    assert_eq!(summary.stage(Stage::Package).unwrap().status, StageStatus::Skipped);

    let log = fs::read_to_string(fixture.ws.build_log()).unwrap();
    assert!(log.contains("gki_defconfig"));
    assert!(log.contains("expected ';'"));
}

#[test]
fn test_archive_is_named_and_staged() {
    let fixture = Fixture::with_kernel(&["Image.gz-dtb"]);
    fixtures::write_anykernel(&fixture.ws.tree_path("anykernel"));
    fixtures::zip_writes_archive(&fixture.runner);

    let summary = fixture
        .pipeline(fixtures::settings(), FeatureState::stock())
        .run()
        .unwrap();

    let archive = summary.archive.clone().unwrap();
    let name = std::path::Path::new(&archive)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    let stamp = name
        .strip_prefix("kforge-stock-")
        .and_then(|rest| rest.strip_suffix(".zip"))
        .unwrap();
    assert_eq!(stamp.len(), "YYYYMMDD-HHMM".len());
    assert!(stamp
        .chars()
        .enumerate()
        .all(|(i, c)| if i == 8 { c == '-' } else { c.is_ascii_digit() }));
    assert!(fixture.ws.dist_dir().join(&name).is_file());

    let framework = fixture.ws.tree_path("anykernel");
    assert!(framework.join("Image.gz-dtb").is_file());
    let script = fs::read_to_string(framework.join(INSTALLER_SCRIPT)).unwrap();
    assert!(script.contains("kernel.string=kforge kernel [Stock]"));
    assert!(script.contains("device.name1=kona"));

    let zip = &fixture.runner.calls_to("zip")[1];
    assert!(zip.has_arg("Image.gz-dtb"));
    assert!(zip.has_arg("kona.dtb"));
    assert!(!zip.has_arg("README.md"));
    assert!(summary.human_summary.contains(&archive));
}

#[test]
fn test_missing_tool_fails_before_any_sync() {
    let fixture = Fixture::with_kernel(&["Image.gz-dtb"]);
    fixture.runner.missing("make");

    let err = fixture
        .pipeline(fixtures::settings(), stock_no_zip())
        .run()
        .unwrap_err();

    match err {
        PipelineError::Toolchain(ToolchainError::Missing { ref missing }) => {
            assert_eq!(missing, &vec!["make".to_string()]);
        }
        ref other => panic!("unexpected error: {}", other),
    }
    assert!(!fixture
        .runner
        .calls_to("git")
        .iter()
        .any(|inv| inv.has_arg("pull") || inv.has_arg("clone")));

    let summary = RunSummary::from_file(&fixture.ws.summary_path()).unwrap();
    assert_eq!(summary.stage(Stage::Preflight).unwrap().status, StageStatus::Failed);
    assert_eq!(summary.stage(Stage::Sync).unwrap().status, StageStatus::Skipped);
}

#[test]
fn test_interrupt_before_start_exits_130() {
    let fixture = Fixture::with_kernel(&["Image.gz-dtb"]);
    fixture.interrupt.handle_signal();

    let err = fixture
        .pipeline(fixtures::settings(), stock_no_zip())
        .run()
        .unwrap_err();

    assert!(matches!(err, PipelineError::Interrupted));
    assert_eq!(err.exit_code(), 130);
    assert!(fixture.runner.calls().is_empty());

    let summary = RunSummary::from_file(&fixture.ws.summary_path()).unwrap();
    assert_eq!(summary.status, RunStatus::Interrupted);
    assert_eq!(summary.exit_code, 130);
    assert_eq!(summary.stage(Stage::Preflight).unwrap().status, StageStatus::Interrupted);
}

#[test]
fn test_interrupt_during_build_stops_at_boundary() {
    let fixture = Fixture::with_kernel(&["Image.gz-dtb"]);
    let interrupt = fixture.interrupt.clone();
    fixture.runner.on(
        |inv| inv.program == "make" && inv.has_arg("Image.gz-dtb"),
        move |_| {
            interrupt.handle_signal();
            CommandOutput::failed(2, "make: *** [Makefile] Interrupt")
        },
    );

    let err = fixture
        .pipeline(fixtures::settings(), stock_no_zip())
        .run()
        .unwrap_err();

    assert_eq!(err.exit_code(), 130);
    let summary = RunSummary::from_file(&fixture.ws.summary_path()).unwrap();
    assert_eq!(summary.status, RunStatus::Interrupted);
    assert_eq!(summary.stage(Stage::Compose).unwrap().status, StageStatus::Succeeded);
    assert_eq!(summary.stage(Stage::Build).unwrap().status, StageStatus::Interrupted);
    assert_eq!(summary.stage(Stage::Package).unwrap().status, StageStatus::Skipped);
    assert!(!fixture.ws.dist_dir().exists());
}

#[test]
fn test_status_reports_trees_and_last_run() {
    let fixture = Fixture::with_kernel(&["Image.gz"]);
    let pipeline = fixture.pipeline(fixtures::settings(), stock_no_zip());
    assert!(pipeline.status().last_run.is_none());

    let summary = pipeline.run().unwrap();
    let status = pipeline.status();

    let kernel = status.trees.iter().find(|t| t.name == "kernel").unwrap();
    assert!(kernel.present);
    let ksu = status.trees.iter().find(|t| t.name == "ksu").unwrap();
    assert!(!ksu.present);
    assert_eq!(status.last_run.unwrap().run_id, summary.run_id);
}
