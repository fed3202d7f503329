//! Config composer tests
//!
//! Layer order, normalization and the stock (no feature fragment) path.

mod fixtures;

use std::fs;
use std::path::PathBuf;

use kforge::build::MakeEnv;
use kforge::compose::{ComposeRequest, Composer, EffectiveKconfig};
use kforge::config::Settings;
use kforge::features::FeatureState;
use kforge::tools::{CommandOutput, MockRunner, Transcript};
use kforge_kconfig::{ResolutionKind, Setting};
use tempfile::TempDir;

struct Tree {
    dir: TempDir,
    settings: Settings,
}

impl Tree {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fixtures::write_kernel_tree(&dir.path().join("kernel"));
        Self {
            dir,
            settings: Settings::default(),
        }
    }

    fn kernel(&self) -> PathBuf {
        self.dir.path().join("kernel")
    }

    fn compose(&self, runner: &MockRunner, features: FeatureState, extra: &[PathBuf]) -> EffectiveKconfig {
        let env = MakeEnv::from_settings(&self.settings, self.dir.path().join("out/kernel"));
        let transcript = Transcript::create(self.dir.path().join("out/build.log")).unwrap();
        let kernel = self.kernel();
        let request = ComposeRequest {
            kernel: &kernel,
            device: &self.settings.device,
            features: &features,
            extra_fragments: extra,
        };
        Composer::new(runner, &env).compose(&request, &transcript).unwrap()
    }
}

fn ksu_only() -> FeatureState {
    FeatureState {
        ksu: true,
        susfs: false,
        zip: false,
    }
}

#[test]
fn test_later_layers_win_and_rules_run_last() {
    let tree = Tree::new();
    fixtures::write(
        &tree.kernel().join("arch/arm64/configs/generic.config"),
        "CONFIG_LOCALVERSION=\"-device\"\nCONFIG_HZ_300=y\n",
    );
    let user = tree.dir.path().join("user.config");
    fixtures::write(
        &user,
        "CONFIG_LOCALVERSION=\"-user\"\n# CONFIG_KPROBES is not set\n",
    );
    let runner = MockRunner::new();

    let composed = tree.compose(&runner, ksu_only(), &[user.clone()]);

    assert_eq!(
        composed.layers,
        vec![
            "gki_defconfig".to_string(),
            "arch/arm64/configs/generic.config".to_string(),
            "features/base".to_string(),
            "features/ksu".to_string(),
            user.display().to_string(),
        ]
    );
    let config = &composed.config;
    assert_eq!(config.get("CONFIG_LOCALVERSION"), Some(&Setting::Text("-user".into())));
    assert_eq!(config.get("CONFIG_HZ_300"), Some(&Setting::Yes));
    // Baseline disabled it, the feature fragment enabled it afterwards
    assert_eq!(config.get("CONFIG_OVERLAY_FS"), Some(&Setting::Yes));
    // The user layer disabled a prerequisite; normalization restores it
    assert_eq!(config.get("CONFIG_KPROBES"), Some(&Setting::Yes));
    assert!(composed.normalized);
    assert_eq!(composed.resolutions.len(), 1);
    assert!(matches!(
        composed.resolutions[0].kind,
        ResolutionKind::Overrode { ref required_by, .. } if required_by == "CONFIG_KSU"
    ));

    let make = runner.calls_to("make");
    assert_eq!(make.len(), 1);
    assert!(make[0].has_arg("olddefconfig"));

    let written = fs::read_to_string(&composed.config_path).unwrap();
    assert!(written.contains("CONFIG_LOCALVERSION=\"-user\""));
}

#[test]
fn test_stock_appends_no_feature_fragments() {
    let tree = Tree::new();
    let runner = MockRunner::new();

    let composed = tree.compose(&runner, FeatureState::stock(), &[]);

    assert!(composed.feature_fragments.is_empty());
    assert!(!composed.fragments_appended);
    assert!(!composed.normalized);
    assert_eq!(composed.layers, vec!["gki_defconfig".to_string()]);
    assert!(!composed.config.contains("CONFIG_KSU"));

    let make = runner.calls_to("make");
    assert!(make[0].has_arg("gki_defconfig"));
    assert!(!make[0].has_arg("olddefconfig"));
}

#[test]
fn test_extra_fragments_apply_without_features() {
    let tree = Tree::new();
    let user = tree.dir.path().join("debug.config");
    fixtures::write(&user, "CONFIG_DEBUG_INFO=y\n");
    let runner = MockRunner::new();

    let composed = tree.compose(&runner, FeatureState::stock(), &[user]);

    assert!(composed.feature_fragments.is_empty());
    assert!(composed.fragments_appended);
    assert_eq!(composed.config.get("CONFIG_DEBUG_INFO"), Some(&Setting::Yes));
    assert!(runner.calls_to("make")[0].has_arg("olddefconfig"));
}

#[test]
fn test_missing_baseline_and_failed_resolution_are_warnings() {
    let dir = TempDir::new().unwrap();
    let kernel = dir.path().join("kernel");
    fs::create_dir_all(&kernel).unwrap();
    let settings = Settings::default();
    let env = MakeEnv::from_settings(&settings, dir.path().join("out/kernel"));
    let transcript = Transcript::create(dir.path().join("out/build.log")).unwrap();
    let runner = MockRunner::new();
    runner.on_program("make", |_| CommandOutput::failed(2, "*** No rule to make target"));

    let features = ksu_only();
    let composed = Composer::new(&runner, &env)
        .compose(
            &ComposeRequest {
                kernel: &kernel,
                device: &settings.device,
                features: &features,
                extra_fragments: &[],
            },
            &transcript,
        )
        .unwrap();

    assert!(composed.baseline.is_none());
    assert_eq!(composed.warnings.len(), 2);
    assert!(composed.config.is_enabled("CONFIG_KSU"));
    assert!(composed.config_path.is_file());
    let log = fs::read_to_string(dir.path().join("out/build.log")).unwrap();
    assert!(log.contains("No rule to make target"));
}

#[test]
fn test_susfs_only_does_not_force_ksu() {
    let tree = Tree::new();
    let runner = MockRunner::new();
    let features = FeatureState {
        ksu: false,
        susfs: true,
        zip: false,
    };

    let composed = tree.compose(&runner, features, &[]);

    assert_eq!(
        composed.feature_fragments,
        vec!["features/base".to_string(), "features/susfs".to_string()]
    );
    assert!(composed.resolutions.is_empty());
    assert!(!composed.config.is_enabled("CONFIG_KSU"));
    assert!(composed.config.is_enabled("CONFIG_KSU_SUSFS"));
    let written = fs::read_to_string(&composed.config_path).unwrap();
    assert!(!written.contains("CONFIG_KSU=y"));
}
