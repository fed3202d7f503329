//! Built-in feature fragments and dependency rules

use kforge_kconfig::{ConfigFragment, Rule};

use crate::features::FeatureState;

/// Fragments for the enabled features, in fold order.
///
/// Empty when every feature is disabled.
pub fn feature_fragments(features: &FeatureState) -> Vec<ConfigFragment> {
    let mut fragments = Vec::new();
    if !features.any_overlay() {
        return fragments;
    }

    fragments.push(
        ConfigFragment::new("features/base")
            .yes("CONFIG_MODULES")
            .yes("CONFIG_MODULE_UNLOAD")
            .yes("CONFIG_OVERLAY_FS")
            .yes("CONFIG_NAMESPACES")
            .yes("CONFIG_USER_NS")
            .yes("CONFIG_PID_NS")
            .yes("CONFIG_SECURITY")
            .yes("CONFIG_SECURITY_SELINUX")
            .yes("CONFIG_KALLSYMS")
            .yes("CONFIG_KALLSYMS_ALL")
            .yes("CONFIG_STACKPROTECTOR_STRONG"),
    );

    if features.ksu {
        fragments.push(
            ConfigFragment::new("features/ksu")
                .yes("CONFIG_KSU")
                .yes("CONFIG_KPROBES")
                .yes("CONFIG_HAVE_KPROBES")
                .yes("CONFIG_KPROBE_EVENTS"),
        );
    }

    if features.susfs {
        fragments.push(
            ConfigFragment::new("features/susfs")
                .yes("CONFIG_KSU_SUSFS")
                .yes("CONFIG_KSU_SUSFS_SUS_PATH")
                .yes("CONFIG_KSU_SUSFS_SUS_MOUNT")
                .yes("CONFIG_KSU_SUSFS_TRY_UMOUNT")
                .yes("CONFIG_KSU_SUSFS_SPOOF_UNAME")
                .yes("CONFIG_KSU_SUSFS_OPEN_REDIRECT"),
        );
    }

    fragments
}

/// Prerequisites forced on whenever the dependent option is enabled.
///
/// `CONFIG_KSU_SUSFS` only pulls in `CONFIG_KSU` when the privilege overlay
/// is part of the run. Without it `drivers/kernelsu` does not exist, so the
/// kernel's own dependency resolution decides what survives.
pub fn normalization_rules(features: &FeatureState) -> Vec<Rule> {
    let mut rules = vec![Rule::requires(
        "CONFIG_KSU",
        &[
            "CONFIG_KPROBES",
            "CONFIG_HAVE_KPROBES",
            "CONFIG_KPROBE_EVENTS",
            "CONFIG_OVERLAY_FS",
        ],
    )];
    if features.ksu {
        rules.push(Rule::requires("CONFIG_KSU_SUSFS", &["CONFIG_KSU"]));
    }
    rules
}
