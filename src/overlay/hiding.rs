//! Filesystem-hiding overlay
//!
//! Lighter contract than the privilege overlay: patches are best-effort,
//! subtrees are copied when present, and a missing primary header is
//! replaced by an empty placeholder so dependent code still compiles.

use std::fs;

use super::strategy::{IntegrationStrategy, StrategyAttempt};
use super::{IntegrationContext, IntegrationOutcome, PatchSet, PatchSummary, StrategyKind};
use crate::workspace::copy_tree;

/// Patch directory inside the overlay
pub const HIDING_PATCH_DIR: &str = "kernel_patches";

/// Primary header inside the base tree
pub const HIDING_HEADER: &str = "include/linux/susfs.h";

const PLACEHOLDER_HEADER: &str = "\
#ifndef KS_SUSFS_H
#define KS_SUSFS_H

#ifdef CONFIG_KSU_SUSFS
#endif /* CONFIG_KSU_SUSFS */

#endif /* KS_SUSFS_H */
";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HidingStrategy;

impl IntegrationStrategy for HidingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Manual
    }

    fn attempt(&self, ctx: &IntegrationContext<'_>) -> StrategyAttempt {
        let mut warnings = Vec::new();
        let patch_root = ctx.overlay.join(HIDING_PATCH_DIR);

        let patches = match PatchSet::discover(&patch_root) {
            Ok(set) => set.apply(ctx.runner, ctx.base, ctx.transcript, &mut warnings),
            Err(e) => {
                warnings.push(format!("cannot read {}: {}", HIDING_PATCH_DIR, e));
                PatchSummary::default()
            }
        };

        let copies = [("fs", "fs"), ("include/linux", "include/linux")];
        for (from, to) in copies {
            let src = patch_root.join(from);
            if !src.is_dir() {
                continue;
            }
            if let Err(e) = copy_tree(&src, &ctx.base.join(to)) {
                tracing::debug!(subtree = from, error = %e, "copy failed");
            }
        }

        let header = ctx.base.join(HIDING_HEADER);
        let mut evidence = Vec::new();
        let mut synthesized = false;
        if header.is_file() {
            evidence.push(HIDING_HEADER.to_string());
        } else {
            tracing::warn!(header = HIDING_HEADER, "header missing, writing placeholder");
            warnings.push(format!("{} missing, placeholder synthesized", HIDING_HEADER));
            let written = header
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::write(&header, PLACEHOLDER_HEADER));
            if let Err(e) = written {
                warnings.push(format!("cannot write placeholder header: {}", e));
            }
            synthesized = true;
        }

        let outcome = if synthesized || !patches.all_applied() {
            IntegrationOutcome::Partial
        } else {
            IntegrationOutcome::Success
        };

        StrategyAttempt {
            accepted: true,
            outcome,
            evidence,
            patches,
            warnings,
        }
    }
}
