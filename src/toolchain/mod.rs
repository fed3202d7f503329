//! Environment preflight
//!
//! Checks that every external tool the run will drive can be launched
//! before any source tree is touched. A tool counts as present when
//! `<tool> --version` launches, whatever its exit status.

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::features::FeatureState;
use crate::tools::{CommandRunner, Invocation, ToolError};

/// Probe result for a single tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProbe {
    pub name: String,
    /// First line of `--version` output, when available
    pub version: Option<String>,
    pub found: bool,
}

/// Every tool probed by `preflight`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainReport {
    pub tools: Vec<ToolProbe>,
}

impl ToolchainReport {
    pub fn missing(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter(|t| !t.found)
            .map(|t| t.name.clone())
            .collect()
    }
}

/// Environment errors, always fatal and always raised before any mutation
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("missing required tools: {}", .missing.join(", "))]
    Missing { missing: Vec<String> },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Tools a run with these settings and features needs
pub fn required_tools(settings: &Settings, features: &FeatureState) -> Vec<String> {
    let mut tools = vec!["git".to_string(), "make".to_string()];
    if features.ksu {
        tools.push("bash".to_string());
    }
    if features.any_overlay() {
        tools.push("patch".to_string());
    }
    if features.zip && settings.package.format.needs_zip_utility() {
        tools.push("zip".to_string());
    }
    if settings.toolchain.clang {
        tools.push("clang".to_string());
    } else {
        tools.push(format!("{}gcc", settings.toolchain.cross_compile));
    }
    tools
}

/// Probe every required tool; fail listing all missing ones at once
pub fn preflight(
    runner: &dyn CommandRunner,
    settings: &Settings,
    features: &FeatureState,
) -> Result<ToolchainReport, ToolchainError> {
    let mut report = ToolchainReport::default();

    for name in required_tools(settings, features) {
        let probe = match runner.run(&Invocation::new(name.as_str()).arg("--version")) {
            Ok(output) => ToolProbe {
                version: output
                    .stdout
                    .lines()
                    .next()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
                name,
                found: true,
            },
            Err(ToolError::NotFound { .. }) => ToolProbe {
                name,
                version: None,
                found: false,
            },
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(tool = %probe.name, found = probe.found, "probed");
        report.tools.push(probe);
    }

    let missing = report.missing();
    if !missing.is_empty() {
        return Err(ToolchainError::Missing { missing });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::ArchiveFormat;
    use crate::tools::{CommandOutput, MockRunner};

    fn all_features() -> FeatureState {
        FeatureState {
            ksu: true,
            susfs: true,
            zip: true,
        }
    }

    #[test]
    fn test_required_tools_full_run() {
        let tools = required_tools(&Settings::default(), &all_features());
        assert_eq!(tools, vec!["git", "make", "bash", "patch", "zip", "clang"]);
    }

    #[test]
    fn test_setup_script_shell_only_with_privilege_overlay() {
        let susfs_only = FeatureState {
            ksu: false,
            susfs: true,
            zip: false,
        };
        let tools = required_tools(&Settings::default(), &susfs_only);
        assert_eq!(tools, vec!["git", "make", "patch", "clang"]);
    }

    #[test]
    fn test_missing_shell_fails_preflight() {
        let runner = MockRunner::new();
        runner.missing("bash");

        let err = preflight(&runner, &Settings::default(), &all_features()).unwrap_err();

        match err {
            ToolchainError::Missing { missing } => assert_eq!(missing, vec!["bash"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_required_tools_stock_gcc_tar() {
        let mut settings = Settings::default();
        settings.toolchain.clang = false;
        settings.package.format = ArchiveFormat::Tar;

        let tools = required_tools(&settings, &FeatureState::stock());
        assert_eq!(tools, vec!["git", "make", "aarch64-linux-gnu-gcc"]);
    }

    #[test]
    fn test_preflight_passes() {
        let runner = MockRunner::new();
        runner.on_program("make", |_| CommandOutput::ok().with_stdout("GNU Make 4.3\nBuilt for x86_64\n"));

        let report = preflight(&runner, &Settings::default(), &all_features()).unwrap();

        let make = report.tools.iter().find(|t| t.name == "make").unwrap();
        assert_eq!(make.version.as_deref(), Some("GNU Make 4.3"));
        assert!(report.missing().is_empty());
    }

    #[test]
    fn test_preflight_lists_all_missing() {
        let runner = MockRunner::new();
        runner.missing("zip").missing("clang");

        let err = preflight(&runner, &Settings::default(), &all_features()).unwrap_err();

        match err {
            ToolchainError::Missing { missing } => assert_eq!(missing, vec!["zip", "clang"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nonzero_version_exit_still_counts_as_present() {
        let runner = MockRunner::new();
        runner.on_program("patch", |_| CommandOutput::failed(2, "unknown option"));

        assert!(preflight(&runner, &Settings::default(), &all_features()).is_ok());
    }
}
