//! Stage outcomes and the warning counter

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    Sync,
    Integrate,
    Compose,
    Build,
    Package,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Preflight,
        Stage::Sync,
        Stage::Integrate,
        Stage::Compose,
        Stage::Build,
        Stage::Package,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Sync => "sync",
            Stage::Integrate => "integrate",
            Stage::Compose => "compose",
            Stage::Build => "build",
            Stage::Package => "package",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    /// Finished, with warnings that reduce what the run delivers
    Degraded,
    Failed,
    /// Not reached (an earlier stage failed or the run was interrupted)
    Skipped,
    Interrupted,
}

impl StageStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed | StageStatus::Interrupted)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Succeeded => "succeeded",
            StageStatus::Degraded => "degraded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::Interrupted => "interrupted",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    /// One-line detail (error message, chosen artifact)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A non-fatal problem attributed to a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub stage: Stage,
    pub message: String,
}

/// Warnings collected over a run
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning that has already been logged where it occurred
    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        self.warnings.push(Warning {
            stage,
            message: message.into(),
        });
    }

    pub fn extend<I, S>(&mut self, stage: Stage, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for message in messages {
            self.warn(stage, message);
        }
    }

    pub fn count(&self) -> usize {
        self.warnings.len()
    }

    pub fn count_for(&self, stage: Stage) -> usize {
        self.warnings.iter().filter(|w| w.stage == stage).count()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}
