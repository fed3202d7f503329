//! Run summary (run_summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use super::stage::{Stage, StageRecord, StageStatus, Warning};
use crate::features::FeatureState;
use crate::overlay::IntegrationReport;
use crate::sync::SyncState;

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "kforge/run_summary@1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Interrupted,
}

/// Source tree state at the end of the sync stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub name: String,
    pub state: SyncState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Run summary (run_summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,

    pub schema_id: String,

    /// ULID of the run
    pub run_id: String,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    pub duration_ms: u64,

    pub status: RunStatus,

    /// Process exit code (0, 1 or 130)
    pub exit_code: i32,

    pub features: FeatureState,

    #[serde(default)]
    pub trees: Vec<TreeRecord>,

    /// One record per stage, in execution order
    pub stages: Vec<StageRecord>,

    #[serde(default)]
    pub overlays: Vec<IntegrationReport>,

    /// Image variant shipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<String>,

    pub warning_count: usize,

    #[serde(default)]
    pub warnings: Vec<Warning>,

    pub human_summary: String,
}

impl RunSummary {
    /// Start a summary with every stage marked skipped
    pub fn begin(run_id: impl Into<String>, features: FeatureState) -> Self {
        let now = Utc::now();
        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id: run_id.into(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            status: RunStatus::Succeeded,
            exit_code: 0,
            features,
            trees: Vec::new(),
            stages: Stage::ALL
                .iter()
                .map(|&stage| StageRecord {
                    stage,
                    status: StageStatus::Skipped,
                    detail: None,
                })
                .collect(),
            overlays: Vec::new(),
            image: None,
            archive: None,
            warning_count: 0,
            warnings: Vec::new(),
            human_summary: String::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, status: StageStatus, detail: Option<String>) {
        match self.stages.iter_mut().find(|r| r.stage == stage) {
            Some(record) => {
                record.status = status;
                record.detail = detail;
            }
            None => self.stages.push(StageRecord {
                stage,
                status,
                detail,
            }),
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Close the run: timing, exit code, warnings and the one-line summary
    pub fn finish(&mut self, exit_code: i32, warnings: Vec<Warning>) {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.exit_code = exit_code;
        self.status = match exit_code {
            0 => RunStatus::Succeeded,
            crate::signal::EXIT_CODE_INTERRUPTED => RunStatus::Interrupted,
            _ => RunStatus::Failed,
        };
        self.warning_count = warnings.len();
        self.warnings = warnings;
        self.human_summary = self.generate_human_summary();
    }

    fn generate_human_summary(&self) -> String {
        let failed = self.stages.iter().find(|r| r.status.is_failure());
        let mut text = match (self.status, failed) {
            (RunStatus::Succeeded, _) => match self.archive.as_ref().or(self.image.as_ref()) {
                Some(output) => format!("Build succeeded [{}]: {}", self.features.tag(), output),
                None => format!("Run succeeded [{}]", self.features.tag()),
            },
            (RunStatus::Interrupted, Some(r)) => format!("Interrupted during {}", r.stage),
            (RunStatus::Interrupted, None) => "Interrupted".to_string(),
            (RunStatus::Failed, Some(r)) => match r.detail {
                Some(ref detail) => format!("{} failed: {}", r.stage, detail),
                None => format!("{} failed", r.stage),
            },
            (RunStatus::Failed, None) => "Run failed".to_string(),
        };

        let degraded: Vec<&str> = self
            .overlays
            .iter()
            .filter(|o| o.outcome.is_degraded())
            .map(|o| o.overlay.as_str())
            .collect();
        if !degraded.is_empty() {
            text.push_str(&format!("; degraded overlays: {}", degraded.join(", ")));
        }
        if self.warning_count > 0 {
            text.push_str(&format!("; {} warning(s)", self.warning_count));
        }
        text
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}
