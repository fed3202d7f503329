//! Run summary and stage bookkeeping
//!
//! Every run writes `out/run_summary.json`, including runs that fail or are
//! interrupted.

mod run_summary;
mod stage;

pub use run_summary::{
    RunStatus, RunSummary, TreeRecord, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION,
};
pub use stage::{Diagnostics, Stage, StageRecord, StageStatus, Warning};
