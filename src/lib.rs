//! kforge - kernel build orchestration
//!
//! Synchronizes independently versioned source trees, integrates optional
//! feature overlays into the base kernel tree, composes the kernel
//! configuration from layered fragments, drives the kernel build and
//! packages the result into a flashable archive.

pub mod artifact;
pub mod build;
pub mod compose;
pub mod config;
pub mod features;
pub mod overlay;
pub mod package;
pub mod pipeline;
pub mod signal;
pub mod summary;
pub mod sync;
pub mod toolchain;
pub mod tools;
pub mod workspace;

pub use config::{EffectiveSettings, Settings};
pub use features::{FeatureState, Mode, Toggles};
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, PipelineResult};
pub use tools::{CommandRunner, MockRunner, ProcessRunner};
pub use workspace::Workspace;
