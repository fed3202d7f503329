//! Layered settings
//!
//! Implements the 4-layer settings merge:
//! 1. Built-in defaults (`Settings::default()`)
//! 2. Host/user config (~/.config/kforge/config.toml)
//! 3. Workspace config (<workspace>/kforge.toml)
//! 4. CLI flags

mod effective;
mod merge;
mod settings;

pub use effective::{
    default_host_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveSettings, SCHEMA_ID,
};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    BuildSettings, DeviceSettings, FeatureSettings, PackageSettings, RepoSettings, Settings,
    ToolchainSettings,
};
