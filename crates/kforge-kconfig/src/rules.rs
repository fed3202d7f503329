//! Dependency normalization.
//!
//! Raw layering can leave an option enabled while something it depends on is
//! unset or explicitly disabled by a later layer. `normalize` forces the
//! prerequisites of every enabled option. Rules are applied until nothing
//! changes.

use serde::{Deserialize, Serialize};

use crate::value::Setting;
use crate::Kconfig;

/// Origin recorded for values written by normalization.
pub const NORMALIZE_ORIGIN: &str = "normalize";

/// When `option` is enabled, every key in `requires` must be `y`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub option: String,
    pub requires: Vec<String>,
}

impl Rule {
    pub fn requires(option: &str, requires: &[&str]) -> Self {
        Rule {
            option: option.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// What normalization did to one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionKind {
    /// Key was absent and got enabled because `required_by` is enabled.
    Enabled { required_by: String },
    /// Key was explicitly set to something else and was forced on.
    Overrode { previous: Setting, required_by: String },
}

/// One change made by normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub key: String,
    pub value: Setting,
    #[serde(flatten)]
    pub kind: ResolutionKind,
}

/// Apply `rules` to `config` until it is internally consistent.
pub fn normalize(config: &mut Kconfig, rules: &[Rule]) -> Vec<Resolution> {
    let mut resolutions = Vec::new();

    // Each pass can only enable options, so the number of useful passes is bounded.
    for _ in 0..=rules.len() {
        let mut changed = false;

        for Rule { option, requires } in rules {
            if !config.is_enabled(option) {
                continue;
            }
            for dep in requires {
                let kind = match config.get(dep) {
                    Some(Setting::Yes) => continue,
                    None => ResolutionKind::Enabled {
                        required_by: option.clone(),
                    },
                    Some(previous) => ResolutionKind::Overrode {
                        previous: previous.clone(),
                        required_by: option.clone(),
                    },
                };
                config.set(dep, Setting::Yes, NORMALIZE_ORIGIN);
                resolutions.push(Resolution {
                    key: dep.clone(),
                    value: Setting::Yes,
                    kind,
                });
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    resolutions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigFragment;

    #[test]
    fn test_enables_missing_dependency() {
        let layer = ConfigFragment::new("feature").yes("CONFIG_KSU");
        let mut config = Kconfig::fold([&layer]);

        let res = normalize(&mut config, &[Rule::requires("CONFIG_KSU", &["CONFIG_KPROBES"])]);

        assert!(config.is_enabled("CONFIG_KPROBES"));
        assert_eq!(config.origin("CONFIG_KPROBES"), Some(NORMALIZE_ORIGIN));
        assert_eq!(res.len(), 1);
        assert_eq!(
            res[0].kind,
            ResolutionKind::Enabled {
                required_by: "CONFIG_KSU".into()
            }
        );
    }

    #[test]
    fn test_overrides_contradicting_layer() {
        let base = ConfigFragment::new("baseline").not_set("CONFIG_KPROBES");
        let feature = ConfigFragment::new("feature").yes("CONFIG_KSU");
        let mut config = Kconfig::fold([&base, &feature]);

        let res = normalize(&mut config, &[Rule::requires("CONFIG_KSU", &["CONFIG_KPROBES"])]);

        assert_eq!(config.get("CONFIG_KPROBES"), Some(&Setting::Yes));
        assert!(matches!(res[0].kind, ResolutionKind::Overrode { .. }));
    }

    #[test]
    fn test_disabled_option_pulls_nothing() {
        let layer = ConfigFragment::new("baseline").not_set("CONFIG_KSU");
        let mut config = Kconfig::fold([&layer]);

        let res = normalize(&mut config, &[Rule::requires("CONFIG_KSU", &["CONFIG_KPROBES"])]);

        assert!(res.is_empty());
        assert!(!config.contains("CONFIG_KPROBES"));
    }

    #[test]
    fn test_transitive_requirements() {
        let layer = ConfigFragment::new("feature").yes("CONFIG_KSU_SUSFS");
        let mut config = Kconfig::fold([&layer]);
        // Listed in the "wrong" order on purpose: the second pass picks up CONFIG_KSU.
        let rules = vec![
            Rule::requires("CONFIG_KSU", &["CONFIG_KPROBES"]),
            Rule::requires("CONFIG_KSU_SUSFS", &["CONFIG_KSU"]),
        ];

        normalize(&mut config, &rules);

        assert!(config.is_enabled("CONFIG_KSU"));
        assert!(config.is_enabled("CONFIG_KPROBES"));
    }

    #[test]
    fn test_module_dependency_is_upgraded() {
        let layer = ConfigFragment::new("l")
            .yes("CONFIG_KSU")
            .set("CONFIG_OVERLAY_FS", Setting::Module);
        let mut config = Kconfig::fold([&layer]);

        normalize(&mut config, &[Rule::requires("CONFIG_KSU", &["CONFIG_OVERLAY_FS"])]);

        assert_eq!(config.get("CONFIG_OVERLAY_FS"), Some(&Setting::Yes));
    }
}
