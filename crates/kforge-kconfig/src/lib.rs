//! Kconfig fragment model.
//!
//! A kernel configuration is composed from an ordered list of fragments
//! (baseline defconfig, device fragment, feature fragments). Fragments are
//! folded left-to-right into one map where the last assignment of a key wins,
//! then normalized against dependency rules.

mod parser;
mod rules;
mod value;

pub use parser::{parse_fragment_lossy, parse_line, ParseError, OPTION_PREFIX};
pub use rules::{normalize, Resolution, ResolutionKind, Rule, NORMALIZE_ORIGIN};
pub use value::Setting;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One `CONFIG_X=value` assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub key: String,
    pub value: Setting,
}

impl Assignment {
    pub fn new(key: impl Into<String>, value: Setting) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A named, ordered block of assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFragment {
    pub name: String,
    pub assignments: Vec<Assignment>,
}

impl ConfigFragment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assignments: Vec::new(),
        }
    }

    pub fn push(&mut self, assignment: Assignment) {
        self.assignments.push(assignment);
    }

    /// Builder-style assignment.
    pub fn set(mut self, key: &str, value: Setting) -> Self {
        self.push(Assignment::new(key, value));
        self
    }

    pub fn yes(self, key: &str) -> Self {
        self.set(key, Setting::Yes)
    }

    pub fn not_set(self, key: &str) -> Self {
        self.set(key, Setting::NotSet)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Folded value together with the name of the layer that set it last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Setting,
    pub origin: String,
}

/// A folded configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kconfig {
    entries: BTreeMap<String, Entry>,
}

impl Kconfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an ordered list of layers. Later layers override earlier ones.
    pub fn fold<'a, I>(layers: I) -> Self
    where
        I: IntoIterator<Item = &'a ConfigFragment>,
    {
        let mut config = Self::new();
        for layer in layers {
            config.apply(layer);
        }
        config
    }

    /// Apply one layer on top of the current state.
    pub fn apply(&mut self, layer: &ConfigFragment) {
        for assignment in &layer.assignments {
            self.set(&assignment.key, assignment.value.clone(), &layer.name);
        }
    }

    pub fn set(&mut self, key: &str, value: Setting, origin: &str) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                origin: origin.to_string(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&Setting> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Name of the layer that last assigned `key`.
    pub fn origin(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.origin.as_str())
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.get(key).map(Setting::is_enabled).unwrap_or(false)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Setting)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.value))
    }

    /// Render as `.config` text, one option per line in key order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, entry) in &self.entries {
            out.push_str(&entry.value.render(key));
            out.push('\n');
        }
        out
    }

    /// Parse rendered `.config` text back into a single-layer config.
    pub fn from_text(origin: &str, text: &str) -> (Self, Vec<ParseError>) {
        let (fragment, errors) = parse_fragment_lossy(origin, text);
        (Self::fold([&fragment]), errors)
    }
}
