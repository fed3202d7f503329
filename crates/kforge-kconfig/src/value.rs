//! Kconfig option values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value assigned to a single `CONFIG_*` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Setting {
    /// `CONFIG_X=y`.
    Yes,
    /// `CONFIG_X=m`.
    Module,
    /// `# CONFIG_X is not set` (or the equivalent `CONFIG_X=n`).
    NotSet,
    /// `CONFIG_X="text"`, stored unescaped.
    Text(String),
    /// Numeric or hex literal, stored verbatim (`CONFIG_X=0x10`).
    Literal(String),
}

impl Setting {
    /// Whether the option is built in or built as a module.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Setting::Yes | Setting::Module)
    }

    /// Parse the right-hand side of a `CONFIG_X=<rhs>` line.
    pub fn parse_rhs(rhs: &str) -> Result<Self, String> {
        let rhs = rhs.trim();
        match rhs {
            "y" => Ok(Setting::Yes),
            "m" => Ok(Setting::Module),
            "n" => Ok(Setting::NotSet),
            "" => Err("empty value".to_string()),
            _ if rhs.starts_with('"') => {
                if rhs.len() < 2 || !rhs.ends_with('"') {
                    return Err(format!("unterminated string: {}", rhs));
                }
                Ok(Setting::Text(unescape(&rhs[1..rhs.len() - 1])))
            }
            _ if is_literal(rhs) => Ok(Setting::Literal(rhs.to_string())),
            _ => Err(format!("unrecognized value: {}", rhs)),
        }
    }

    /// Render as a full `.config` line for `key`.
    pub fn render(&self, key: &str) -> String {
        match self {
            Setting::NotSet => format!("# {} is not set", key),
            other => format!("{}={}", key, other),
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Yes => write!(f, "y"),
            Setting::Module => write!(f, "m"),
            Setting::NotSet => write!(f, "n"),
            Setting::Text(s) => write!(f, "\"{}\"", escape(s)),
            Setting::Literal(s) => write!(f, "{}", s),
        }
    }
}

fn is_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
