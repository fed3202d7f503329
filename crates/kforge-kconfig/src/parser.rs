//! `.config` / defconfig / fragment line parser.

use crate::value::Setting;
use crate::{Assignment, ConfigFragment};

/// Prefix every option name carries.
pub const OPTION_PREFIX: &str = "CONFIG_";

/// A line that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line number.
    pub line: usize,
    /// What went wrong.
    pub message: String,
}

/// Parse one line.
///
/// Returns `Ok(None)` for blank lines and ordinary comments.
pub fn parse_line(line: &str) -> Result<Option<Assignment>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    if let Some(comment) = line.strip_prefix('#') {
        // "# CONFIG_FOO is not set" is an assignment, anything else is a comment.
        let comment = comment.trim();
        if let Some(key) = comment.strip_suffix(" is not set") {
            let key = key.trim();
            if key.starts_with(OPTION_PREFIX) && is_valid_key(key) {
                return Ok(Some(Assignment::new(key, Setting::NotSet)));
            }
        }
        return Ok(None);
    }

    let (key, rhs) = line
        .split_once('=')
        .ok_or_else(|| format!("expected CONFIG_NAME=value, got: {}", line))?;
    let key = key.trim();
    if !key.starts_with(OPTION_PREFIX) || !is_valid_key(key) {
        return Err(format!("invalid option name: {}", key));
    }

    let value = Setting::parse_rhs(rhs)?;
    Ok(Some(Assignment::new(key, value)))
}

/// Parse a whole fragment, keeping every good line and collecting errors for the rest.
pub fn parse_fragment_lossy(name: &str, text: &str) -> (ConfigFragment, Vec<ParseError>) {
    let mut fragment = ConfigFragment::new(name);
    let mut errors = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(assignment)) => fragment.push(assignment),
            Ok(None) => {}
            Err(message) => errors.push(ParseError {
                line: idx + 1,
                message,
            }),
        }
    }

    (fragment, errors)
}

fn is_valid_key(key: &str) -> bool {
    key.len() > OPTION_PREFIX.len()
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c.is_ascii_lowercase())
}
