//! Validated run identifiers.
//!
//! A run identifier is an opaque string handed to us by whatever created the
//! run. We never interpret it, but it ends up as a file name under the log
//! directory, so anything that could escape that directory is rejected
//! here, before any path is built.

use std::fmt;

/// Reasons a raw run identifier is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RunIdError {
    /// The identifier is empty.
    #[error("run id is empty")]
    Empty,
    /// The identifier contains a `..` sequence.
    #[error("run id contains a parent-directory sequence")]
    ParentTraversal,
    /// The identifier contains `/` or `\`.
    #[error("run id contains a path separator")]
    PathSeparator,
    /// The identifier contains NUL or another control character.
    #[error("run id contains a control character")]
    ControlCharacter,
}

/// A run identifier that is safe to use as a log file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(String);

impl RunId {
    /// Validate `raw` and wrap it.
    pub fn parse(raw: &str) -> Result<Self, RunIdError> {
        if raw.is_empty() {
            return Err(RunIdError::Empty);
        }
        if raw.contains("..") {
            return Err(RunIdError::ParentTraversal);
        }
        if raw.contains(['/', '\\']) {
            return Err(RunIdError::PathSeparator);
        }
        if raw.chars().any(char::is_control) {
            return Err(RunIdError::ControlCharacter);
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = RunIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
