use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::StorageError;

/// Absolute storage path such as `/change/12`.
///
/// Starts with `/`; segments are non-empty and use `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath(String);

impl StoragePath {
    pub fn new(raw: impl Into<String>) -> Result<Self, StorageError> {
        let raw = raw.into();
        check_path(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Appends one segment.
    pub fn join(&self, segment: impl fmt::Display) -> Result<Self, StorageError> {
        Self::new(format!("{}/{}", self.0, segment))
    }

    /// True when `self` lies strictly below `prefix`.
    pub fn is_under(&self, prefix: &StoragePath) -> bool {
        self.0
            .strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The final segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }
}

fn check_path(raw: &str) -> Result<(), StorageError> {
    let bad = |reason: &str| StorageError::BadValue(format!("path `{raw}` is invalid: {reason}"));
    let rest = raw.strip_prefix('/').ok_or_else(|| bad("must start with `/`"))?;
    for segment in rest.split('/') {
        if segment.is_empty() {
            return Err(bad("empty segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(bad("segments use only letters, digits, `_`, `-` and `.`"));
        }
    }
    Ok(())
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StoragePath {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for StoragePath {
    type Error = StorageError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> String {
        path.0
    }
}
