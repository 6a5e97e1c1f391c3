//! Hierarchical directory names

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const PRE_SEGMENT: &str = ".pre";

/// Path-like name of a directory, e.g. `/users/by_age/`.
///
/// A valid name starts and ends with `/` and has no empty segments. The root `/` is valid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DirName(Arc<str>);

impl DirName {
    pub fn new(name: &str) -> Result<Self, StoreError> {
        if !name.starts_with('/') || !name.ends_with('/') {
            return Err(StoreError::InvalidDirName(format!(
                "{} (must start and end with '/')",
                name
            )));
        }
        if name.len() > 1 && name[1..name.len() - 1].split('/').any(|s| s.is_empty()) {
            return Err(StoreError::InvalidDirName(format!(
                "{} (empty path segment)",
                name
            )));
        }
        Ok(DirName(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Child name `self + segment + "/"`.
    pub fn sub(&self, segment: &str) -> Result<Self, StoreError> {
        if segment.is_empty() || segment.contains('/') {
            return Err(StoreError::InvalidDirName(format!(
                "{}{} (invalid segment)",
                self, segment
            )));
        }
        DirName::new(&format!("{}{}/", self.0, segment))
    }

    /// Enclosing directory name, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        let trimmed = &self.0[..self.0.len() - 1];
        let idx = trimmed.rfind('/')?;
        Some(DirName(Arc::from(&trimmed[..=idx])))
    }

    /// Name of the previous-tick snapshot of this directory.
    pub fn pre(&self) -> Self {
        DirName(Arc::from(format!("{}{}/", self.0, PRE_SEGMENT)))
    }

    pub fn is_pre(&self) -> bool {
        self.0.ends_with(&format!("/{}/", PRE_SEGMENT))
    }
}

impl fmt::Display for DirName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DirName {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DirName::new(&value)
    }
}

impl From<DirName> for String {
    fn from(name: DirName) -> Self {
        name.0.to_string()
    }
}
