//! Error types for the incremental computation store.

use crate::dir::DirName;
use crate::types::{CallId, DirId, SessionId};
use crate::value::Key;
use thiserror::Error;

/// Broad classification of a [`StoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The host program broke a core invariant. Not meant to be recovered from.
    InvariantViolation,
    /// A lazy computation demanded its own value.
    CycleDetected,
    /// A user supplied map/compute closure failed.
    Transform,
    /// A value could not be converted between its typed and stored forms.
    Codec,
    /// Configuration could not be loaded or is invalid.
    Config,
}

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Directory {0} is not an input directory")]
    NotAnInputDirectory(DirName),

    #[error("Directory already exists: {0}")]
    DuplicateDirectory(DirName),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(DirName),

    #[error("Unknown directory id {0:?}")]
    UnknownDirId(DirId),

    #[error("Directory {dir} is not {expected}")]
    WrongDirectoryKind { dir: DirName, expected: &'static str },

    #[error("Expected exactly one value for {key} in {dir}, found {count}")]
    UniquenessViolation { dir: DirName, key: Key, count: usize },

    #[error("Key {key} written twice in one invocation targeting {dir}")]
    DuplicateKeyWrite { dir: DirName, key: Key },

    #[error("Reducer for {dir} cannot update {key} incrementally and cannot reset")]
    ReducerCannotReset { dir: DirName, key: Key },

    #[error("Invalid directory name: {0}")]
    InvalidDirName(String),

    #[error("Cycle detected while computing {key} in {dir}")]
    CycleDetected { dir: DirName, key: Key },

    #[error("Transform for {key} in {dir} failed: {source}")]
    Transform {
        dir: DirName,
        key: Key,
        #[source]
        source: anyhow::Error,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SessionId),

    #[error("Unknown async call: {0}")]
    UnknownAsyncCall(CallId),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::CycleDetected { .. } => ErrorKind::CycleDetected,
            StoreError::Transform { .. } => ErrorKind::Transform,
            StoreError::Codec(_) => ErrorKind::Codec,
            StoreError::Config(_) => ErrorKind::Config,
            _ => ErrorKind::InvariantViolation,
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        self.kind() == ErrorKind::InvariantViolation
    }

    /// Wrap an error raised by a user closure.
    ///
    /// A `StoreError` that merely travelled through the closure via `?` keeps its identity,
    /// so a nested cycle is still reported as a cycle.
    pub(crate) fn from_transform(dir: &DirName, key: &Key, err: anyhow::Error) -> StoreError {
        match err.downcast::<StoreError>() {
            Ok(inner) => inner,
            Err(source) => StoreError::Transform {
                dir: dir.clone(),
                key: key.clone(),
                source,
            },
        }
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}
