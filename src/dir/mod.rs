//! Directories
//!
//! A directory is a named, ordered multimap from [`Key`](crate::value::Key) to arrays of
//! [`File`](crate::value::File)s. Eager directories are pushed to by writes and
//! propagation; lazy directories compute their entries on demand.

pub mod changes;
pub mod eager;
pub mod lazy;
pub mod name;

pub use changes::ChangeIndex;
pub use eager::{DeleteHook, EagerDir, EagerKind};
pub use lazy::{LazyDir, LazyEntry, LazyFn, ReadSet};
pub use name::DirName;

use serde::{Deserialize, Serialize};

/// A registered directory.
#[derive(Debug, Clone)]
pub enum Dir {
    Eager(EagerDir),
    Lazy(LazyDir),
}

impl Dir {
    pub fn name(&self) -> &DirName {
        match self {
            Dir::Eager(d) => d.name(),
            Dir::Lazy(d) => d.name(),
        }
    }

    /// Revision of the directory contents, see [`EagerDir::revision`].
    pub fn revision(&self) -> u64 {
        match self {
            Dir::Eager(d) => d.revision(),
            Dir::Lazy(d) => d.revision(),
        }
    }

    pub fn as_eager(&self) -> Option<&EagerDir> {
        match self {
            Dir::Eager(d) => Some(d),
            Dir::Lazy(_) => None,
        }
    }

    pub fn as_lazy(&self) -> Option<&LazyDir> {
        match self {
            Dir::Lazy(d) => Some(d),
            Dir::Eager(_) => None,
        }
    }

    pub(crate) fn as_eager_mut(&mut self) -> Option<&mut EagerDir> {
        match self {
            Dir::Eager(d) => Some(d),
            Dir::Lazy(_) => None,
        }
    }

    pub(crate) fn as_lazy_mut(&mut self) -> Option<&mut LazyDir> {
        match self {
            Dir::Lazy(d) => Some(d),
            Dir::Eager(_) => None,
        }
    }

    pub fn kind(&self) -> DirKind {
        match self {
            Dir::Eager(d) => match d.kind() {
                EagerKind::Input => DirKind::Input,
                EagerKind::Derived => DirKind::Derived,
                EagerKind::Pre { .. } => DirKind::Pre,
            },
            Dir::Lazy(_) => DirKind::Lazy,
        }
    }
}

/// Summary kind of a directory, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirKind {
    Input,
    Derived,
    Pre,
    Lazy,
}

/// Size statistics of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirStats {
    pub name: DirName,
    pub kind: DirKind,
    /// Keys present (cached keys for lazy directories)
    pub size: usize,
    /// Files across all keys
    pub total_files: usize,
}
