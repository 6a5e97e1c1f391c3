//! Arrows: dependency edges between eager directories
//!
//! An arrow owns everything needed to rebuild its child incrementally: one slot per parent
//! (map closure, optional key ranges, consumption cursor), an optional reducer, and the
//! contribution index recording which output entries each parent key produced.

use crate::context::Context;
use crate::reducer::Reducer;
use crate::types::{DirId, Tick};
use crate::value::{File, Key, KeyRange};
use crate::writer::Writer;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Map closure: called once per changed parent key with that key's (non-empty) files.
pub type MapFn =
    Arc<dyn Fn(&mut Context, &mut Writer, &Key, &[File]) -> anyhow::Result<()> + Send + Sync>;

/// A parent directory feeding an arrow.
#[derive(Clone)]
pub struct ParentSlot {
    pub dir: DirId,
    pub map: MapFn,
    pub ranges: Option<Vec<KeyRange>>,
    /// Changes at or before this tick have been consumed.
    pub last_seen: Tick,
}

impl fmt::Debug for ParentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParentSlot")
            .field("dir", &self.dir)
            .field("ranges", &self.ranges)
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

/// Identifies one producer of output entries: (parent slot, parent key).
pub type SourceRef = (usize, Key);

/// Change to the contributions of one output key caused by re-running one source.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDelta {
    pub key: Key,
    pub removed: Vec<File>,
    pub added: Vec<File>,
    /// The key had no contributions before this delta.
    pub fresh: bool,
}

/// Index: output key -> (source -> files), with the reverse source -> output keys.
#[derive(Debug, Clone, Default)]
pub struct ContributionIndex {
    by_output: BTreeMap<Key, BTreeMap<SourceRef, Vec<File>>>,
    by_source: HashMap<SourceRef, BTreeSet<Key>>,
}

impl ContributionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything `source` contributes with `outputs`.
    ///
    /// Empty arrays in `outputs` contribute nothing. Returns one delta per output key whose
    /// contributions actually changed, in key order.
    pub fn replace_source(
        &mut self,
        source: SourceRef,
        outputs: BTreeMap<Key, Vec<File>>,
    ) -> Vec<OutputDelta> {
        let old_keys = self.by_source.remove(&source).unwrap_or_default();
        let mut deltas: BTreeMap<Key, OutputDelta> = BTreeMap::new();

        for key in old_keys {
            if outputs.get(&key).map_or(false, |files| !files.is_empty()) {
                continue;
            }
            if let Some(sources) = self.by_output.get_mut(&key) {
                let removed = sources.remove(&source).unwrap_or_default();
                if sources.is_empty() {
                    self.by_output.remove(&key);
                }
                deltas.insert(
                    key.clone(),
                    OutputDelta {
                        key,
                        removed,
                        added: Vec::new(),
                        fresh: false,
                    },
                );
            }
        }

        let mut new_keys = BTreeSet::new();
        for (key, files) in outputs {
            if files.is_empty() {
                continue;
            }
            new_keys.insert(key.clone());
            let sources = self.by_output.entry(key.clone()).or_default();
            let fresh = sources.is_empty();
            let removed = sources.insert(source.clone(), files.clone()).unwrap_or_default();
            if removed != files {
                deltas.insert(
                    key.clone(),
                    OutputDelta {
                        key,
                        removed,
                        added: files,
                        fresh,
                    },
                );
            }
        }
        if !new_keys.is_empty() {
            self.by_source.insert(source, new_keys);
        }

        deltas.into_values().collect()
    }

    /// All files contributed to `key`, in source order.
    pub fn values_for(&self, key: &Key) -> Vec<File> {
        self.by_output
            .get(key)
            .map(|sources| sources.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_output(&self, key: &Key) -> bool {
        self.by_output.contains_key(key)
    }

    /// Output keys produced by `source`.
    pub fn outputs_of(&self, source: &SourceRef) -> Option<&BTreeSet<Key>> {
        self.by_source.get(source)
    }

    pub fn len(&self) -> usize {
        self.by_output.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_output.is_empty()
    }
}

/// Dependency edge producing one derived directory.
#[derive(Clone)]
pub struct Arrow {
    pub child: DirId,
    pub parents: Vec<ParentSlot>,
    pub reducer: Option<Arc<dyn Reducer>>,
    pub contributions: ContributionIndex,
}

impl Arrow {
    pub fn new(child: DirId, parents: Vec<ParentSlot>, reducer: Option<Arc<dyn Reducer>>) -> Self {
        Arrow {
            child,
            parents,
            reducer,
            contributions: ContributionIndex::new(),
        }
    }

    pub fn parent_ids(&self) -> impl Iterator<Item = DirId> + '_ {
        self.parents.iter().map(|p| p.dir)
    }
}

impl fmt::Debug for Arrow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arrow")
            .field("child", &self.child)
            .field("parents", &self.parents)
            .field("reducer", &self.reducer.is_some())
            .field("outputs", &self.contributions.len())
            .finish()
    }
}
