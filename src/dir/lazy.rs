//! Lazy (pull-model) directories
//!
//! A lazy directory computes the files of a key on first read and caches them. Each cache
//! entry remembers what its computation read, and what those reads returned, so it can be
//! revalidated against later changes without recomputing.

use crate::context::Context;
use crate::dir::DirName;
use crate::types::{DirId, Tick};
use crate::value::{File, Key};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Compute closure of a lazy directory. `Ok(None)` means "no value": nothing is cached.
pub type LazyFn =
    Arc<dyn Fn(&mut Context, &DirName, &Key) -> anyhow::Result<Option<Vec<File>>> + Send + Sync>;

/// Everything a computation read: individual entries and whole-directory scans.
///
/// Entries keep the files the read returned and scans keep the directory revision, so a
/// dependency counts as changed only when what was observed differs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSet {
    pub keys: Vec<(DirId, Key, Vec<File>)>,
    pub scans: Vec<(DirId, u64)>,
}

impl ReadSet {
    /// Record a read of `(dir, key)` returning `files`. The first observation wins.
    pub fn record_key(&mut self, dir: DirId, key: &Key, files: &[File]) {
        if !self.keys.iter().any(|(d, k, _)| *d == dir && k == key) {
            self.keys.push((dir, key.clone(), files.to_vec()));
        }
    }

    pub fn record_scan(&mut self, dir: DirId, revision: u64) {
        if !self.scans.iter().any(|(d, _)| *d == dir) {
            self.scans.push((dir, revision));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.scans.is_empty()
    }
}

/// Cached value of one key.
#[derive(Debug, Clone)]
pub struct LazyEntry {
    pub files: Vec<File>,
    /// Tick at which the compute closure last ran for this key.
    pub computed_at: Tick,
    /// Tick at which `files` last took a different value.
    pub changed_at: Tick,
    /// Context write count at which the entry was last confirmed fresh.
    pub verified_epoch: u64,
    /// Reads performed while computing.
    pub deps: ReadSet,
}

#[derive(Clone)]
pub struct LazyDir {
    pub(crate) name: DirName,
    pub(crate) compute: LazyFn,
    pub(crate) collect: bool,
    cache: BTreeMap<Key, LazyEntry>,
    compute_count: u64,
    revision: u64,
}

impl LazyDir {
    pub(crate) fn new(name: DirName, compute: LazyFn, collect: bool) -> Self {
        LazyDir {
            name,
            compute,
            collect,
            cache: BTreeMap::new(),
            compute_count: 0,
            revision: 0,
        }
    }

    pub fn name(&self) -> &DirName {
        &self.name
    }

    pub fn collect(&self) -> bool {
        self.collect
    }

    pub fn entry(&self, key: &Key) -> Option<&LazyEntry> {
        self.cache.get(key)
    }

    pub(crate) fn entry_mut(&mut self, key: &Key) -> Option<&mut LazyEntry> {
        self.cache.get_mut(key)
    }

    /// Cached entries in key order. Keys never read are absent.
    pub fn cached(&self) -> impl Iterator<Item = (&Key, &LazyEntry)> {
        self.cache.iter()
    }

    pub fn size(&self) -> usize {
        self.cache.len()
    }

    /// How many times the compute closure has run.
    pub fn compute_count(&self) -> u64 {
        self.compute_count
    }

    /// Bumped whenever a cached array changes or disappears.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn note_compute(&mut self) {
        self.compute_count += 1;
    }

    pub(crate) fn forget(&mut self, key: &Key) {
        if self.cache.remove(key).is_some() {
            self.revision += 1;
        }
    }

    /// Store a freshly computed value, returning the files now cached.
    ///
    /// With `collect` the new files are appended to the previous ones (skipping files
    /// already present); otherwise they replace them. The change tick only moves when the
    /// resulting array differs from the previous one. `epoch` is the context write count
    /// observed before the computation started.
    pub(crate) fn store(
        &mut self,
        key: &Key,
        computed: Vec<File>,
        deps: ReadSet,
        tick: Tick,
        epoch: u64,
    ) -> Vec<File> {
        let previous = self.cache.get(key);
        let files = match (self.collect, previous) {
            (true, Some(prev)) => {
                let mut merged = prev.files.clone();
                for file in computed {
                    if !merged.contains(&file) {
                        merged.push(file);
                    }
                }
                merged
            }
            _ => computed,
        };
        let changed_at = match previous {
            Some(prev) if prev.files == files => prev.changed_at,
            _ => {
                self.revision += 1;
                tick
            }
        };
        self.cache.insert(
            key.clone(),
            LazyEntry {
                files: files.clone(),
                computed_at: tick,
                changed_at,
                verified_epoch: epoch,
                deps,
            },
        );
        files
    }
}

impl fmt::Debug for LazyDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyDir")
            .field("name", &self.name)
            .field("collect", &self.collect)
            .field("cached", &self.cache.len())
            .field("compute_count", &self.compute_count)
            .finish()
    }
}
