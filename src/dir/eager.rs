//! Eager (push-model) directories

use crate::dir::changes::ChangeIndex;
use crate::dir::DirName;
use crate::types::{DirId, Tick};
use crate::value::{File, Key};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Callback invoked with the removed files when a key disappears from a directory.
pub type DeleteHook = Arc<dyn Fn(&Key, &[File]) + Send + Sync>;

/// How an eager directory gets its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EagerKind {
    /// Written from outside through the write API.
    Input,
    /// Produced by an arrow during propagation.
    Derived,
    /// Previous-tick snapshot of `source`. `owed` holds the keys that changed in the
    /// source during the last committed batch and still need to be shifted forward.
    Pre { source: DirId, owed: BTreeSet<Key> },
}

/// Versioned ordered multimap Key -> [File] with change tracking.
#[derive(Clone)]
pub struct EagerDir {
    pub(crate) name: DirName,
    pub(crate) kind: EagerKind,
    data: BTreeMap<Key, Vec<File>>,
    fixed: BTreeMap<Key, Vec<File>>,
    total_size: usize,
    changes: ChangeIndex,
    /// Bumped on every effective write.
    revision: u64,
    on_delete: Vec<DeleteHook>,
    /// Values as of the last committed batch, captured on first write per key.
    /// `Some` only while a pre snapshot of this directory exists.
    pre_capture: Option<BTreeMap<Key, Vec<File>>>,
}

impl EagerDir {
    pub(crate) fn new(name: DirName, kind: EagerKind) -> Self {
        EagerDir {
            name,
            kind,
            data: BTreeMap::new(),
            fixed: BTreeMap::new(),
            total_size: 0,
            changes: ChangeIndex::new(),
            revision: 0,
            on_delete: Vec::new(),
            pre_capture: None,
        }
    }

    /// Seed the directory with its initial contents, which also become its fixed data.
    pub(crate) fn seed(&mut self, entries: Vec<(Key, Vec<File>)>, tick: Tick) {
        for (key, files) in entries {
            if self.write(key.clone(), files.clone(), tick) {
                self.fixed.insert(key, files);
            }
        }
    }

    pub fn name(&self) -> &DirName {
        &self.name
    }

    pub fn kind(&self) -> &EagerKind {
        &self.kind
    }

    pub fn is_input(&self) -> bool {
        self.kind == EagerKind::Input
    }

    /// Current files for `key`; empty when absent.
    pub fn get_array(&self, key: &Key) -> &[File] {
        self.data.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.data.contains_key(key)
    }

    /// Entries in key order.
    pub fn items(&self) -> impl Iterator<Item = (&Key, &Vec<File>)> {
        self.data.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.data.keys()
    }

    /// Number of keys holding at least one file.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of files across all keys.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn fixed_data(&self) -> &BTreeMap<Key, Vec<File>> {
        &self.fixed
    }

    pub fn changed_at(&self, key: &Key) -> Option<Tick> {
        self.changes.changed_at(key)
    }

    /// Keys changed strictly after `tick`, in key order. Removed keys are included.
    pub fn changes_after(&self, tick: Tick) -> BTreeSet<Key> {
        self.changes.changes_after(tick)
    }

    pub fn last_change(&self) -> Option<Tick> {
        self.changes.latest()
    }

    /// Counter of effective writes. Unlike ticks it moves on every change, including
    /// several changes within one propagation pass.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replace the files of `key`. Returns `false` when the new array equals the current
    /// one, in which case nothing is recorded.
    pub(crate) fn write(&mut self, key: Key, files: Vec<File>, tick: Tick) -> bool {
        if self.get_array(&key) == files.as_slice() {
            return false;
        }

        if let Some(capture) = self.pre_capture.as_mut() {
            if !capture.contains_key(&key) {
                let old = self.data.get(&key).cloned().unwrap_or_default();
                capture.insert(key.clone(), old);
            }
        }

        self.total_size += files.len();
        self.changes.record(&key, tick);
        self.revision += 1;
        let removed = if files.is_empty() {
            self.data.remove(&key)
        } else {
            self.data.insert(key.clone(), files)
        };

        if let Some(old) = removed {
            self.total_size -= old.len();
            if !self.data.contains_key(&key) {
                for hook in &self.on_delete {
                    hook(&key, &old);
                }
            }
        }
        true
    }

    pub(crate) fn add_delete_hook(&mut self, hook: DeleteHook) {
        self.on_delete.push(hook);
    }

    pub(crate) fn enable_pre_capture(&mut self) {
        if self.pre_capture.is_none() {
            self.pre_capture = Some(BTreeMap::new());
        }
    }

    /// Take the values captured since the last committed batch.
    pub(crate) fn take_pre_capture(&mut self) -> BTreeMap<Key, Vec<File>> {
        self.pre_capture
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub(crate) fn snapshot_data(&self) -> BTreeMap<Key, Vec<File>> {
        self.data.clone()
    }
}

impl fmt::Debug for EagerDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerDir")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("size", &self.data.len())
            .field("total_size", &self.total_size)
            .field("on_delete", &self.on_delete.len())
            .finish()
    }
}
