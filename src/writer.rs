//! Writer: staging buffer handed to every map invocation.
//!
//! Nothing a map closure writes is visible until the invocation returns successfully;
//! the propagation engine then commits the staged entries for that source key at once.

use crate::dir::DirName;
use crate::error::StoreError;
use crate::value::{File, Key};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct Writer {
    target: DirName,
    staged: BTreeMap<Key, Vec<File>>,
}

impl Writer {
    pub(crate) fn new(target: DirName) -> Self {
        Writer {
            target,
            staged: BTreeMap::new(),
        }
    }

    /// Directory the staged entries will be committed to.
    pub fn target(&self) -> &DirName {
        &self.target
    }

    /// Stage a single file for `key`. Fails if `key` was already staged.
    pub fn set(&mut self, key: Key, file: File) -> Result<(), StoreError> {
        self.set_array(key, vec![file])
    }

    /// Stage the full array for `key`. Fails if `key` was already staged.
    pub fn set_array(&mut self, key: Key, files: Vec<File>) -> Result<(), StoreError> {
        if self.staged.contains_key(&key) {
            return Err(StoreError::DuplicateKeyWrite {
                dir: self.target.clone(),
                key,
            });
        }
        self.staged.insert(key, files);
        Ok(())
    }

    /// Add a file to whatever is already staged for `key`.
    pub fn append(&mut self, key: Key, file: File) {
        self.staged.entry(key).or_default().push(file);
    }

    /// Stage an explicit "no files" for `key`. Fails if `key` was already staged.
    pub fn remove(&mut self, key: Key) -> Result<(), StoreError> {
        self.set_array(key, Vec::new())
    }

    pub fn staged(&self, key: &Key) -> &[File] {
        self.staged.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub(crate) fn into_staged(self) -> BTreeMap<Key, Vec<File>> {
        self.staged
    }
}
