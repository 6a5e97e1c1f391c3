//! Lazy evaluation: on-demand computation, dependency recording and cycle detection.

use super::Context;
use crate::dir::{Dir, DirName, LazyDir, LazyFn, ReadSet};
use crate::error::StoreError;
use crate::types::DirId;
use crate::value::{File, Key};
use tracing::{debug, instrument, trace};

/// A lazy key being computed, with everything its computation has read so far.
#[derive(Debug)]
pub(crate) struct LazyFrame {
    pub(crate) dir: DirId,
    pub(crate) key: Key,
    pub(crate) reads: ReadSet,
}

impl Context {
    /// Register a lazy directory computing entries with `compute`.
    ///
    /// With `collect`, each recomputation of a key keeps the files cached so far and
    /// adds the newly produced ones; otherwise it replaces them.
    pub fn mk_lazy(
        &mut self,
        name: DirName,
        compute: LazyFn,
        collect: bool,
    ) -> Result<DirId, StoreError> {
        self.register(Dir::Lazy(LazyDir::new(name, compute, collect)))
    }

    /// Whether `(dir, key)` is currently being computed.
    pub fn is_computing(&self, dir: DirId, key: &Key) -> bool {
        self.lazy_stack
            .iter()
            .any(|frame| frame.dir == dir && &frame.key == key)
    }

    pub(crate) fn record_read(&mut self, dir: DirId, key: &Key, files: &[File]) {
        if let Some(frame) = self.lazy_stack.last_mut() {
            frame.reads.record_key(dir, key, files);
        }
    }

    pub(crate) fn record_scan(&mut self, dir: DirId) {
        if self.lazy_stack.is_empty() {
            return;
        }
        let Ok(revision) = self.state.dir(dir).map(Dir::revision) else {
            return;
        };
        if let Some(frame) = self.lazy_stack.last_mut() {
            frame.reads.record_scan(dir, revision);
        }
    }

    pub(crate) fn lazy_get(
        &mut self,
        id: DirId,
        key: &Key,
        throw_on_cycle: bool,
    ) -> Result<Vec<File>, StoreError> {
        if self.is_computing(id, key) {
            let dir = self.dir_name(id)?;
            debug!(dir = %dir, key = %key, throw_on_cycle, "Cyclic lazy demand");
            return if throw_on_cycle {
                Err(StoreError::CycleDetected {
                    dir,
                    key: key.clone(),
                })
            } else {
                Ok(Vec::new())
            };
        }

        let result = match self.is_fresh(id, key) {
            Ok(true) => Ok(self.cached_files(id, key)?),
            Ok(false) => self.recompute(id, key),
            Err(err) => Err(err),
        };
        // A failed read is recorded as empty so the reader revalidates it later.
        self.record_read(id, key, result.as_deref().unwrap_or(&[]));
        result
    }

    fn cached_files(&self, id: DirId, key: &Key) -> Result<Vec<File>, StoreError> {
        Ok(self
            .state
            .lazy(id)?
            .entry(key)
            .map(|e| e.files.clone())
            .unwrap_or_default())
    }

    /// Whether the cached entry of `(id, key)` can be served as is.
    ///
    /// An entry is fresh when every read it performed would return the same files today
    /// and no directory it scanned moved. Lazy dependencies are brought up to date first,
    /// so a dependency that recomputed to the same value does not invalidate its readers.
    /// A positive answer holds until the next effective eager write.
    fn is_fresh(&mut self, id: DirId, key: &Key) -> Result<bool, StoreError> {
        let epoch = self.state.epoch;
        let reads = match self.state.lazy(id)?.entry(key) {
            None => return Ok(false),
            Some(entry) if entry.verified_epoch == epoch => return Ok(true),
            Some(entry) => entry.deps.clone(),
        };

        for (dep, dep_key, seen) in &reads.keys {
            let lazy_dep = matches!(self.state.dir(*dep)?, Dir::Lazy(_));
            if lazy_dep
                && (self.is_computing(*dep, dep_key) || self.refresh(*dep, dep_key).is_err())
            {
                return Ok(false);
            }
            if &self.current_files(*dep, dep_key)? != seen {
                return Ok(false);
            }
        }
        for (dep, seen) in &reads.scans {
            if self.state.dir(*dep)?.revision() != *seen {
                return Ok(false);
            }
        }

        if let Some(entry) = self.state.lazy_mut(id)?.entry_mut(key) {
            entry.verified_epoch = epoch;
        }
        Ok(true)
    }

    /// What a read of `(id, key)` returns right now, without computing.
    fn current_files(&self, id: DirId, key: &Key) -> Result<Vec<File>, StoreError> {
        match self.state.dir(id)? {
            Dir::Eager(dir) => Ok(dir.get_array(key).to_vec()),
            Dir::Lazy(_) => self.cached_files(id, key),
        }
    }

    /// Bring `(id, key)` up to date without recording a read.
    fn refresh(&mut self, id: DirId, key: &Key) -> Result<(), StoreError> {
        if !self.is_fresh(id, key)? {
            self.recompute(id, key)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(dir = id.index(), key = %key))]
    fn recompute(&mut self, id: DirId, key: &Key) -> Result<Vec<File>, StoreError> {
        let (name, compute) = {
            let dir = self.state.lazy(id)?;
            (dir.name().clone(), dir.compute.clone())
        };

        let epoch = self.state.epoch;
        self.lazy_stack.push(LazyFrame {
            dir: id,
            key: key.clone(),
            reads: ReadSet::default(),
        });
        let result = compute(self, &name, key);
        let reads = self
            .lazy_stack
            .pop()
            .map(|frame| frame.reads)
            .unwrap_or_default();

        let tick = self.state.tick;
        let dir = self.state.lazy_mut(id)?;
        dir.note_compute();
        match result {
            Err(err) => Err(StoreError::from_transform(&name, key, err)),
            Ok(None) => {
                dir.forget(key);
                trace!("Lazy compute produced no value");
                Ok(Vec::new())
            }
            Ok(Some(files)) => {
                let files = dir.store(key, files, reads, tick, epoch);
                trace!(files = files.len(), "Lazy compute cached");
                Ok(files)
            }
        }
    }
}
