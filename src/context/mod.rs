//! Context: directory registry, logical clock and engine state
//!
//! A [`Context`] owns every directory of one engine instance in an arena indexed by
//! [`DirId`], together with the arrows connecting them, the tick, the set of directories
//! changed since the last `update()`, named globals and subscription cursors. All
//! operations take the context explicitly; there is no ambient engine state.

pub mod async_lazy;
mod lazy;
mod propagate;
pub mod snapshot;
pub mod subscription;

pub use async_lazy::{AsyncStart, AsyncValue};
pub use propagate::{FixedSingle, UpdateSummary};
pub use snapshot::SavedContext;
pub use subscription::{
    GroupFn, RowFilter, SubscriptionBatch, SubscriptionBuffer, SubscriptionOptions,
    SubscriptionSink,
};

use crate::arrow::Arrow;
use crate::config::StoreConfig;
use crate::dir::{DeleteHook, Dir, DirName, DirStats, EagerDir, EagerKind, LazyDir};
use crate::error::StoreError;
use crate::types::{CallId, DirId, SessionId, Tick};
use crate::value::{File, Key};
use async_lazy::{AsyncDirState, PendingCall};
use lazy::LazyFrame;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use subscription::Subscription;
use tracing::debug;

/// Untyped global value.
pub type GlobalValue = Arc<dyn Any + Send + Sync>;

/// Clonable part of a context: everything a snapshot carries.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    pub(crate) dirs: Vec<Dir>,
    pub(crate) names: HashMap<DirName, DirId>,
    /// Arrow producing each derived directory, keyed by child.
    pub(crate) arrows: BTreeMap<DirId, Arrow>,
    /// Parent -> directories that must be refreshed when it changes.
    pub(crate) dependents: HashMap<DirId, BTreeSet<DirId>>,
    /// Source -> its previous-tick snapshot.
    pub(crate) pre_of: HashMap<DirId, DirId>,
    pub(crate) tick: Tick,
    /// Directories changed since the last completed `update()`.
    pub(crate) dirty: BTreeSet<DirId>,
    /// Effective eager writes so far. Several can share one tick during a propagation
    /// pass, so lazy verification is keyed on this count.
    pub(crate) epoch: u64,
    pub(crate) globals: BTreeMap<String, GlobalValue>,
    pub(crate) async_dirs: HashMap<DirId, AsyncDirState>,
    pub(crate) pending_calls: BTreeMap<CallId, PendingCall>,
    pub(crate) next_call: u64,
}

impl Registry {
    pub(crate) fn dir(&self, id: DirId) -> Result<&Dir, StoreError> {
        self.dirs.get(id.index()).ok_or(StoreError::UnknownDirId(id))
    }

    pub(crate) fn dir_mut(&mut self, id: DirId) -> Result<&mut Dir, StoreError> {
        self.dirs.get_mut(id.index()).ok_or(StoreError::UnknownDirId(id))
    }

    pub(crate) fn eager(&self, id: DirId) -> Result<&EagerDir, StoreError> {
        let dir = self.dir(id)?;
        dir.as_eager().ok_or_else(|| StoreError::WrongDirectoryKind {
            dir: dir.name().clone(),
            expected: "an eager directory",
        })
    }

    pub(crate) fn eager_mut(&mut self, id: DirId) -> Result<&mut EagerDir, StoreError> {
        let dir = self.dir_mut(id)?;
        let name = dir.name().clone();
        dir.as_eager_mut().ok_or(StoreError::WrongDirectoryKind {
            dir: name,
            expected: "an eager directory",
        })
    }

    pub(crate) fn lazy(&self, id: DirId) -> Result<&LazyDir, StoreError> {
        let dir = self.dir(id)?;
        dir.as_lazy().ok_or_else(|| StoreError::WrongDirectoryKind {
            dir: dir.name().clone(),
            expected: "a lazy directory",
        })
    }

    pub(crate) fn lazy_mut(&mut self, id: DirId) -> Result<&mut LazyDir, StoreError> {
        let dir = self.dir_mut(id)?;
        let name = dir.name().clone();
        dir.as_lazy_mut().ok_or(StoreError::WrongDirectoryKind {
            dir: name,
            expected: "a lazy directory",
        })
    }

    /// Id the next registered directory will receive.
    pub(crate) fn next_id(&self) -> DirId {
        DirId(self.dirs.len())
    }
}

/// One engine instance.
pub struct Context {
    pub(crate) state: Registry,
    pub(crate) config: StoreConfig,
    pub(crate) lazy_stack: Vec<LazyFrame>,
    pub(crate) subscriptions: BTreeMap<SessionId, Subscription>,
    pub(crate) next_session: u64,
    pub(crate) current_arrow: Option<DirName>,
}

impl Context {
    /// Fresh, empty context at tick 0 with default configuration.
    pub fn create() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Context {
            state: Registry::default(),
            config,
            lazy_stack: Vec::new(),
            subscriptions: BTreeMap::new(),
            next_session: 0,
            current_arrow: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn tick(&self) -> Tick {
        self.state.tick
    }

    // ---- registry ----

    pub(crate) fn register(&mut self, dir: Dir) -> Result<DirId, StoreError> {
        let name = dir.name().clone();
        if self.state.names.contains_key(&name) {
            return Err(StoreError::DuplicateDirectory(name));
        }
        let id = self.state.next_id();
        debug!(dir = %name, kind = ?dir.kind(), "Registered directory");
        self.state.dirs.push(dir);
        self.state.names.insert(name, id);
        Ok(id)
    }

    /// Id of a directory that must exist.
    pub fn dir_id(&self, name: &DirName) -> Result<DirId, StoreError> {
        self.maybe_get_dir(name)
            .ok_or_else(|| StoreError::DirectoryNotFound(name.clone()))
    }

    pub fn maybe_get_dir(&self, name: &DirName) -> Option<DirId> {
        self.state.names.get(name).copied()
    }

    pub fn dir_name(&self, id: DirId) -> Result<DirName, StoreError> {
        Ok(self.state.dir(id)?.name().clone())
    }

    pub fn dir(&self, id: DirId) -> Result<&Dir, StoreError> {
        self.state.dir(id)
    }

    /// Eager directory by id, without recording a read.
    pub fn eager_dir(&self, id: DirId) -> Result<&EagerDir, StoreError> {
        self.state.eager(id)
    }

    /// Lazy directory by id, without triggering computation.
    pub fn lazy_dir(&self, id: DirId) -> Result<&LazyDir, StoreError> {
        self.state.lazy(id)
    }

    /// Names of all registered directories, sorted.
    pub fn dir_names(&self) -> Vec<DirName> {
        let mut names: Vec<DirName> = self.state.names.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn dir_stats(&self, id: DirId) -> Result<DirStats, StoreError> {
        let dir = self.state.dir(id)?;
        let (size, total_files) = match dir {
            Dir::Eager(d) => (d.size(), d.total_size()),
            Dir::Lazy(d) => (d.size(), d.cached().map(|(_, e)| e.files.len()).sum()),
        };
        Ok(DirStats {
            name: dir.name().clone(),
            kind: dir.kind(),
            size,
            total_files,
        })
    }

    // ---- eager directories ----

    /// Register a new eager directory seeded with `entries`.
    ///
    /// The seed also becomes the directory's fixed data, restored by [`Context::reset_input`].
    pub fn mkdir(
        &mut self,
        name: DirName,
        is_input: bool,
        entries: Vec<(Key, Vec<File>)>,
    ) -> Result<DirId, StoreError> {
        let kind = if is_input {
            EagerKind::Input
        } else {
            EagerKind::Derived
        };
        let mut dir = EagerDir::new(name, kind);
        dir.seed(entries, self.state.tick);
        self.register(Dir::Eager(dir))
    }

    /// Write one key of an input directory as its own batch.
    pub fn write_array(&mut self, id: DirId, key: Key, files: Vec<File>) -> Result<(), StoreError> {
        self.write_array_many(id, vec![(key, files)])
    }

    /// Write several keys of an input directory as one batch.
    ///
    /// The batch advances the tick once if anything changed. Changes become visible to
    /// derived directories on the next [`Context::update`].
    pub fn write_array_many<I>(&mut self, id: DirId, entries: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = (Key, Vec<File>)>,
    {
        let dir = self.state.eager(id)?;
        if !dir.is_input() {
            return Err(StoreError::NotAnInputDirectory(dir.name().clone()));
        }
        let tick = self.state.tick.next();
        let mut changed = 0usize;
        for (key, files) in entries {
            if self.commit(id, key, files, tick)? {
                changed += 1;
            }
        }
        if changed > 0 {
            self.state.tick = tick;
            debug!(dir = %self.dir_name(id)?, changed, tick = %tick, "Committed write batch");
        }
        Ok(())
    }

    /// Restore an input directory to the contents it was created with.
    pub fn reset_input(&mut self, id: DirId) -> Result<(), StoreError> {
        let dir = self.state.eager(id)?;
        if !dir.is_input() {
            return Err(StoreError::NotAnInputDirectory(dir.name().clone()));
        }
        let fixed = dir.fixed_data().clone();
        let stale: Vec<Key> = dir.keys().filter(|k| !fixed.contains_key(*k)).cloned().collect();
        let entries = stale
            .into_iter()
            .map(|k| (k, Vec::new()))
            .chain(fixed);
        self.write_array_many(id, entries.collect::<Vec<_>>())
    }

    /// Write into an eager directory at `tick`, bypassing the input check.
    pub(crate) fn commit(
        &mut self,
        id: DirId,
        key: Key,
        files: Vec<File>,
        tick: Tick,
    ) -> Result<bool, StoreError> {
        let changed = self.state.eager_mut(id)?.write(key, files, tick);
        if changed {
            self.state.dirty.insert(id);
            self.state.epoch += 1;
        }
        Ok(changed)
    }

    /// Keys of `id` changed strictly after `tick`.
    pub fn changes_after(&self, id: DirId, tick: Tick) -> Result<BTreeSet<Key>, StoreError> {
        Ok(self.state.eager(id)?.changes_after(tick))
    }

    /// Register a callback run whenever a key disappears from `id`.
    pub fn on_delete(&mut self, id: DirId, hook: DeleteHook) -> Result<(), StoreError> {
        self.state.eager_mut(id)?.add_delete_hook(hook);
        Ok(())
    }

    // ---- reads ----

    /// Files of `key` in any directory. Lazy directories compute on demand using the
    /// configured cycle policy.
    pub fn get_array(&mut self, id: DirId, key: &Key) -> Result<Vec<File>, StoreError> {
        let throw_on_cycle = self.config.lazy.throw_on_cycle;
        self.get_array_with_options(id, key, throw_on_cycle)
    }

    /// Like [`Context::get_array`] with an explicit cycle policy: on a cyclic demand either
    /// fail with `CycleDetected` or read an empty array.
    pub fn get_array_with_options(
        &mut self,
        id: DirId,
        key: &Key,
        throw_on_cycle: bool,
    ) -> Result<Vec<File>, StoreError> {
        match self.state.dir(id)? {
            Dir::Eager(dir) => {
                let files = dir.get_array(key).to_vec();
                self.record_read(id, key, &files);
                Ok(files)
            }
            Dir::Lazy(_) => self.lazy_get(id, key, throw_on_cycle),
        }
    }

    /// All entries in key order. For lazy directories, only cached entries.
    pub fn items(&mut self, id: DirId) -> Result<Vec<(Key, Vec<File>)>, StoreError> {
        let items = match self.state.dir(id)? {
            Dir::Eager(dir) => dir.items().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Dir::Lazy(dir) => dir
                .cached()
                .map(|(k, e)| (k.clone(), e.files.clone()))
                .collect(),
        };
        self.record_scan(id);
        Ok(items)
    }

    pub fn size(&mut self, id: DirId) -> Result<usize, StoreError> {
        let size = match self.state.dir(id)? {
            Dir::Eager(dir) => dir.size(),
            Dir::Lazy(dir) => dir.size(),
        };
        self.record_scan(id);
        Ok(size)
    }

    // ---- pre snapshots ----

    /// Previous-tick snapshot of an eager directory.
    ///
    /// The first call sets the snapshot up and returns `None`: there is no previous tick yet.
    /// From the next call on the snapshot directory is returned. It holds, for every key, the
    /// value from before the most recent `update()` that changed the source.
    pub fn pre(&mut self, id: DirId) -> Result<Option<DirId>, StoreError> {
        if let Some(pre) = self.state.pre_of.get(&id) {
            return Ok(Some(*pre));
        }
        let source = self.state.eager_mut(id)?;
        source.enable_pre_capture();
        let name = source.name().pre();
        let data = source.snapshot_data().into_iter().collect();

        let mut dir = EagerDir::new(
            name,
            EagerKind::Pre {
                source: id,
                owed: BTreeSet::new(),
            },
        );
        dir.seed(data, self.state.tick);
        let pre = self.register(Dir::Eager(dir))?;
        self.state.pre_of.insert(id, pre);
        self.state.dependents.entry(id).or_default().insert(pre);
        Ok(None)
    }

    pub fn has_pre(&self, id: DirId) -> bool {
        self.state.pre_of.contains_key(&id)
    }

    // ---- arrows ----

    /// Name of the derived directory whose map closure is currently running.
    pub fn current_arrow(&self) -> Option<&DirName> {
        self.current_arrow.as_ref()
    }

    /// Parents of a derived directory, in declaration order. Empty for other directories.
    pub fn arrow_parents(&self, id: DirId) -> Vec<DirId> {
        self.state
            .arrows
            .get(&id)
            .map(|a| a.parent_ids().collect())
            .unwrap_or_default()
    }

    // ---- globals ----

    /// Store an untyped named value. Globals are not versioned or tracked by propagation.
    pub fn set_global<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.state.globals.insert(name.into(), Arc::new(value));
    }

    /// Read a global back as `T`; `None` when absent or of another type.
    pub fn get_global<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.state.globals.get(name)?.clone().downcast::<T>().ok()
    }

    pub fn remove_global(&mut self, name: &str) -> Option<GlobalValue> {
        self.state.globals.remove(name)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::create()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("tick", &self.state.tick)
            .field("dirs", &self.state.dirs.len())
            .field("arrows", &self.state.arrows.len())
            .field("dirty", &self.state.dirty)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
