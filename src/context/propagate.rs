//! Eager propagation
//!
//! `apply`/`apply_many` declare derived directories; `update` brings every derived
//! directory reachable from a changed directory up to date, in dependency order, touching
//! only the parent keys that changed since each arrow last ran.

use super::Context;
use crate::arrow::{Arrow, MapFn, OutputDelta, ParentSlot};
use crate::dir::{Dir, DirName, EagerDir, EagerKind};
use crate::error::StoreError;
use crate::reducer::{Reducer, ReducerUpdate};
use crate::types::{DirId, SessionId, Tick};
use crate::value::key::in_ranges;
use crate::value::{File, Key, KeyRange};
use crate::writer::Writer;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

/// One parent of a multi-parent derivation.
#[derive(Clone)]
pub struct FixedSingle {
    pub parent: DirId,
    pub map: MapFn,
    pub ranges: Option<Vec<KeyRange>>,
}

impl FixedSingle {
    pub fn new(parent: DirId, map: MapFn) -> Self {
        FixedSingle {
            parent,
            map,
            ranges: None,
        }
    }

    pub fn with_ranges(mut self, ranges: Vec<KeyRange>) -> Self {
        self.ranges = Some(ranges);
        self
    }
}

/// What one `update()` pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Tick of the pass; unchanged when there was nothing to do.
    pub tick: Tick,
    /// Derived directories that recomputed at least one key
    pub dirs_refreshed: usize,
    /// Parent keys passed to map closures
    pub keys_recomputed: usize,
    /// Subscriptions whose changes could not be collected; they catch up on a later pass.
    pub failed_subscriptions: Vec<SessionId>,
}

impl Context {
    /// Declare a derived directory `child` computed from `parent` by `map`.
    ///
    /// See [`Context::apply_many`].
    pub fn apply(
        &mut self,
        parent: DirId,
        child: DirName,
        map: MapFn,
        reducer: Option<Arc<dyn Reducer>>,
        ranges: Option<Vec<KeyRange>>,
    ) -> Result<DirId, StoreError> {
        self.apply_many(
            vec![FixedSingle {
                parent,
                map,
                ranges,
            }],
            child,
            reducer,
        )
    }

    /// Declare a derived directory fed by several parents.
    ///
    /// The child is computed right away from the parents' current contents. Declaring
    /// the same child again over the same parents returns the existing directory; any
    /// other reuse of the name is a `DuplicateDirectory` error.
    pub fn apply_many(
        &mut self,
        parents: Vec<FixedSingle>,
        child: DirName,
        reducer: Option<Arc<dyn Reducer>>,
    ) -> Result<DirId, StoreError> {
        if let Some(existing) = self.maybe_get_dir(&child) {
            let same_parents = self.state.arrows.get(&existing).map_or(false, |arrow| {
                arrow.parent_ids().eq(parents.iter().map(|p| p.parent))
            });
            return if same_parents {
                Ok(existing)
            } else {
                Err(StoreError::DuplicateDirectory(child))
            };
        }
        for parent in &parents {
            self.state.eager(parent.parent)?;
        }

        let tick = self.state.tick;
        let id = self.register(Dir::Eager(EagerDir::new(
            child.clone(),
            EagerKind::Derived,
        )))?;
        let slots = parents
            .into_iter()
            .map(|p| ParentSlot {
                dir: p.parent,
                map: p.map,
                ranges: p.ranges,
                last_seen: tick,
            })
            .collect();
        let mut arrow = Arrow::new(id, slots, reducer);

        let previous = self.current_arrow.replace(child.clone());
        let initial = self.run_arrow(&mut arrow, &child, tick, true);
        self.current_arrow = previous;

        match initial {
            Ok(keys) => {
                for parent in arrow.parent_ids() {
                    self.state.dependents.entry(parent).or_default().insert(id);
                }
                self.state.arrows.insert(id, arrow);
                self.state.dirty.remove(&id);
                debug!(dir = %child, keys, "Declared derived directory");
                Ok(id)
            }
            Err(err) => {
                // The arena slot stays behind unreachable; the name can be declared again.
                self.state.names.remove(&child);
                self.state.dirty.remove(&id);
                Err(err)
            }
        }
    }

    /// Propagate every change committed since the last pass.
    ///
    /// Does nothing when no directory changed, so calling it twice in a row is a no-op.
    /// A map or reducer failure aborts the pass and leaves the remaining work pending:
    /// keys already folded stay committed and the next call resumes where this one failed.
    #[instrument(skip(self), fields(tick = %self.state.tick))]
    pub fn update(&mut self) -> Result<UpdateSummary, StoreError> {
        if self.state.dirty.is_empty() {
            return Ok(UpdateSummary {
                tick: self.state.tick,
                ..UpdateSummary::default()
            });
        }
        let start = Instant::now();
        let tick = self.state.tick.next();
        self.state.tick = tick;
        let mut summary = UpdateSummary {
            tick,
            ..UpdateSummary::default()
        };

        // Step 1: everything reachable from a changed directory, in creation order
        let order = self.propagation_order();
        debug!(candidates = order.len(), "Computed propagation order");

        // Step 2: refresh derived directories and shift pre snapshots
        for id in order {
            if self.state.arrows.contains_key(&id) {
                let keys = self.refresh_derived(id, tick)?;
                if keys > 0 {
                    summary.dirs_refreshed += 1;
                    summary.keys_recomputed += keys;
                }
            } else if matches!(self.state.eager(id)?.kind(), EagerKind::Pre { .. }) {
                self.shift_pre(id, tick)?;
            }
        }
        self.state.dirty.clear();

        info!(
            tick = %tick,
            dirs_refreshed = summary.dirs_refreshed,
            keys_recomputed = summary.keys_recomputed,
            duration_ms = start.elapsed().as_millis(),
            "Update completed"
        );

        // Step 3: push changes to subscribers
        summary.failed_subscriptions = self.notify_subscribers();
        Ok(summary)
    }

    fn propagation_order(&self) -> BTreeSet<DirId> {
        let mut seen: BTreeSet<DirId> = BTreeSet::new();
        let mut queue: VecDeque<DirId> = self.state.dirty.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(children) = self.state.dependents.get(&id) {
                queue.extend(children.iter().copied());
            }
        }
        seen
    }

    /// Re-run the arrow of `child` over the parent keys changed since it last ran.
    /// Returns how many parent keys were recomputed.
    fn refresh_derived(&mut self, child: DirId, tick: Tick) -> Result<usize, StoreError> {
        let name = self.dir_name(child)?;
        let Some(mut arrow) = self.state.arrows.remove(&child) else {
            return Ok(0);
        };
        let previous = self.current_arrow.replace(name.clone());

        let result = self.run_arrow(&mut arrow, &name, tick, false);
        self.current_arrow = previous;
        self.state.arrows.insert(child, arrow);
        let keys = result?;
        if keys > 0 {
            debug!(dir = %name, keys, "Refreshed derived directory");
        }
        Ok(keys)
    }

    /// Run every parent slot of `arrow`, over all parent keys when `full`, otherwise over
    /// the keys changed since the slot last ran.
    fn run_arrow(
        &mut self,
        arrow: &mut Arrow,
        child_name: &DirName,
        tick: Tick,
        full: bool,
    ) -> Result<usize, StoreError> {
        let mut total = 0;
        for slot in 0..arrow.parents.len() {
            let parent = self.state.eager(arrow.parents[slot].dir)?;
            let keys: Vec<Key> = if full {
                parent.keys().cloned().collect()
            } else {
                parent
                    .changes_after(arrow.parents[slot].last_seen)
                    .into_iter()
                    .collect()
            };
            total += self.process_slot(arrow, slot, keys, child_name, tick)?;
            arrow.parents[slot].last_seen = tick;
        }
        Ok(total)
    }

    /// Run the map of one parent slot over `keys` and fold the outputs into the child.
    fn process_slot(
        &mut self,
        arrow: &mut Arrow,
        slot: usize,
        keys: Vec<Key>,
        child_name: &DirName,
        tick: Tick,
    ) -> Result<usize, StoreError> {
        let parent = arrow.parents[slot].dir;
        let map = arrow.parents[slot].map.clone();
        let ranges = arrow.parents[slot].ranges.clone();
        let log_keys = self.config.propagation.log_keys;

        let mut count = 0;
        for key in keys {
            if !in_ranges(ranges.as_deref(), &key) {
                continue;
            }
            let values = self.state.eager(parent)?.get_array(&key).to_vec();
            let outputs = if values.is_empty() {
                BTreeMap::new()
            } else {
                let mut writer = Writer::new(child_name.clone());
                map(self, &mut writer, &key, &values)
                    .map_err(|err| StoreError::from_transform(child_name, &key, err))?;
                writer.into_staged()
            };
            if log_keys {
                trace!(dir = %child_name, key = %key, outputs = outputs.len(), "Recomputed key");
            }
            for delta in arrow.contributions.replace_source((slot, key), outputs) {
                self.fold_delta(arrow, child_name, delta, tick)?;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Write the new value of one output key, through the reducer when there is one.
    fn fold_delta(
        &mut self,
        arrow: &Arrow,
        child_name: &DirName,
        delta: OutputDelta,
        tick: Tick,
    ) -> Result<(), StoreError> {
        let key = delta.key;
        let files = match &arrow.reducer {
            None => arrow.contributions.values_for(&key),
            Some(_) if !arrow.contributions.has_output(&key) => Vec::new(),
            Some(reducer) if delta.fresh => {
                let all = arrow.contributions.values_for(&key);
                reducer
                    .init(&all)
                    .map_err(|err| StoreError::from_transform(child_name, &key, err))?
            }
            Some(reducer) => {
                let state = self.state.eager(arrow.child)?.get_array(&key).to_vec();
                let update = reducer
                    .update(&state, &delta.removed, &delta.added)
                    .map_err(|err| StoreError::from_transform(child_name, &key, err))?;
                match update {
                    ReducerUpdate::Incremental(files) => files,
                    ReducerUpdate::NeedsFullRecompute if reducer.can_reset() => {
                        warn!(dir = %child_name, key = %key, "Reducer fell back to full recompute");
                        let all = arrow.contributions.values_for(&key);
                        reducer
                            .init(&all)
                            .map_err(|err| StoreError::from_transform(child_name, &key, err))?
                    }
                    ReducerUpdate::NeedsFullRecompute => {
                        return Err(StoreError::ReducerCannotReset {
                            dir: child_name.clone(),
                            key,
                        })
                    }
                }
            }
        };
        self.commit(arrow.child, key, files, tick)?;
        Ok(())
    }

    /// Move a pre snapshot forward by one batch of its source.
    ///
    /// Keys the source changed in the previous batch catch up with the source's value
    /// from before this batch; keys changed in this batch take their old value.
    fn shift_pre(&mut self, pre: DirId, tick: Tick) -> Result<(), StoreError> {
        let EagerKind::Pre { source, owed } = self.state.eager(pre)?.kind().clone() else {
            return Ok(());
        };
        let captured = self.state.eager_mut(source)?.take_pre_capture();
        if captured.is_empty() {
            return Ok(());
        }

        let catch_up: Vec<(Key, Vec<File>)> = {
            let source_dir = self.state.eager(source)?;
            owed.iter()
                .filter(|key| !captured.contains_key(*key))
                .map(|key| (key.clone(), source_dir.get_array(key).to_vec()))
                .collect()
        };
        for (key, files) in catch_up {
            self.commit(pre, key, files, tick)?;
        }
        let owed: BTreeSet<Key> = captured.keys().cloned().collect();
        for (key, files) in captured {
            self.commit(pre, key, files, tick)?;
        }
        self.state.eager_mut(pre)?.kind = EagerKind::Pre { source, owed };
        Ok(())
    }
}
