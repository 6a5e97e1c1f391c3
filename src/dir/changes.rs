//! Change index: which keys changed at which tick.
//!
//! Keeps the last change tick per key plus a reverse index tick -> keys, so both
//! "when did this key last change?" and "what changed after tick T?" are cheap.

use crate::types::Tick;
use crate::value::Key;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct ChangeIndex {
    /// Key -> tick of its latest change
    last_changed: HashMap<Key, Tick>,
    /// Reverse index: tick -> keys whose latest change happened at that tick
    by_tick: BTreeMap<Tick, BTreeSet<Key>>,
}

impl ChangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` changed at `tick`.
    ///
    /// Only the latest change per key is kept.
    pub fn record(&mut self, key: &Key, tick: Tick) {
        if let Some(previous) = self.last_changed.insert(key.clone(), tick) {
            if previous == tick {
                return;
            }
            if let Some(keys) = self.by_tick.get_mut(&previous) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tick.remove(&previous);
                }
            }
        }
        self.by_tick.entry(tick).or_default().insert(key.clone());
    }

    pub fn changed_at(&self, key: &Key) -> Option<Tick> {
        self.last_changed.get(key).copied()
    }

    /// Keys whose latest change happened strictly after `tick`, in key order.
    pub fn changes_after(&self, tick: Tick) -> BTreeSet<Key> {
        let mut keys = BTreeSet::new();
        for (_, changed) in self.by_tick.range(tick.next()..) {
            keys.extend(changed.iter().cloned());
        }
        keys
    }

    /// Tick of the most recent change to any key.
    pub fn latest(&self) -> Option<Tick> {
        self.by_tick.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.last_changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_changed.is_empty()
    }
}
