//! Saved contexts
//!
//! A [`SavedContext`] is a deep copy of a context's registry: directories, arrows, clock,
//! globals and outstanding async calls. Restoring it yields an independent context, so an
//! export or dump can walk a frozen view while the live graph keeps moving. Subscriptions
//! and in-flight lazy computations belong to the live context and are not carried.

use super::{Context, Registry};
use crate::config::StoreConfig;
use crate::types::Tick;
use std::fmt;

#[derive(Clone)]
pub struct SavedContext {
    state: Registry,
    config: StoreConfig,
}

impl SavedContext {
    pub fn tick(&self) -> Tick {
        self.state.tick
    }

    pub fn dir_count(&self) -> usize {
        self.state.names.len()
    }
}

impl fmt::Debug for SavedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SavedContext")
            .field("tick", &self.state.tick)
            .field("dirs", &self.state.names.len())
            .finish()
    }
}

impl Context {
    pub fn save(&self) -> SavedContext {
        SavedContext {
            state: self.state.clone(),
            config: self.config.clone(),
        }
    }

    pub fn from_saved(saved: SavedContext) -> Context {
        let mut ctx = Context::with_config(saved.config);
        ctx.state = saved.state;
        ctx
    }
}
