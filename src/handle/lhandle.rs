//! Typed handles over lazy directories.

use crate::context::Context;
use crate::dir::{DirName, LazyFn};
use crate::error::StoreError;
use crate::handle::conv::{Codec, DirKey};
use crate::handle::Handle;
use crate::types::DirId;
use crate::value::{File, Key};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed view of a lazy directory.
///
/// The compute closure receives the handle itself, so a definition can read other keys of
/// the same directory (recursive definitions, cycles detected at read time).
pub struct LHandle<K, V> {
    name: DirName,
    id: DirId,
    codec: Codec<V>,
    _key: PhantomData<fn() -> K>,
}

impl<K: DirKey, V: 'static> LHandle<K, V> {
    /// Lazy directory producing exactly one value per key. Accumulation across
    /// recomputations follows the configured `lazy.collect` default.
    pub fn create<F>(ctx: &mut Context, name: DirName, codec: Codec<V>, f: F) -> Result<Self, StoreError>
    where
        F: Fn(&mut Context, &LHandle<K, V>, &K) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        let collect = ctx.config().lazy.collect;
        Self::create_multi(ctx, name, codec, collect, move |ctx, this, key| {
            Ok(Some(vec![f(ctx, this, key)?]))
        })
    }

    /// Lazy directory whose closure yields any number of values, or `None` for "no value".
    pub fn create_multi<F>(
        ctx: &mut Context,
        name: DirName,
        codec: Codec<V>,
        collect: bool,
        f: F,
    ) -> Result<Self, StoreError>
    where
        F: Fn(&mut Context, &LHandle<K, V>, &K) -> anyhow::Result<Option<Vec<V>>>
            + Send
            + Sync
            + 'static,
    {
        let this = LHandle {
            name: name.clone(),
            id: ctx.state.next_id(),
            codec,
            _key: PhantomData,
        };
        let inner = this.clone();
        let compute: LazyFn = Arc::new(
            move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
                let typed = K::from_key(key)?;
                match f(ctx, &inner, &typed)? {
                    Some(values) => Ok(Some(inner.codec.encode_all(&values)?)),
                    None => Ok(None),
                }
            },
        );
        let id = ctx.mk_lazy(name, compute, collect)?;
        debug_assert_eq!(id, this.id);
        Ok(this)
    }

    pub fn id(&self) -> DirId {
        self.id
    }

    pub fn name(&self) -> &DirName {
        &self.name
    }

    pub fn codec(&self) -> &Codec<V> {
        &self.codec
    }

    /// Read `key` with an explicit cycle policy.
    pub fn get_array_with_options(
        &self,
        ctx: &mut Context,
        key: &K,
        throw_on_cycle: bool,
    ) -> Result<Vec<V>, StoreError> {
        let files = ctx.get_array_with_options(self.id, &key.to_key(), throw_on_cycle)?;
        self.codec.decode_all(&files)
    }

    /// Number of entries computed so far.
    pub fn compute_count(&self, ctx: &Context) -> Result<u64, StoreError> {
        Ok(ctx.lazy_dir(self.id)?.compute_count())
    }
}

impl<K: DirKey, V: 'static> Handle<K, V> for LHandle<K, V> {
    fn dir_id(&self) -> DirId {
        self.id
    }

    fn name(&self) -> &DirName {
        &self.name
    }

    fn codec(&self) -> &Codec<V> {
        &self.codec
    }
}

impl<K, V> Clone for LHandle<K, V> {
    fn clone(&self) -> Self {
        LHandle {
            name: self.name.clone(),
            id: self.id,
            codec: self.codec.clone(),
            _key: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for LHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}
