//! Typed handles over eager directories.

use crate::arrow::MapFn;
use crate::context::Context;
use crate::dir::DirName;
use crate::error::StoreError;
use crate::handle::conv::{Codec, DirKey};
use crate::handle::multi::MapSource;
use crate::handle::writer::TWriter;
use crate::handle::Handle;
use crate::reducer::{Accumulator, AccumulatorReducer, Reducer};
use crate::types::{DirId, Tick};
use crate::value::{File, Key, KeyRange};
use crate::writer::Writer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed view of an eager directory holding `V` values under `K` keys.
///
/// A handle is only a name, an id and a codec; all state lives in the [`Context`].
pub struct EHandle<K, V> {
    name: DirName,
    id: DirId,
    codec: Codec<V>,
    _key: PhantomData<fn() -> K>,
}

impl<K: DirKey, V: 'static> EHandle<K, V> {
    pub(crate) fn bind(name: DirName, id: DirId, codec: Codec<V>) -> Self {
        EHandle {
            name,
            id,
            codec,
            _key: PhantomData,
        }
    }

    /// Create an input directory seeded with `entries`.
    pub fn create_input(
        ctx: &mut Context,
        name: DirName,
        codec: Codec<V>,
        entries: Vec<(K, Vec<V>)>,
    ) -> Result<Self, StoreError> {
        let entries = entries
            .into_iter()
            .map(|(k, vs)| Ok((k.to_key(), codec.encode_all(&vs)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let id = ctx.mkdir(name.clone(), true, entries)?;
        Ok(Self::bind(name, id, codec))
    }

    /// Typed view of an existing eager directory.
    pub fn from_dir(ctx: &Context, id: DirId, codec: Codec<V>) -> Result<Self, StoreError> {
        let name = ctx.eager_dir(id)?.name().clone();
        Ok(Self::bind(name, id, codec))
    }

    pub fn lookup(ctx: &Context, name: &DirName, codec: Codec<V>) -> Result<Self, StoreError> {
        let id = ctx.dir_id(name)?;
        Self::from_dir(ctx, id, codec)
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

    // ---- reads ----

    pub fn items(&self, ctx: &mut Context) -> Result<Vec<(K, Vec<V>)>, StoreError> {
        ctx.items(self.id)?
            .into_iter()
            .map(|(k, files)| Ok((K::from_key(&k)?, self.codec.decode_all(&files)?)))
            .collect()
    }

    pub fn size(&self, ctx: &mut Context) -> Result<usize, StoreError> {
        ctx.size(self.id)
    }

    pub fn is_empty(&self, ctx: &mut Context) -> Result<bool, StoreError> {
        Ok(self.size(ctx)? == 0)
    }

    /// Keys changed strictly after `tick`, in key order.
    pub fn changes_after(&self, ctx: &Context, tick: Tick) -> Result<Vec<K>, StoreError> {
        ctx.changes_after(self.id, tick)?
            .iter()
            .map(K::from_key)
            .collect()
    }

    // ---- writes ----

    pub fn write(&self, ctx: &mut Context, key: &K, value: &V) -> Result<(), StoreError> {
        let file = self.codec.encode(value)?;
        ctx.write_array(self.id, key.to_key(), vec![file])
    }

    pub fn write_array(&self, ctx: &mut Context, key: &K, values: &[V]) -> Result<(), StoreError> {
        let files = self.codec.encode_all(values)?;
        ctx.write_array(self.id, key.to_key(), files)
    }

    pub fn remove(&self, ctx: &mut Context, key: &K) -> Result<(), StoreError> {
        ctx.write_array(self.id, key.to_key(), Vec::new())
    }

    /// Write several keys as one batch.
    pub fn write_array_many(
        &self,
        ctx: &mut Context,
        entries: Vec<(K, Vec<V>)>,
    ) -> Result<(), StoreError> {
        let entries = entries
            .into_iter()
            .map(|(k, vs)| Ok((k.to_key(), self.codec.encode_all(&vs)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        ctx.write_array_many(self.id, entries)
    }

    // ---- derivations ----

    /// Derived directory computed by `f` from every entry of this one.
    pub fn map<K2, V2, F>(
        &self,
        ctx: &mut Context,
        name: DirName,
        codec: Codec<V2>,
        f: F,
    ) -> Result<EHandle<K2, V2>, StoreError>
    where
        K2: DirKey,
        V2: 'static,
        F: Fn(&mut Context, &mut TWriter<'_, K2, V2>, &K, &[V]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        multi_map(ctx, name, codec, vec![MapSource::new(self, f)])
    }

    /// Like [`EHandle::map`], restricted to keys inside `ranges`.
    pub fn map_with_ranges<K2, V2, F>(
        &self,
        ctx: &mut Context,
        name: DirName,
        codec: Codec<V2>,
        ranges: Vec<KeyRange>,
        f: F,
    ) -> Result<EHandle<K2, V2>, StoreError>
    where
        K2: DirKey,
        V2: 'static,
        F: Fn(&mut Context, &mut TWriter<'_, K2, V2>, &K, &[V]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        let source = MapSource::new(self, f).with_ranges(ranges);
        multi_map(ctx, name, codec, vec![source])
    }

    /// Map then fold each output key's values with `acc`. Values and accumulator states
    /// are stored as JSON.
    pub fn map_reduce<K2, V2, A, F>(
        &self,
        ctx: &mut Context,
        name: DirName,
        acc: A,
        f: F,
    ) -> Result<EHandle<K2, A::Acc>, StoreError>
    where
        K2: DirKey,
        V2: Serialize + DeserializeOwned + 'static,
        A: Accumulator<V2>,
        A::Acc: Serialize + DeserializeOwned,
        F: Fn(&mut Context, &mut TWriter<'_, K2, V2>, &K, &[V]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        multi_map_reduce(ctx, name, acc, vec![MapSource::new(self, f)])
    }

    /// Map then fold with an untyped `reducer`, whose states `output` decodes.
    pub fn map_reduce_with<K2, V2, R, F>(
        &self,
        ctx: &mut Context,
        name: DirName,
        values: Codec<V2>,
        reducer: Arc<dyn Reducer>,
        output: Codec<R>,
        f: F,
    ) -> Result<EHandle<K2, R>, StoreError>
    where
        K2: DirKey,
        V2: 'static,
        R: 'static,
        F: Fn(&mut Context, &mut TWriter<'_, K2, V2>, &K, &[V]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        let parent = MapSource::new(self, f).into_fixed(values);
        let id = ctx.apply_many(vec![parent], name.clone(), Some(reducer))?;
        Ok(EHandle::bind(name, id, output))
    }

    /// Derived directory keeping, per key, the values matching `pred`. Keys left without
    /// values are absent from the child.
    pub fn filter<P>(&self, ctx: &mut Context, name: DirName, pred: P) -> Result<Self, StoreError>
    where
        P: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        let codec = self.codec.clone();
        let map: MapFn = Arc::new(
            move |_ctx: &mut Context, writer: &mut Writer, key: &Key, files: &[File]| -> anyhow::Result<()> {
                let typed = K::from_key(key)?;
                let mut kept = Vec::new();
                for file in files {
                    if pred(&typed, &codec.decode(file)?) {
                        kept.push(file.clone());
                    }
                }
                if !kept.is_empty() {
                    writer.set_array(key.clone(), kept)?;
                }
                Ok(())
            },
        );
        let id = ctx.apply(self.id, name.clone(), map, None, None)?;
        Ok(Self::bind(name, id, self.codec.clone()))
    }

    /// Previous-tick view of this directory. `None` on the first call, which only starts
    /// capturing.
    pub fn pre(&self, ctx: &mut Context) -> Result<Option<Self>, StoreError> {
        match ctx.pre(self.id)? {
            Some(pre) => Ok(Some(Self::bind(ctx.dir_name(pre)?, pre, self.codec.clone()))),
            None => Ok(None),
        }
    }

    /// Run `f` whenever a key disappears, with the values it last held. Values that no
    /// longer decode are skipped.
    pub fn on_delete<F>(&self, ctx: &mut Context, f: F) -> Result<(), StoreError>
    where
        F: Fn(&K, &[V]) + Send + Sync + 'static,
    {
        let codec = self.codec.clone();
        ctx.on_delete(
            self.id,
            Arc::new(move |key: &Key, files: &[File]| {
                let Ok(key) = K::from_key(key) else {
                    return;
                };
                let values: Vec<V> = files.iter().filter_map(|f| codec.decode(f).ok()).collect();
                f(&key, &values);
            }),
        )
    }
}

impl<K: DirKey, V: 'static> Handle<K, V> for EHandle<K, V> {
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

impl<K, V> Clone for EHandle<K, V> {
    fn clone(&self) -> Self {
        EHandle {
            name: self.name.clone(),
            id: self.id,
            codec: self.codec.clone(),
            _key: PhantomData,
        }
    }
}

impl<K, V> fmt::Debug for EHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EHandle")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}

/// Derived directory fed by several typed parents, each with its own map.
pub fn multi_map<K2, V2>(
    ctx: &mut Context,
    name: DirName,
    codec: Codec<V2>,
    sources: Vec<MapSource<K2, V2>>,
) -> Result<EHandle<K2, V2>, StoreError>
where
    K2: DirKey,
    V2: 'static,
{
    let parents = sources
        .into_iter()
        .map(|s| s.into_fixed(codec.clone()))
        .collect();
    let id = ctx.apply_many(parents, name.clone(), None)?;
    Ok(EHandle::bind(name, id, codec))
}

/// [`multi_map`] followed by folding each output key with `acc`.
pub fn multi_map_reduce<K2, V2, A>(
    ctx: &mut Context,
    name: DirName,
    acc: A,
    sources: Vec<MapSource<K2, V2>>,
) -> Result<EHandle<K2, A::Acc>, StoreError>
where
    K2: DirKey,
    V2: Serialize + DeserializeOwned + 'static,
    A: Accumulator<V2>,
    A::Acc: Serialize + DeserializeOwned,
{
    let values = Codec::<V2>::json();
    let parents = sources
        .into_iter()
        .map(|s| s.into_fixed(values.clone()))
        .collect();
    let reducer = AccumulatorReducer::shared(acc, values, Codec::<A::Acc>::json());
    let id = ctx.apply_many(parents, name.clone(), Some(reducer))?;
    Ok(EHandle::bind(name, id, Codec::json()))
}
