//! Typed writer handed to typed map closures.

use crate::error::StoreError;
use crate::handle::conv::{Codec, DirKey};
use crate::writer::Writer;
use std::marker::PhantomData;

/// Typed view over a [`Writer`]: keys and values are converted on the way in.
pub struct TWriter<'a, K, V> {
    inner: &'a mut Writer,
    codec: &'a Codec<V>,
    _key: PhantomData<fn() -> K>,
}

impl<'a, K: DirKey, V> TWriter<'a, K, V> {
    pub fn new(inner: &'a mut Writer, codec: &'a Codec<V>) -> Self {
        TWriter {
            inner,
            codec,
            _key: PhantomData,
        }
    }

    pub fn set(&mut self, key: &K, value: &V) -> Result<(), StoreError> {
        let file = self.codec.encode(value)?;
        self.inner.set(key.to_key(), file)
    }

    pub fn set_array(&mut self, key: &K, values: &[V]) -> Result<(), StoreError> {
        let files = self.codec.encode_all(values)?;
        self.inner.set_array(key.to_key(), files)
    }

    /// Add `value` after whatever is already staged for `key`.
    pub fn append(&mut self, key: &K, value: &V) -> Result<(), StoreError> {
        let file = self.codec.encode(value)?;
        self.inner.append(key.to_key(), file);
        Ok(())
    }

    pub fn remove(&mut self, key: &K) -> Result<(), StoreError> {
        self.inner.remove(key.to_key())
    }

    pub fn untyped(&mut self) -> &mut Writer {
        &mut *self.inner
    }
}
