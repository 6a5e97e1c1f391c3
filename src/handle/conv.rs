//! Conversions between typed keys/values and the untyped core.

use crate::error::StoreError;
use crate::value::{File, Key};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Typed key convertible to and from a [`Key`].
///
/// `to_key` must preserve ordering: `a < b` implies `a.to_key() < b.to_key()`, so typed
/// iteration order matches the directory's key order.
pub trait DirKey: Clone + Send + Sync + 'static {
    fn to_key(&self) -> Key;
    fn from_key(key: &Key) -> Result<Self, StoreError>;
}

fn mismatch(expected: &str, key: &Key) -> StoreError {
    StoreError::Codec(format!("expected {} key, found {}", expected, key))
}

impl DirKey for Key {
    fn to_key(&self) -> Key {
        self.clone()
    }

    fn from_key(key: &Key) -> Result<Self, StoreError> {
        Ok(key.clone())
    }
}

impl DirKey for i64 {
    fn to_key(&self) -> Key {
        Key::Iid(*self)
    }

    fn from_key(key: &Key) -> Result<Self, StoreError> {
        key.as_iid().ok_or_else(|| mismatch("integer", key))
    }
}

impl DirKey for i32 {
    fn to_key(&self) -> Key {
        Key::Iid(i64::from(*self))
    }

    fn from_key(key: &Key) -> Result<Self, StoreError> {
        let i = key.as_iid().ok_or_else(|| mismatch("integer", key))?;
        i32::try_from(i).map_err(|_| mismatch("i32", key))
    }
}

impl DirKey for u32 {
    fn to_key(&self) -> Key {
        Key::Iid(i64::from(*self))
    }

    fn from_key(key: &Key) -> Result<Self, StoreError> {
        let i = key.as_iid().ok_or_else(|| mismatch("integer", key))?;
        u32::try_from(i).map_err(|_| mismatch("u32", key))
    }
}

impl DirKey for String {
    fn to_key(&self) -> Key {
        Key::Sid(self.clone())
    }

    fn from_key(key: &Key) -> Result<Self, StoreError> {
        key.as_sid()
            .map(str::to_string)
            .ok_or_else(|| mismatch("string", key))
    }
}

impl<A: DirKey, B: DirKey> DirKey for (A, B) {
    fn to_key(&self) -> Key {
        Key::Tuple(vec![self.0.to_key(), self.1.to_key()])
    }

    fn from_key(key: &Key) -> Result<Self, StoreError> {
        match key {
            Key::Tuple(parts) if parts.len() == 2 => {
                Ok((A::from_key(&parts[0])?, B::from_key(&parts[1])?))
            }
            _ => Err(mismatch("pair", key)),
        }
    }
}

type EncodeFn<V> = Arc<dyn Fn(&V) -> Result<File, StoreError> + Send + Sync>;
type DecodeFn<V> = Arc<dyn Fn(&File) -> Result<V, StoreError> + Send + Sync>;

/// Bidirectional conversion between `V` and [`File`].
pub struct Codec<V> {
    encode: EncodeFn<V>,
    decode: DecodeFn<V>,
}

impl<V> Codec<V> {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&V) -> Result<File, StoreError> + Send + Sync + 'static,
        D: Fn(&File) -> Result<V, StoreError> + Send + Sync + 'static,
    {
        Codec {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn encode(&self, value: &V) -> Result<File, StoreError> {
        (self.encode)(value)
    }

    pub fn decode(&self, file: &File) -> Result<V, StoreError> {
        (self.decode)(file)
    }

    pub fn encode_all(&self, values: &[V]) -> Result<Vec<File>, StoreError> {
        values.iter().map(|v| self.encode(v)).collect()
    }

    pub fn decode_all(&self, files: &[File]) -> Result<Vec<V>, StoreError> {
        files.iter().map(|f| self.decode(f)).collect()
    }
}

impl<V: Serialize + DeserializeOwned + 'static> Codec<V> {
    /// Codec storing `V` as its serde JSON representation.
    pub fn json() -> Self {
        Codec::new(|v: &V| File::encode(v), |f: &File| f.decode())
    }
}

impl<V> Clone for Codec<V> {
    fn clone(&self) -> Self {
        Codec {
            encode: self.encode.clone(),
            decode: self.decode.clone(),
        }
    }
}

impl<V> fmt::Debug for Codec<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Codec<{}>", std::any::type_name::<V>())
    }
}
