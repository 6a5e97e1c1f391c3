//! Immutable file payloads

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Immutable payload stored under a key.
///
/// The payload is an opaque JSON value behind an `Arc`, so cloning a file (and
/// therefore copying arrays between directories) never copies the value itself.
#[derive(Clone, PartialEq)]
pub struct File(Arc<Value>);

impl File {
    pub fn new(value: Value) -> Self {
        File(Arc::new(value))
    }

    /// Encode any serializable value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, StoreError> {
        Ok(File::new(serde_json::to_value(value)?))
    }

    /// Decode the payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        T::deserialize(self.0.as_ref()).map_err(|e| StoreError::Codec(e.to_string()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.0)
    }
}

impl Serialize for File {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for File {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(File::new)
    }
}

impl From<Value> for File {
    fn from(value: Value) -> Self {
        File::new(value)
    }
}

impl From<i64> for File {
    fn from(i: i64) -> Self {
        File::new(Value::from(i))
    }
}

impl From<&str> for File {
    fn from(s: &str) -> Self {
        File::new(Value::from(s))
    }
}
