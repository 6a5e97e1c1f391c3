//! Typed handles
//!
//! The core stores untyped [`Key`](crate::value::Key)s and [`File`](crate::value::File)s.
//! Handles pair a directory id with a key type and a value [`Codec`], so host programs
//! read, write and derive directories in their own types. Conversions happen at the
//! handle boundary; the engine itself never sees `K` or `V`.

pub mod conv;
pub mod ehandle;
pub mod lhandle;
pub mod multi;
pub mod writer;

pub use conv::{Codec, DirKey};
pub use ehandle::{multi_map, multi_map_reduce, EHandle};
pub use lhandle::LHandle;
pub use multi::MapSource;
pub use writer::TWriter;

use crate::context::Context;
use crate::dir::DirName;
use crate::error::StoreError;
use crate::types::DirId;

/// Typed read access shared by eager and lazy handles.
pub trait Handle<K: DirKey, V: 'static> {
    fn dir_id(&self) -> DirId;

    fn name(&self) -> &DirName;

    fn codec(&self) -> &Codec<V>;

    /// All values under `key`, computing them first for lazy directories.
    fn get_array(&self, ctx: &mut Context, key: &K) -> Result<Vec<V>, StoreError> {
        let files = ctx.get_array(self.dir_id(), &key.to_key())?;
        self.codec().decode_all(&files)
    }

    /// The single value under `key`, if any. More than one value is a `UniquenessViolation`.
    fn maybe_get(&self, ctx: &mut Context, key: &K) -> Result<Option<V>, StoreError> {
        let mut values = self.get_array(ctx, key)?;
        match values.len() {
            0 => Ok(None),
            1 => Ok(values.pop()),
            count => Err(StoreError::UniquenessViolation {
                dir: self.name().clone(),
                key: key.to_key(),
                count,
            }),
        }
    }

    /// The value under `key`, which must hold exactly one.
    fn get(&self, ctx: &mut Context, key: &K) -> Result<V, StoreError> {
        let values = self.get_array(ctx, key)?;
        let count = values.len();
        match (count, values.into_iter().next()) {
            (1, Some(value)) => Ok(value),
            _ => Err(StoreError::UniquenessViolation {
                dir: self.name().clone(),
                key: key.to_key(),
                count,
            }),
        }
    }
}
