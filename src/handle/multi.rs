//! Typed map closures and fan-in sources.

use crate::arrow::MapFn;
use crate::context::{Context, FixedSingle};
use crate::handle::conv::{Codec, DirKey};
use crate::handle::ehandle::EHandle;
use crate::handle::writer::TWriter;
use crate::types::DirId;
use crate::value::{File, Key, KeyRange};
use crate::writer::Writer;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Map closure with the parent's key/value types erased; only the output value type remains.
type ErasedMap<V2> =
    Arc<dyn Fn(&mut Context, &mut Writer, &Codec<V2>, &Key, &[File]) -> anyhow::Result<()> + Send + Sync>;

/// One parent of a typed fan-in (`multi_map`): the parent directory and how its entries
/// map into the shared child.
pub struct MapSource<K2, V2> {
    parent: DirId,
    map: ErasedMap<V2>,
    ranges: Option<Vec<KeyRange>>,
    _key: PhantomData<fn() -> K2>,
}

impl<K2: DirKey, V2: 'static> MapSource<K2, V2> {
    pub fn new<K, V, F>(parent: &EHandle<K, V>, f: F) -> Self
    where
        K: DirKey,
        V: 'static,
        F: Fn(&mut Context, &mut TWriter<'_, K2, V2>, &K, &[V]) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        let input = parent.codec().clone();
        let map: ErasedMap<V2> = Arc::new(
            move |ctx: &mut Context,
                  writer: &mut Writer,
                  output: &Codec<V2>,
                  key: &Key,
                  files: &[File]|
                  -> anyhow::Result<()> {
                let key = K::from_key(key)?;
                let values = input.decode_all(files)?;
                let mut typed = TWriter::new(writer, output);
                f(ctx, &mut typed, &key, &values)
            },
        );
        MapSource {
            parent: parent.id(),
            map,
            ranges: None,
            _key: PhantomData,
        }
    }

    /// Only feed parent keys inside `ranges` to the closure.
    pub fn with_ranges(mut self, ranges: Vec<KeyRange>) -> Self {
        self.ranges = Some(ranges);
        self
    }

    pub fn parent(&self) -> DirId {
        self.parent
    }

    /// Bind the output codec, producing the untyped arrow parent.
    pub(crate) fn into_fixed(self, output: Codec<V2>) -> FixedSingle {
        let erased = self.map;
        let map: MapFn = Arc::new(
            move |ctx: &mut Context, writer: &mut Writer, key: &Key, files: &[File]| -> anyhow::Result<()> {
                erased(ctx, writer, &output, key, files)
            },
        );
        FixedSingle {
            parent: self.parent,
            map,
            ranges: self.ranges,
        }
    }
}

impl<K2, V2> fmt::Debug for MapSource<K2, V2> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapSource")
            .field("parent", &self.parent)
            .field("ranges", &self.ranges)
            .finish()
    }
}
