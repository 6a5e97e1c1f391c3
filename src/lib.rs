//! SKStore: Incremental Computation Store
//!
//! Named directories of keyed values connected by user-supplied map (and reduce)
//! functions. Input directories are written by the host program; derived directories are
//! recomputed incrementally by [`Context::update`], touching only the keys whose inputs
//! changed. Lazy directories compute entries on first read and revalidate them against the
//! dependencies recorded while computing.

pub mod arrow;
pub mod config;
pub mod context;
pub mod dir;
pub mod error;
pub mod handle;
pub mod logging;
pub mod reducer;
pub mod types;
pub mod value;
pub mod writer;

pub use config::{ConfigLoader, StoreConfig};
pub use context::{
    AsyncStart, AsyncValue, Context, FixedSingle, SavedContext, SubscriptionBatch,
    SubscriptionBuffer, SubscriptionOptions, UpdateSummary,
};
pub use dir::{DirKind, DirName};
pub use error::{ErrorKind, StoreError};
pub use handle::{Codec, DirKey, EHandle, Handle, LHandle, MapSource, TWriter};
pub use reducer::{
    Accumulator, AccumulatorReducer, Count, Max, Min, Reducer, ReducerUpdate, Sum, Summable,
};
pub use types::{CallId, DirId, SessionId, Tick};
pub use value::{File, Key, KeyRange};
pub use writer::Writer;
