//! Reducers and accumulators
//!
//! A reducer folds the multiset of files contributed to one output key into a summarized
//! state, and adjusts that state when contributions are removed or added instead of
//! rescanning every input. When an adjustment is not derivable the reducer says so
//! explicitly and the engine falls back to a full `init`, provided the reducer `can_reset`.

use crate::error::StoreError;
use crate::handle::Codec;
use crate::value::File;
use std::marker::PhantomData;
use std::sync::Arc;

/// Outcome of an incremental reducer update.
#[derive(Debug, Clone, PartialEq)]
pub enum ReducerUpdate {
    /// The new state, derived from the old state and the delta.
    Incremental(Vec<File>),
    /// The delta cannot be applied; recompute from all contributions with `init`.
    NeedsFullRecompute,
}

/// Untyped reducer over files.
pub trait Reducer: Send + Sync {
    /// State of an output key computed from scratch.
    fn init(&self, values: &[File]) -> anyhow::Result<Vec<File>>;

    /// Adjust `state` for contributions that went away (`removed`) and arrived (`added`).
    fn update(&self, state: &[File], removed: &[File], added: &[File]) -> anyhow::Result<ReducerUpdate>;

    /// Whether `init` may be used as a fallback when `update` cannot proceed.
    fn can_reset(&self) -> bool {
        true
    }
}

/// Typed incremental aggregation: `accumulate` adds a value, `dismiss` takes one back.
pub trait Accumulator<V>: Send + Sync + 'static {
    type Acc: Clone + Send + Sync + 'static;

    fn empty(&self) -> Self::Acc;

    fn accumulate(&self, acc: &Self::Acc, value: &V) -> Self::Acc;

    /// Undo `accumulate` for `value`, or `None` when that is not possible from `acc` alone.
    fn dismiss(&self, acc: &Self::Acc, value: &V) -> Option<Self::Acc>;
}

/// Adapts a typed [`Accumulator`] into an untyped [`Reducer`].
///
/// The state of an output key is a single file holding the encoded accumulator.
pub struct AccumulatorReducer<V, A: Accumulator<V>> {
    acc: A,
    values: Codec<V>,
    state: Codec<A::Acc>,
}

impl<V, A: Accumulator<V>> AccumulatorReducer<V, A> {
    pub fn new(acc: A, values: Codec<V>, state: Codec<A::Acc>) -> Self {
        AccumulatorReducer { acc, values, state }
    }

    pub fn shared(acc: A, values: Codec<V>, state: Codec<A::Acc>) -> Arc<dyn Reducer>
    where
        V: 'static,
    {
        Arc::new(Self::new(acc, values, state))
    }

    fn decode_all(&self, files: &[File]) -> Result<Vec<V>, StoreError> {
        files.iter().map(|f| self.values.decode(f)).collect()
    }
}

impl<V, A> Reducer for AccumulatorReducer<V, A>
where
    V: 'static,
    A: Accumulator<V>,
{
    fn init(&self, values: &[File]) -> anyhow::Result<Vec<File>> {
        let mut acc = self.acc.empty();
        for value in self.decode_all(values)? {
            acc = self.acc.accumulate(&acc, &value);
        }
        Ok(vec![self.state.encode(&acc)?])
    }

    fn update(&self, state: &[File], removed: &[File], added: &[File]) -> anyhow::Result<ReducerUpdate> {
        let [current] = state else {
            return Ok(ReducerUpdate::NeedsFullRecompute);
        };
        let mut acc = self.state.decode(current)?;
        for value in self.decode_all(removed)? {
            match self.acc.dismiss(&acc, &value) {
                Some(next) => acc = next,
                None => return Ok(ReducerUpdate::NeedsFullRecompute),
            }
        }
        for value in self.decode_all(added)? {
            acc = self.acc.accumulate(&acc, &value);
        }
        Ok(ReducerUpdate::Incremental(vec![self.state.encode(&acc)?]))
    }
}

/// Number of contributed values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl<V: 'static> Accumulator<V> for Count {
    type Acc = i64;

    fn empty(&self) -> i64 {
        0
    }

    fn accumulate(&self, acc: &i64, _value: &V) -> i64 {
        acc + 1
    }

    fn dismiss(&self, acc: &i64, _value: &V) -> Option<i64> {
        Some(acc - 1)
    }
}

/// Numbers [`Sum`] can add up without wrapping.
pub trait Summable: Copy + Default + PartialEq + Send + Sync + 'static {
    /// `self + other`, clamped to the representable range.
    fn saturating_sum(self, other: Self) -> Self;

    /// `self - other`, or `None` if the result is out of range.
    fn checked_difference(self, other: Self) -> Option<Self>;

    /// Whether `self` may be a clamped sum rather than an exact one.
    fn at_bound(self) -> bool;
}

macro_rules! summable_int {
    ($($t:ty),*) => {$(
        impl Summable for $t {
            fn saturating_sum(self, other: Self) -> Self {
                self.saturating_add(other)
            }

            fn checked_difference(self, other: Self) -> Option<Self> {
                self.checked_sub(other)
            }

            fn at_bound(self) -> bool {
                self == <$t>::MAX || self == <$t>::MIN
            }
        }
    )*};
}

summable_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! summable_float {
    ($($t:ty),*) => {$(
        impl Summable for $t {
            fn saturating_sum(self, other: Self) -> Self {
                self + other
            }

            fn checked_difference(self, other: Self) -> Option<Self> {
                let diff = self - other;
                diff.is_finite().then_some(diff)
            }

            fn at_bound(self) -> bool {
                self.is_infinite()
            }
        }
    )*};
}

summable_float!(f32, f64);

/// Sum of contributed values.
///
/// Integer sums saturate. A saturated total cannot be taken apart again, so removing a
/// contribution from it forces a full recompute.
#[derive(Debug, Clone, Copy)]
pub struct Sum<T>(PhantomData<fn() -> T>);

impl<T> Sum<T> {
    pub fn new() -> Self {
        Sum(PhantomData)
    }
}

impl<T> Default for Sum<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Summable> Accumulator<T> for Sum<T> {
    type Acc = T;

    fn empty(&self) -> T {
        T::default()
    }

    fn accumulate(&self, acc: &T, value: &T) -> T {
        acc.saturating_sum(*value)
    }

    fn dismiss(&self, acc: &T, value: &T) -> Option<T> {
        if acc.at_bound() {
            return None;
        }
        acc.checked_difference(*value)
    }
}

/// Smallest contributed value. Removing the current minimum forces a full recompute.
#[derive(Debug, Clone, Copy)]
pub struct Min<T>(PhantomData<fn() -> T>);

impl<T> Min<T> {
    pub fn new() -> Self {
        Min(PhantomData)
    }
}

impl<T> Default for Min<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Accumulator<T> for Min<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    type Acc = Option<T>;

    fn empty(&self) -> Option<T> {
        None
    }

    fn accumulate(&self, acc: &Option<T>, value: &T) -> Option<T> {
        match acc {
            Some(current) if current <= value => Some(current.clone()),
            _ => Some(value.clone()),
        }
    }

    fn dismiss(&self, acc: &Option<T>, value: &T) -> Option<Option<T>> {
        match acc {
            Some(current) if current == value => None,
            _ => Some(acc.clone()),
        }
    }
}

/// Largest contributed value. Removing the current maximum forces a full recompute.
#[derive(Debug, Clone, Copy)]
pub struct Max<T>(PhantomData<fn() -> T>);

impl<T> Max<T> {
    pub fn new() -> Self {
        Max(PhantomData)
    }
}

impl<T> Default for Max<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Accumulator<T> for Max<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    type Acc = Option<T>;

    fn empty(&self) -> Option<T> {
        None
    }

    fn accumulate(&self, acc: &Option<T>, value: &T) -> Option<T> {
        match acc {
            Some(current) if current >= value => Some(current.clone()),
            _ => Some(value.clone()),
        }
    }

    fn dismiss(&self, acc: &Option<T>, value: &T) -> Option<Option<T>> {
        match acc {
            Some(current) if current == value => None,
            _ => Some(acc.clone()),
        }
    }
}
