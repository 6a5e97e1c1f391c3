//! Reducer state maintained incrementally equals a full recomputation

use proptest::prelude::*;
use skstore::arrow::MapFn;
use skstore::{
    AccumulatorReducer, Codec, Context, DirId, DirName, File, Key, Max, Reducer, Sum, Writer,
};
use std::sync::Arc;

/// Groups values by parity of the parent key.
fn by_parity() -> MapFn {
    Arc::new(
        |_ctx: &mut Context, w: &mut Writer, key: &Key, values: &[File]| -> anyhow::Result<()> {
            let group = key.as_iid().unwrap_or(0).rem_euclid(2);
            for value in values {
                w.append(Key::Iid(group), value.clone());
            }
            Ok(())
        },
    )
}

fn sum() -> Arc<dyn Reducer> {
    AccumulatorReducer::shared(Sum::<i64>::new(), Codec::json(), Codec::json())
}

fn max() -> Arc<dyn Reducer> {
    AccumulatorReducer::shared(Max::<i64>::new(), Codec::json(), Codec::json())
}

fn build(
    rows: &[(i64, i64)],
    reducer: fn() -> Arc<dyn Reducer>,
) -> (Context, DirId, DirId) {
    let mut ctx = Context::create();
    let entries = rows
        .iter()
        .map(|(k, v)| (Key::Iid(*k), vec![File::from(*v)]))
        .collect();
    let input = ctx
        .mkdir(DirName::new("/in/").unwrap(), true, entries)
        .unwrap();
    let out = ctx
        .apply(
            input,
            DirName::new("/reduced/").unwrap(),
            by_parity(),
            Some(reducer()),
            None,
        )
        .unwrap();
    (ctx, input, out)
}

fn check(
    reducer: fn() -> Arc<dyn Reducer>,
    initial: Vec<(i64, i64)>,
    writes: Vec<(i64, Option<i64>)>,
) -> Result<(), TestCaseError> {
    let (mut live, input, out) = build(&initial, reducer);
    let mut expected: std::collections::BTreeMap<i64, i64> = initial.into_iter().collect();
    for (key, value) in writes {
        let files = value.map(File::from).into_iter().collect();
        live.write_array(input, Key::Iid(key), files).unwrap();
        match value {
            Some(v) => expected.insert(key, v),
            None => expected.remove(&key),
        };
        live.update().unwrap();
    }
    let rows: Vec<(i64, i64)> = expected.into_iter().collect();
    let (mut fresh, _, fresh_out) = build(&rows, reducer);
    prop_assert_eq!(live.items(out).unwrap(), fresh.items(fresh_out).unwrap());
    Ok(())
}

fn rows() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::btree_map(0i64..10, -50i64..50, 0..10).prop_map(|m| m.into_iter().collect())
}

fn writes() -> impl Strategy<Value = Vec<(i64, Option<i64>)>> {
    prop::collection::vec((0i64..10, prop::option::of(-50i64..50)), 1..12)
}

/// Invertible reducers fold deltas into the same state a fresh init produces
#[test]
fn test_sum_incremental_equals_fresh() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(rows(), writes()), |(initial, writes)| {
            check(sum, initial, writes)
        })
        .unwrap();
}

/// Removing the current maximum falls back to init and still agrees with a fresh graph
#[test]
fn test_max_incremental_equals_fresh() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(rows(), writes()), |(initial, writes)| {
            check(max, initial, writes)
        })
        .unwrap();
}
