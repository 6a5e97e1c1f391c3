//! Integration tests for reducers

use super::test_utils::{ints, name, read_ints};
use skstore::arrow::MapFn;
use skstore::{
    AccumulatorReducer, Codec, Context, File, Key, Min, Reducer, ReducerUpdate, StoreError, Sum,
    Writer,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Sum over integers that records how it was driven.
#[derive(Clone, Default)]
struct RecordingSum {
    inits: Arc<AtomicUsize>,
    updates: Arc<Mutex<Vec<(Vec<i64>, Vec<i64>)>>>,
}

fn as_ints(files: &[File]) -> Vec<i64> {
    files.iter().filter_map(File::as_i64).collect()
}

impl Reducer for RecordingSum {
    fn init(&self, values: &[File]) -> anyhow::Result<Vec<File>> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(vec![File::from(as_ints(values).iter().sum::<i64>())])
    }

    fn update(&self, state: &[File], removed: &[File], added: &[File]) -> anyhow::Result<ReducerUpdate> {
        self.updates.lock().push((as_ints(removed), as_ints(added)));
        let current = as_ints(state).first().copied().unwrap_or(0);
        let next = current - as_ints(removed).iter().sum::<i64>() + as_ints(added).iter().sum::<i64>();
        Ok(ReducerUpdate::Incremental(vec![File::from(next)]))
    }
}

/// Every value of every key goes to the single output key `total`.
fn to_total() -> MapFn {
    Arc::new(
        |_ctx: &mut Context, w: &mut Writer, _key: &Key, values: &[File]| -> anyhow::Result<()> {
            w.set_array(Key::sid("total"), values.to_vec())?;
            Ok(())
        },
    )
}

#[test]
fn test_sum_scenario_updates_without_init() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(
            name("/I/"),
            true,
            vec![
                (Key::sid("a"), ints(&[1])),
                (Key::sid("b"), ints(&[2])),
                (Key::sid("c"), ints(&[3])),
            ],
        )
        .unwrap();
    let reducer = RecordingSum::default();
    let sum = ctx
        .apply(input, name("/Sum/"), to_total(), Some(Arc::new(reducer.clone())), None)
        .unwrap();
    assert_eq!(read_ints(&mut ctx, sum, &Key::sid("total")), vec![6]);
    let inits = reducer.inits.load(Ordering::SeqCst);
    reducer.updates.lock().clear();

    ctx.write_array(input, Key::sid("b"), ints(&[5])).unwrap();
    ctx.update().unwrap();
    assert_eq!(read_ints(&mut ctx, sum, &Key::sid("total")), vec![9]);
    assert_eq!(reducer.inits.load(Ordering::SeqCst), inits, "init must not run again");
    assert_eq!(reducer.updates.lock().as_slice(), &[(vec![2], vec![5])]);
}

#[test]
fn test_last_contribution_removed_drops_key() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(name("/in/"), true, vec![(Key::sid("a"), ints(&[4]))])
        .unwrap();
    let reducer = AccumulatorReducer::shared(Sum::<i64>::new(), Codec::json(), Codec::json());
    let sum = ctx
        .apply(input, name("/sum/"), to_total(), Some(reducer), None)
        .unwrap();
    assert_eq!(read_ints(&mut ctx, sum, &Key::sid("total")), vec![4]);

    ctx.write_array(input, Key::sid("a"), vec![]).unwrap();
    ctx.update().unwrap();
    assert!(ctx.get_array(sum, &Key::sid("total")).unwrap().is_empty());
    assert_eq!(ctx.size(sum).unwrap(), 0);
}

#[test]
fn test_min_falls_back_to_full_recompute() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(
            name("/in/"),
            true,
            vec![(Key::sid("a"), ints(&[2])), (Key::sid("b"), ints(&[7]))],
        )
        .unwrap();
    let reducer = AccumulatorReducer::shared(Min::<i64>::new(), Codec::json(), Codec::json());
    let min = ctx
        .apply(input, name("/min/"), to_total(), Some(reducer), None)
        .unwrap();
    let read = |ctx: &mut Context| -> Option<i64> {
        ctx.get_array(min, &Key::sid("total")).unwrap()[0].decode().unwrap()
    };
    assert_eq!(read(&mut ctx), Some(2));

    ctx.write_array(input, Key::sid("a"), ints(&[9])).unwrap();
    ctx.update().unwrap();
    assert_eq!(read(&mut ctx), Some(7));
}

struct NoReset;

impl Reducer for NoReset {
    fn init(&self, values: &[File]) -> anyhow::Result<Vec<File>> {
        Ok(vec![File::from(values.len() as i64)])
    }

    fn update(&self, _state: &[File], _removed: &[File], _added: &[File]) -> anyhow::Result<ReducerUpdate> {
        Ok(ReducerUpdate::NeedsFullRecompute)
    }

    fn can_reset(&self) -> bool {
        false
    }
}

#[test]
fn test_reducer_without_reset_fails_update() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(
            name("/in/"),
            true,
            vec![(Key::sid("a"), ints(&[1])), (Key::sid("b"), ints(&[1]))],
        )
        .unwrap();
    ctx.apply(input, name("/count/"), to_total(), Some(Arc::new(NoReset)), None)
        .unwrap_err();

    let single = ctx
        .mkdir(name("/single/"), true, vec![(Key::sid("a"), ints(&[1]))])
        .unwrap();
    ctx.apply(single, name("/count1/"), to_total(), Some(Arc::new(NoReset)), None)
        .unwrap();
    ctx.write_array(single, Key::sid("b"), ints(&[1])).unwrap();
    let err = ctx.update().unwrap_err();
    assert!(matches!(err, StoreError::ReducerCannotReset { .. }));
}
