//! Integration tests for lazy directories

use super::test_utils::{ints, name, read_ints, scale};
use skstore::arrow::MapFn;
use skstore::dir::LazyFn;
use skstore::{Context, DirName, File, Key, StoreConfig, StoreError, Writer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lazy compute reading `source[key]` and adding one, counting invocations.
fn plus_one(source: skstore::DirId, calls: Arc<AtomicUsize>) -> LazyFn {
    Arc::new(
        move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            calls.fetch_add(1, Ordering::SeqCst);
            let values = ctx.get_array(source, key)?;
            Ok(Some(
                values
                    .iter()
                    .map(|f| File::from(f.as_i64().unwrap_or(0) + 1))
                    .collect(),
            ))
        },
    )
}

#[test]
fn test_second_read_hits_cache() {
    let mut ctx = Context::create();
    let calls = Arc::new(AtomicUsize::new(0));
    let input = ctx
        .mkdir(name("/in/"), true, vec![(Key::Iid(1), ints(&[1]))])
        .unwrap();
    let lazy = ctx
        .mk_lazy(name("/lazy/"), plus_one(input, calls.clone()), false)
        .unwrap();

    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![2]);
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![2]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dependency_change_invalidates_entry() {
    let mut ctx = Context::create();
    let calls = Arc::new(AtomicUsize::new(0));
    let input = ctx
        .mkdir(
            name("/in/"),
            true,
            vec![(Key::Iid(1), ints(&[1])), (Key::Iid(2), ints(&[10]))],
        )
        .unwrap();
    let lazy = ctx
        .mk_lazy(name("/lazy/"), plus_one(input, calls.clone()), false)
        .unwrap();
    read_ints(&mut ctx, lazy, &Key::Iid(1));
    read_ints(&mut ctx, lazy, &Key::Iid(2));

    ctx.write_array(input, Key::Iid(2), ints(&[20])).unwrap();
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![2]);
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(2)), vec![21]);
    assert_eq!(calls.load(Ordering::SeqCst), 3, "only key 2 is recomputed");
}

#[test]
fn test_lazy_chain_early_cutoff() {
    let mut ctx = Context::create();
    let parity_calls = Arc::new(AtomicUsize::new(0));
    let label_calls = Arc::new(AtomicUsize::new(0));
    let input = ctx
        .mkdir(name("/in/"), true, vec![(Key::Iid(1), ints(&[2]))])
        .unwrap();

    let counter = parity_calls.clone();
    let parity: LazyFn = Arc::new(
        move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = ctx.get_array(input, key)?.first().and_then(File::as_i64).unwrap_or(0);
            Ok(Some(vec![File::from(n % 2)]))
        },
    );
    let parity = ctx.mk_lazy(name("/parity/"), parity, false).unwrap();

    let counter = label_calls.clone();
    let label: LazyFn = Arc::new(
        move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            counter.fetch_add(1, Ordering::SeqCst);
            let bit = ctx.get_array(parity, key)?.first().and_then(File::as_i64);
            let label = if bit == Some(0) { "even" } else { "odd" };
            Ok(Some(vec![File::from(label)]))
        },
    );
    let label = ctx.mk_lazy(name("/label/"), label, false).unwrap();

    assert_eq!(ctx.get_array(label, &Key::Iid(1)).unwrap(), vec![File::from("even")]);
    ctx.write_array(input, Key::Iid(1), ints(&[4])).unwrap();
    assert_eq!(ctx.get_array(label, &Key::Iid(1)).unwrap(), vec![File::from("even")]);
    assert_eq!(parity_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        label_calls.load(Ordering::SeqCst),
        1,
        "an unchanged parity must not recompute the label"
    );
}

#[test]
fn test_transitive_cycle() {
    let mut ctx = Context::create();
    let pong_name = name("/pong/");

    let pong_lookup = pong_name.clone();
    let ping: LazyFn = Arc::new(
        move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            let pong = ctx.dir_id(&pong_lookup)?;
            Ok(Some(ctx.get_array(pong, key)?))
        },
    );
    let ping = ctx.mk_lazy(name("/ping/"), ping, false).unwrap();

    let back: LazyFn = Arc::new(
        move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            Ok(Some(ctx.get_array(ping, key)?))
        },
    );
    let pong = ctx.mk_lazy(pong_name, back, false).unwrap();

    let err = ctx.get_array(ping, &Key::Iid(1)).unwrap_err();
    assert!(matches!(err, StoreError::CycleDetected { .. }));
    let err = ctx.get_array(pong, &Key::Iid(1)).unwrap_err();
    assert!(matches!(err, StoreError::CycleDetected { .. }));
    assert!(ctx.lazy_dir(ping).unwrap().entry(&Key::Iid(1)).is_none());
}

#[test]
fn test_configured_cycle_policy() {
    let mut config = StoreConfig::default();
    config.lazy.throw_on_cycle = false;
    let mut ctx = Context::with_config(config);
    let selfish: LazyFn = Arc::new(
        |ctx: &mut Context, name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            let me = ctx.dir_id(name)?;
            let seen = ctx.get_array(me, key)?;
            Ok(Some(vec![File::from(seen.len() as i64)]))
        },
    );
    let id = ctx.mk_lazy(name("/self/"), selfish, false).unwrap();
    assert_eq!(ctx.get_array(id, &Key::Iid(7)).unwrap(), vec![File::from(0)]);
}

#[test]
fn test_lazy_over_derived_directory() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(name("/in/"), true, vec![(Key::Iid(1), ints(&[1]))])
        .unwrap();
    let derived = ctx
        .apply(
            input,
            name("/derived/"),
            scale(10, Arc::new(AtomicUsize::new(0))),
            None,
            None,
        )
        .unwrap();
    let lazy = ctx
        .mk_lazy(name("/lazy/"), plus_one(derived, Arc::new(AtomicUsize::new(0))), false)
        .unwrap();
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![11]);

    ctx.write_array(input, Key::Iid(1), ints(&[2])).unwrap();
    assert_eq!(
        read_ints(&mut ctx, lazy, &Key::Iid(1)),
        vec![11],
        "derived data only moves on update()"
    );
    ctx.update().unwrap();
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![21]);
}

#[test]
fn test_transform_error_surfaces_and_is_not_cached() {
    let mut ctx = Context::create();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let failing: LazyFn = Arc::new(
        move |_ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("cannot compute {}", key)
        },
    );
    let id = ctx.mk_lazy(name("/bad/"), failing, false).unwrap();
    assert!(matches!(
        ctx.get_array(id, &Key::Iid(1)),
        Err(StoreError::Transform { .. })
    ));
    assert!(ctx.get_array(id, &Key::Iid(1)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_lazy_read_mid_update_sees_later_derived_writes() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(name("/I/"), true, vec![(Key::Iid(1), ints(&[1]))])
        .unwrap();

    // Refreshed before /D/ in every pass, and reads /L/ once it exists.
    let lazy_name = name("/L/");
    let early: MapFn = Arc::new(
        move |ctx: &mut Context, w: &mut Writer, key: &Key, _values: &[File]| -> anyhow::Result<()> {
            if let Some(lazy) = ctx.maybe_get_dir(&lazy_name) {
                w.set_array(key.clone(), ctx.get_array(lazy, key)?)?;
            }
            Ok(())
        },
    );
    ctx.apply(input, name("/E/"), early, None, None).unwrap();
    let derived = ctx
        .apply(input, name("/D/"), scale(2, Arc::new(AtomicUsize::new(0))), None, None)
        .unwrap();
    let lazy = ctx
        .mk_lazy(name("/L/"), plus_one(derived, Arc::new(AtomicUsize::new(0))), false)
        .unwrap();
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![3]);

    ctx.write_array(input, Key::Iid(1), ints(&[5])).unwrap();
    ctx.update().unwrap();
    assert_eq!(read_ints(&mut ctx, derived, &Key::Iid(1)), vec![10]);
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![11]);

    ctx.write_array(input, Key::Iid(2), ints(&[7])).unwrap();
    ctx.update().unwrap();
    assert_eq!(read_ints(&mut ctx, lazy, &Key::Iid(1)), vec![11]);
}

#[test]
fn test_lazy_scan_invalidated_by_same_tick_writes() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(name("/in/"), true, vec![(Key::Iid(1), ints(&[1]))])
        .unwrap();
    let counted: LazyFn = Arc::new(
        move |ctx: &mut Context, _name: &DirName, _key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            Ok(Some(vec![File::from(ctx.size(input)? as i64)]))
        },
    );
    let count = ctx.mk_lazy(name("/count/"), counted, false).unwrap();
    assert_eq!(read_ints(&mut ctx, count, &Key::Iid(0)), vec![1]);

    ctx.write_array_many(
        input,
        vec![(Key::Iid(2), ints(&[2])), (Key::Iid(3), ints(&[3]))],
    )
    .unwrap();
    assert_eq!(read_ints(&mut ctx, count, &Key::Iid(0)), vec![3]);
}
