//! Integration tests for async lazy directories

use super::test_utils::name;
use parking_lot::Mutex;
use skstore::dir::LazyFn;
use skstore::{AsyncStart, AsyncValue, CallId, Context, DirName, File, Key, StoreError};
use std::sync::Arc;

fn queue_start(queue: Arc<Mutex<Vec<(CallId, Key)>>>) -> AsyncStart {
    Arc::new(move |_ctx: &mut Context, call: CallId, key: &Key| -> anyhow::Result<()> {
        queue.lock().push((call, key.clone()));
        Ok(())
    })
}

#[test]
fn test_lazy_reader_follows_async_resolution() {
    let mut ctx = Context::create();
    let queue = Arc::new(Mutex::new(Vec::new()));
    let weather = ctx
        .mk_async_lazy(name("/weather/"), queue_start(queue.clone()))
        .unwrap();

    let summary: LazyFn = Arc::new(
        move |ctx: &mut Context, _name: &DirName, key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            let label = match ctx.get_async(weather, key)? {
                AsyncValue::Success { files } => format!("ready:{}", files.len()),
                AsyncValue::Loading { .. } => "loading".to_string(),
                AsyncValue::Failure { error, .. } => format!("failed:{}", error),
            };
            Ok(Some(vec![File::from(label.as_str())]))
        },
    );
    let summary = ctx.mk_lazy(name("/summary/"), summary, false).unwrap();

    let paris = Key::sid("paris");
    assert_eq!(
        ctx.get_array(summary, &paris).unwrap(),
        vec![File::from("loading")]
    );
    assert_eq!(ctx.pending_async_calls().len(), 1);

    let (call, key) = queue.lock()[0].clone();
    assert_eq!(key, paris);
    ctx.resolve_async(call, Ok(vec![File::from(18), File::from(21)]))
        .unwrap();
    assert_eq!(
        ctx.get_array(summary, &paris).unwrap(),
        vec![File::from("ready:2")]
    );
}

#[test]
fn test_start_error_is_reported_and_not_pending() {
    let mut ctx = Context::create();
    let start: AsyncStart = Arc::new(|_ctx: &mut Context, _call: CallId, key: &Key| -> anyhow::Result<()> {
        anyhow::bail!("no backend for {}", key)
    });
    let id = ctx.mk_async_lazy(name("/offline/"), start).unwrap();
    assert!(matches!(
        ctx.get_async(id, &Key::Iid(1)),
        Err(StoreError::Transform { .. })
    ));
    assert!(ctx.pending_async_calls().is_empty());
}

#[test]
fn test_retry_on_plain_lazy_dir_is_rejected() {
    let mut ctx = Context::create();
    let plain: LazyFn = Arc::new(
        |_ctx: &mut Context, _name: &DirName, _key: &Key| -> anyhow::Result<Option<Vec<File>>> {
            Ok(None)
        },
    );
    let id = ctx.mk_lazy(name("/plain/"), plain, false).unwrap();
    assert!(matches!(
        ctx.retry_async(id, &Key::Iid(1)),
        Err(StoreError::WrongDirectoryKind { .. })
    ));
    assert!(matches!(
        ctx.resolve_async(CallId(99), Ok(vec![])),
        Err(StoreError::UnknownAsyncCall(_))
    ));
}
