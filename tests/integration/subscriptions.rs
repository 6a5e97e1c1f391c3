//! Integration tests for subscriptions

use super::test_utils::{ints, name, scale};
use skstore::{
    Context, File, Key, StoreConfig, StoreError, SubscriptionBuffer, SubscriptionOptions,
};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

#[test]
fn test_sink_receives_derived_changes_after_update() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(name("/in/"), true, vec![(Key::Iid(1), ints(&[1]))])
        .unwrap();
    let out = ctx
        .apply(input, name("/out/"), scale(2, Arc::new(AtomicUsize::new(0))), None, None)
        .unwrap();
    let buffer = SubscriptionBuffer::new();
    let session = ctx
        .subscribe(
            out,
            SubscriptionOptions::default()
                .with_init()
                .with_sink(buffer.sink()),
        )
        .unwrap();

    let init = buffer.drain();
    assert_eq!(init.len(), 1);
    assert!(init[0].reset);
    assert_eq!(init[0].entries, vec![(Key::Iid(1), ints(&[2]))]);

    ctx.write_array(input, Key::Iid(2), ints(&[5])).unwrap();
    assert!(buffer.is_empty(), "nothing is pushed before update()");
    ctx.update().unwrap();

    let batches = buffer.drain();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].session, session);
    assert!(!batches[0].reset);
    assert_eq!(batches[0].entries, vec![(Key::Iid(2), ints(&[10]))]);
    assert_eq!(batches[0].tick, ctx.tick());

    ctx.update().unwrap();
    assert!(buffer.is_empty(), "an idle update delivers nothing");
}

#[test]
fn test_removed_keys_arrive_empty() {
    let mut ctx = Context::create();
    let input = ctx
        .mkdir(name("/in/"), true, vec![(Key::Iid(1), ints(&[1]))])
        .unwrap();
    let buffer = SubscriptionBuffer::new();
    ctx.subscribe(input, SubscriptionOptions::default().with_sink(buffer.sink()))
        .unwrap();
    ctx.write_array(input, Key::Iid(1), vec![]).unwrap();
    ctx.update().unwrap();
    let batches = buffer.drain();
    assert_eq!(batches[0].entries, vec![(Key::Iid(1), vec![])]);
}

#[test]
fn test_group_and_privacy_filter() {
    let mut ctx = Context::create();
    let messages = ctx.mkdir(name("/messages/"), true, vec![]).unwrap();
    let session = ctx
        .subscribe(
            messages,
            SubscriptionOptions::default()
                .with_user("ada")
                .with_group(Arc::new(|key: &Key| key.as_iid().map_or(false, |i| i < 100)))
                .with_filter(Arc::new(|user: Option<&str>, _key: &Key, file: &File| {
                    let to = file.value().get("to").and_then(|v| v.as_str());
                    to.is_none() || to == user
                })),
        )
        .unwrap();

    let public = File::new(serde_json::json!({"text": "hello"}));
    let private = File::new(serde_json::json!({"text": "psst", "to": "bob"}));
    ctx.write_array_many(
        messages,
        vec![
            (Key::Iid(1), vec![public.clone(), private]),
            (Key::Iid(500), vec![public.clone()]),
        ],
    )
    .unwrap();

    let batch = ctx.poll_subscription(session).unwrap();
    assert_eq!(batch.entries, vec![(Key::Iid(1), vec![public])]);
    assert!(ctx.poll_subscription(session).unwrap().is_empty());
}

#[test]
fn test_deliver_empty_batches_when_configured() {
    let mut config = StoreConfig::default();
    config.subscriptions.deliver_empty = true;
    let mut ctx = Context::with_config(config);
    let watched = ctx.mkdir(name("/watched/"), true, vec![]).unwrap();
    let other = ctx.mkdir(name("/other/"), true, vec![]).unwrap();
    let buffer = SubscriptionBuffer::new();
    ctx.subscribe(watched, SubscriptionOptions::default().with_sink(buffer.sink()))
        .unwrap();

    ctx.write_array(other, Key::Iid(1), ints(&[1])).unwrap();
    ctx.update().unwrap();
    let batches = buffer.drain();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].is_empty());
}

#[test]
fn test_unsubscribe() {
    let mut ctx = Context::create();
    let dir = ctx.mkdir(name("/in/"), true, vec![]).unwrap();
    let session = ctx.subscribe(dir, SubscriptionOptions::default()).unwrap();
    assert_eq!(ctx.subscription_count(), 1);
    ctx.unsubscribe(session).unwrap();
    assert_eq!(ctx.subscription_count(), 0);
    assert!(matches!(
        ctx.unsubscribe(session),
        Err(StoreError::SubscriptionNotFound(_))
    ));
}
