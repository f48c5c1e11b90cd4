//! Concurrent step invocations sharing one run.

mod common;

use common::{Add, Harness, SubPipe, num};
use futures::StreamExt;
use futures::future::{join, try_join_all};
use recast_cache::{CacheConfig, Error};
use recast_events::PipelineEvent;
use std::collections::BTreeMap;

#[tokio::test]
async fn test_fan_out_records_every_key() {
    let h = Harness::new();
    let add = Add::non_deterministic();

    let (outputs, mut log) = h
        .cached()
        .execute_with_log(|ctx| async move {
            let calls = [0, 1, 2].map(|v| ctx.invoke(&add, num(v)));
            try_join_all(calls).await
        })
        .await
        .unwrap();

    assert_eq!(outputs, vec![num(1), num(2), num(3)]);
    log.sort();
    assert_eq!(log, vec!["add-10bb", "add-660e", "add-993e"]);
    assert_eq!(h.fs.files().len(), 3);
}

#[tokio::test]
async fn test_bounded_fan_out_with_buffered_stream() {
    let h = Harness::new();
    let add = Add::non_deterministic();
    let calls = add.calls.clone();

    let outputs = h
        .pipeline(CacheConfig::default())
        .execute(|ctx| async move {
            let results: Vec<_> = futures::stream::iter(0..8)
                .map(|v| {
                    let (ctx, add) = (ctx.clone(), add.clone());
                    async move { ctx.invoke(&add, num(v * 10)).await }
                })
                .buffered(3)
                .collect()
                .await;
            results.into_iter().collect::<Result<Vec<_>, Error>>()
        })
        .await
        .unwrap();

    assert_eq!(outputs.len(), 8);
    assert_eq!(outputs[3], num(31));
    assert_eq!(calls.count(), 8);
}

#[tokio::test]
async fn test_concurrent_reentry_of_same_key_is_a_cycle() {
    let h = Harness::new();
    let add = Add::non_deterministic();
    let calls = add.calls.clone();

    let (a, b) = h
        .pipeline(CacheConfig::default())
        .execute(|ctx| async move {
            let pair = join(ctx.invoke(&add, num(1)), ctx.invoke(&add, num(1))).await;
            Ok::<_, Error>(pair)
        })
        .await
        .unwrap();

    let outcomes = [a, b];
    let cycles = outcomes
        .iter()
        .filter(|r| matches!(r, Err(Error::CycleDetected { key }) if key == "add-993e"))
        .count();
    assert_eq!(cycles, 1);
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn test_interleaved_events_stay_ordered_per_key() {
    let h = Harness::new();
    let mut receiver = h.bus.subscribe();
    let pipes: Vec<_> = (0..3).map(|_| SubPipe::default()).collect();

    h.pipeline(CacheConfig::default())
        .execute(|ctx| async move {
            let calls = pipes
                .iter()
                .zip([0, 10, 20])
                .map(|(pipe, v)| ctx.invoke(pipe, num(v)));
            try_join_all(calls).await
        })
        .await
        .unwrap();

    let mut per_key: BTreeMap<String, Vec<&'static str>> = BTreeMap::new();
    for event in receiver.drain() {
        per_key
            .entry(event.key().to_string())
            .or_default()
            .push(event.kind());
    }
    assert_eq!(per_key.len(), 9);
    for kinds in per_key.values() {
        assert_eq!(kinds, &vec!["started", "success", "timing"]);
    }
    assert!(per_key.keys().any(|k| k.starts_with("sub-pipe-") && k.contains("/add-")));
}

#[tokio::test]
async fn test_abort_from_sibling_stops_new_starts() {
    let h = Harness::new();
    let add = Add::non_deterministic();
    let calls = add.calls.clone();
    let mut receiver = h.bus.subscribe_where(PipelineEvent::is_result);

    let err = h
        .cached()
        .execute(|ctx| async move {
            ctx.invoke(&add, num(0)).await?;
            let stopper = ctx.clone();
            stopper.abort("operator requested stop");
            try_join_all([1, 2].map(|v| ctx.invoke(&add, num(v)))).await
        })
        .await
        .unwrap_err();

    assert!(err.is_abort());
    assert_eq!(calls.count(), 1);
    assert_eq!(receiver.drain().len(), 1);
}
