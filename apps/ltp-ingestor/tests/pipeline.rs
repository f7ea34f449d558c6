//! Pipeline Integration Tests
//!
//! Drives delivered messages through decode, routing, expansion and batched
//! persistence over in-memory adapters.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use common::{Harness, eventually};
use ltp_ingestor::{InstrumentKind, MessageOutcome, TickCodec};

async fn expand(harness: &Harness, topic: &str, price: f64) {
    match harness
        .ingestor
        .handle_message(topic, &TickCodec::encode_single(price))
    {
        MessageOutcome::Accepted {
            expansion: Some(handle),
            ..
        } => {
            handle.await.unwrap();
        }
        other => panic!("expected an expansion, got {other:?}"),
    }
}

#[tokio::test]
async fn first_nifty_tick_subscribes_ladder_around_atm() {
    let harness = Harness::new(100, 1);

    let outcome = harness
        .ingestor
        .handle_message("index/NIFTY", &TickCodec::encode_single(24_980.0));
    let MessageOutcome::Accepted {
        observations: 1,
        expansion: Some(handle),
    } = outcome
    else {
        panic!("first index tick should expand");
    };
    let report = handle.await.unwrap();

    assert_eq!(report.atm_strike, 25_000);
    assert_eq!(report.subscribed, 6);
    let mut topics = harness.broker.subscribed();
    topics.sort();
    assert_eq!(
        topics,
        vec![
            "NSE_FO|24950ce",
            "NSE_FO|24950pe",
            "NSE_FO|25000ce",
            "NSE_FO|25000pe",
            "NSE_FO|25050ce",
            "NSE_FO|25050pe",
        ]
    );

    // Later ticks only update the last price.
    let again = harness
        .ingestor
        .handle_message("index/NIFTY", &TickCodec::encode_single(25_400.0));
    assert!(matches!(
        again,
        MessageOutcome::Accepted {
            expansion: None,
            ..
        }
    ));
    assert_eq!(harness.broker.subscribed().len(), 6);
    assert_eq!(harness.resolver.calls(), 6);
    assert_eq!(
        harness.ingestor.tracker().last_price("NIFTY"),
        Some(25_400.0)
    );
}

#[tokio::test]
async fn timed_flush_persists_index_and_option_ticks() {
    let harness = Harness::new(100, 1);
    expand(&harness, "index/NIFTY", 24_980.0).await;

    harness
        .ingestor
        .handle_message("NSE_FO|25050pe", br#"{"ltp": 88.25}"#);
    assert_eq!(harness.ingestor.writer().pending(), 2);
    assert_eq!(harness.scheduler.armed(), 1);

    assert_eq!(harness.scheduler.fire_all().await, 1);

    assert_eq!(harness.store.commits(), 1);
    assert_eq!(harness.store.tick_count(), 2);

    let index = harness.store.topic("index/NIFTY").unwrap();
    assert_eq!(index.kind, InstrumentKind::Index);
    assert_eq!(index.index_name.as_deref(), Some("NIFTY"));
    assert_eq!(index.strike, None);

    let option = harness.store.topic("NSE_FO|25050pe").unwrap();
    assert_eq!(option.kind, InstrumentKind::Option);
    assert_eq!(option.index_name.as_deref(), Some("NIFTY"));
    assert_eq!(option.strike, Some(25_050));

    let prices: Vec<f64> = harness.store.ticks().iter().map(|t| t.price).collect();
    assert_eq!(prices, vec![24_980.0, 88.25]);
}

#[tokio::test]
async fn three_distinct_option_topics_flush_in_one_transaction() {
    let harness = Harness::new(3, 1);

    for (topic, price) in [("NSE_FO|1", 10.0), ("NSE_FO|2", 20.0), ("NSE_FO|3", 30.0)] {
        harness
            .ingestor
            .handle_message(topic, &TickCodec::encode_single(price));
    }
    assert_eq!(harness.ingestor.writer().pending(), 0);

    let stats = harness.ingestor.writer().drain().await;

    assert_eq!(stats.flushes_committed, 1);
    assert_eq!(stats.rows_written, 3);
    assert_eq!(harness.store.transactions_begun(), 1);
    assert_eq!(harness.store.topic_count(), 3);

    let ids: Vec<i64> = ["NSE_FO|1", "NSE_FO|2", "NSE_FO|3"]
        .iter()
        .map(|name| harness.store.topic(name).unwrap().id)
        .collect();
    let rows: Vec<(i64, f64)> = harness
        .store
        .ticks()
        .iter()
        .map(|t| (t.topic_id, t.price))
        .collect();
    assert_eq!(rows, vec![(ids[0], 10.0), (ids[1], 20.0), (ids[2], 30.0)]);

    // Unknown option topics have no leg metadata.
    assert_eq!(harness.store.topic("NSE_FO|1").unwrap().strike, None);
    assert_eq!(harness.scheduler.fire_all().await, 0);
}

#[tokio::test]
async fn forced_insert_failure_commits_nothing_until_retry() {
    let harness = Harness::new(3, 1);
    harness.store.fail_tick_inserts(true);

    for topic in ["NSE_FO|1", "NSE_FO|2", "NSE_FO|3"] {
        harness
            .ingestor
            .handle_message(topic, &TickCodec::encode_single(1.0));
    }
    let writer = harness.ingestor.writer();
    eventually(|| writer.stats().flushes_failed == 1).await;

    assert_eq!(harness.store.tick_count(), 0);
    assert_eq!(harness.store.rollbacks(), 1);
    assert_eq!(writer.pending(), 3);
    assert!(writer.timer_armed());

    harness.store.fail_tick_inserts(false);
    harness.scheduler.fire_all().await;

    assert_eq!(harness.store.tick_count(), 3);
    assert_eq!(writer.stats().rows_dropped, 0);
}

#[tokio::test]
async fn bad_messages_are_counted_and_skipped() {
    let harness = Harness::new(100, 1);

    let undecodable = harness.ingestor.handle_message("index/NIFTY", b"not a tick");
    let unroutable = harness
        .ingestor
        .handle_message("weather/today", &TickCodec::encode_single(21.0));
    let empty_token = harness
        .ingestor
        .handle_message("NSE_FO|", &TickCodec::encode_single(21.0));

    assert!(matches!(undecodable, MessageOutcome::Undecodable));
    assert!(matches!(unroutable, MessageOutcome::Unroutable));
    assert!(matches!(empty_token, MessageOutcome::Unroutable));

    let stats = harness.ingestor.stats();
    assert_eq!(stats.messages, 3);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.unroutable, 2);
    assert_eq!(stats.observations, 0);
    assert_eq!(harness.ingestor.writer().pending(), 0);
    // A failed decode does not arm expansion.
    assert!(harness.ingestor.tracker().state("NIFTY").is_none());
}

#[tokio::test]
async fn reconnect_reissues_every_active_topic() {
    let harness = Harness::new(100, 1);
    let indices = vec!["NIFTY".to_string(), "BANKNIFTY".to_string()];

    assert_eq!(harness.ingestor.bootstrap(&indices).await, 2);
    expand(&harness, "index/NIFTY", 24_980.0).await;
    assert_eq!(harness.broker.subscribed().len(), 8);

    harness.broker.clear();
    let reissued = harness.ingestor.resubscribe().await;

    assert_eq!(reissued, 8);
    let topics = harness.broker.subscribed();
    assert!(topics.contains(&"index/NIFTY".to_string()));
    assert!(topics.contains(&"index/BANKNIFTY".to_string()));
    assert_eq!(harness.ingestor.expander().active().len(), 8);

    // A second bootstrap finds every index already active.
    harness.broker.clear();
    assert_eq!(harness.ingestor.bootstrap(&indices).await, 0);
    assert!(harness.broker.subscribed().is_empty());
}

#[tokio::test]
async fn shutdown_drain_writes_buffered_ticks() {
    let harness = Harness::new(100, 1);

    harness
        .ingestor
        .handle_message("NSE_FO|9", &TickCodec::encode_batch(&[1.0, 2.0, 3.0]));
    let stats = harness.ingestor.writer().drain().await;

    assert_eq!(stats.rows_written, 3);
    assert_eq!(stats.pending, 0);
    assert!(!harness.ingestor.writer().timer_armed());
}
