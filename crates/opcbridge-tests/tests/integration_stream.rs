// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Stream Integration Tests
//!
//! All tests run on paused time so intervals are exact.

use std::time::Duration;

use futures::StreamExt;
use opcbridge_core::{BridgeError, ConnectionError, DriverError, Value};
use opcbridge_tests::prelude::*;
use tokio::time::Instant;

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_changes_delivered_once_each() {
    init_test_logging();
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_value("T1", 1);
    let session = harness.session().await;

    let driver = harness.driver.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        driver.set_value("T1", 2);
        tokio::time::sleep(Duration::from_millis(120)).await;
        driver.set_value("T1", 3);
    });

    let mut stream = session.stream("T1", Duration::from_millis(50));
    let values: Vec<Value> = vec![
        next_sample(&mut stream).await.value,
        next_sample(&mut stream).await.value,
        next_sample(&mut stream).await.value,
    ];
    assert_eq!(values, vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
    writer.await.unwrap();

    // Unchanged polls are not redelivered.
    assert!(tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .is_err());
    assert_eq!(session.stats().events_delivered, 3);

    stream.cancel();
    assert_eq!(session.ref_count("T1"), 0);
    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_throttle_keeps_latest() {
    let harness = TestHarness::connected(
        HarnessConfig::default().refresh_period(Duration::from_millis(10)),
    )
    .await;
    harness.driver.set_value("Fast", 0);
    let session = harness.session().await;

    let driver = harness.driver.clone();
    tokio::spawn(async move {
        for value in 1..=300 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            driver.set_value("Fast", value);
        }
    });

    let mut stream = session.stream("Fast", Duration::from_secs(1));
    let mut received: Vec<(Instant, Value)> = Vec::new();
    loop {
        let sample = next_sample(&mut stream).await;
        received.push((Instant::now(), sample.value.clone()));
        if sample.value == Value::Int32(300) {
            break;
        }
    }

    assert!(received.len() <= 5, "too many samples: {:?}", received);
    for pair in received.windows(2) {
        assert!(
            pair[1].0 - pair[0].0 >= Duration::from_millis(990),
            "samples closer than the interval: {:?}",
            received
        );
        let (Value::Int32(a), Value::Int32(b)) = (&pair[0].1, &pair[1].1) else {
            panic!("unexpected values: {:?}", received);
        };
        assert!(b > a);
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_reads_latest() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_value("T1", 1);
    let session = harness.session().await;

    // The consumer stays away for many intervals while the value moves 1 -> 10.
    let mut stream = session.stream("T1", Duration::from_millis(10));
    for value in 2..=10 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        harness.driver.set_value("T1", value);
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    next_sample(&mut stream).await.assert_value(&Value::Int32(10));
    assert!(tokio::time::timeout(Duration::from_millis(500), stream.next())
        .await
        .is_err());
    assert_eq!(session.stats().events_delivered, 1);
}

#[tokio::test(start_paused = true)]
async fn test_streams_share_one_channel() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_values([("A", 1), ("B", 2)]);
    let session = harness.session().await;

    let mut a1 = session.stream("A", Duration::from_millis(10));
    let mut a2 = session.stream("A", Duration::from_millis(10));
    let mut b = session.stream("B", Duration::from_millis(10));
    next_sample(&mut a1).await.assert_value(&Value::Int32(1));
    next_sample(&mut a2).await.assert_value(&Value::Int32(1));
    next_sample(&mut b).await.assert_value(&Value::Int32(2));

    assert_eq!(session.ref_count("A"), 2);
    assert_eq!(session.ref_count("B"), 1);
    assert_eq!(session.active_tags(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(session.channel_starts(), 1);
    // One registration per tag, however many streams follow it.
    assert_eq!(harness.driver.add_item_calls(), 2);
}

// =============================================================================
// Reference counting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ref_count_never_negative() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_value("T1", 1);
    let session = harness.session().await;

    let mut a = session.stream("T1", Duration::from_millis(10));
    let mut b = session.stream("T1", Duration::from_millis(10));
    next_sample(&mut a).await;
    next_sample(&mut b).await;
    assert_eq!(session.ref_count("T1"), 2);

    a.cancel();
    a.cancel();
    assert_eq!(session.ref_count("T1"), 1);
    drop(a);
    assert_eq!(session.ref_count("T1"), 1);

    drop(b);
    assert_eq!(session.ref_count("T1"), 0);
    assert!(!session.is_channel_running());
    assert!(session.active_tags().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_channel_restarts_lazily() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_value("T1", 1);
    let session = harness.session().await;

    let mut first = session.stream("T1", Duration::from_millis(10));
    next_sample(&mut first).await;
    first.cancel();
    assert!(!session.is_channel_running());

    let reads = harness.driver.read_calls();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.driver.read_calls(), reads);

    let mut second = session.stream("T1", Duration::from_millis(10));
    next_sample(&mut second).await.assert_value(&Value::Int32(1));
    assert!(session.is_channel_running());
    assert_eq!(session.channel_starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_attach() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_add_item_latency(Duration::from_millis(100));
    let session = harness.session().await;

    let mut stream = session.stream("Slow", Duration::from_millis(10));
    stream.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(stream.next().await.is_none());
    assert_eq!(session.ref_count("Slow"), 0);
    assert!(!session.is_channel_running());
}

// =============================================================================
// Push acquisition
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_push_notifications() {
    let harness = TestHarness::connected(HarnessConfig::push()).await;
    let session = harness.session().await;
    let mut stream = session.stream("T1", Duration::from_millis(10));

    within(DEFAULT_WAIT, async {
        while harness.driver.feed_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    harness.driver.push_value("T1", 5);
    next_sample(&mut stream).await.assert_value(&Value::Int32(5));

    // A repeated reading is suppressed.
    harness.driver.push_value("T1", 5);
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.driver.push_value("T1", 6);
    next_sample(&mut stream).await.assert_value(&Value::Int32(6));

    assert_eq!(harness.driver.read_calls(), 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_bad_tag_does_not_affect_others() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.reject_tag("Ghost");
    harness.driver.set_value("T1", 1);
    let session = harness.session().await;

    let mut ghost = session.stream("Ghost", Duration::from_millis(10));
    let mut good = session.stream("T1", Duration::from_millis(10));

    let error = terminal_error(&mut ghost).await;
    assert!(matches!(error, BridgeError::TagResolution { .. }));
    assert!(ghost.next().await.is_none());

    next_sample(&mut good).await;
    harness.driver.set_value("T1", 2);
    next_sample(&mut good).await.assert_value(&Value::Int32(2));
    assert_eq!(session.ref_count("Ghost"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_read_failure_keeps_streaming() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_value("T1", 1);
    let session = harness.session().await;
    let mut stream = session.stream("T1", Duration::from_millis(10));
    next_sample(&mut stream).await;

    harness.driver.fail_reads(Some(DriverError::rejected("server busy")));
    tokio::time::sleep(Duration::from_millis(300)).await;
    harness.driver.fail_reads(None);
    harness.driver.set_value("T1", 2);

    next_sample(&mut stream).await.assert_value(&Value::Int32(2));
    assert!(harness.connection.state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connection_level_failure_ends_every_stream() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_values([("A", 1), ("B", 2)]);
    let first = harness.session().await;
    let second = harness.session().await;

    let mut a = first.stream("A", Duration::from_millis(10));
    let mut b = second.stream("B", Duration::from_millis(10));
    next_sample(&mut a).await;
    next_sample(&mut b).await;

    harness
        .driver
        .fail_reads(Some(DriverError::transport("socket reset")));

    for stream in [&mut a, &mut b] {
        let error = terminal_error(stream).await;
        assert!(
            matches!(error, BridgeError::Connection(ConnectionError::Lost { .. })),
            "unexpected terminal error: {}",
            error
        );
        assert!(error.is_connection_level());
    }

    let mut observer = harness.connection.state_observer();
    within(DEFAULT_WAIT, observer.wait_for(|s| s.is_disconnected()))
        .await
        .unwrap();
    assert_eq!(harness.connection.stats().forced_disconnects, 1);
    assert!(first.is_detached() && second.is_detached());
}

#[tokio::test(start_paused = true)]
async fn test_release_ends_streams_with_detached() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    harness.driver.set_value("T1", 1);
    let session = harness.session().await;
    let mut stream = session.stream("T1", Duration::from_millis(10));
    next_sample(&mut stream).await;

    harness.connection.release_session(&session).await.unwrap();

    let error = terminal_error(&mut stream).await;
    assert!(matches!(error, BridgeError::SessionDetached { .. }));
    assert!(stream.is_terminated());

    let mut late = session.stream("T1", Duration::from_millis(10));
    assert!(matches!(
        late.next().await,
        Some(Err(BridgeError::SessionDetached { .. }))
    ));
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let harness = TestHarness::connected(HarnessConfig::default()).await;
    let session = harness.session().await;

    let mut stream = session.stream("T1", Duration::ZERO);
    assert!(matches!(
        StreamExt::next(&mut stream).await,
        Some(Err(BridgeError::InvalidArgument(_)))
    ));
    assert!(StreamExt::next(&mut stream).await.is_none());
}
