// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Reconnect Integration Tests
//!
//! Supervision of a connection through [`AutoReconnect`](opcbridge_core::AutoReconnect).

use std::time::Duration;

use opcbridge_core::{BackoffStrategy, BridgeError, ConnectionState, ReconnectPolicy};
use opcbridge_tests::prelude::*;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    within(DEFAULT_WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_link_loss() {
    init_test_logging();
    let harness = TestHarness::new(HarnessConfig::default());
    let auto = harness.supervised(ProfileFixtures::quick_reconnect());
    auto.connect(harness.profile()).await.unwrap();
    assert!(auto.is_keep_alive());

    let mut observer = auto.state_observer();
    assert!(harness.driver.drop_link());

    let transitions = collect_transitions(&mut observer, 4).await;
    assert_legal_walk(ConnectionState::Connected, &transitions);
    assert_eq!(transitions[3].to, ConnectionState::Connected);

    wait_until(|| auto.reconnects() == 1).await;
    assert_eq!(auto.attempts(), 1);
    assert_eq!(harness.driver.connect_calls(), 2);
    assert!(harness.driver.live_link().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_retries_failed_handshakes() {
    let harness = TestHarness::new(HarnessConfig::default());
    let auto = harness.supervised(ProfileFixtures::quick_reconnect());
    auto.connect(harness.profile()).await.unwrap();

    harness.driver.fail_next_connects(2);
    harness.driver.drop_link();

    wait_until(|| auto.reconnects() == 1).await;
    assert_eq!(auto.attempts(), 3);
    assert!(auto.connection().state().is_connected());
    assert_eq!(auto.connection().stats().connect_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_recreated_by_the_caller() {
    let harness = TestHarness::new(HarnessConfig::default());
    harness.driver.set_value("T1", 1);
    let auto = harness.supervised(ProfileFixtures::quick_reconnect());
    auto.connect(harness.profile()).await.unwrap();

    let old = harness.session().await;
    old.read_one("T1").await.unwrap();
    harness.driver.drop_link();
    wait_until(|| auto.reconnects() == 1).await;

    assert!(old.is_detached());
    assert!(matches!(
        old.read_one("T1").await,
        Err(BridgeError::SessionDetached { .. })
    ));
    assert_eq!(harness.connection.session_count(), 0);

    let fresh = harness.session().await;
    fresh.read_one("T1").await.unwrap().assert_good();
}

// =============================================================================
// Stopping
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_attempts() {
    let harness = TestHarness::new(HarnessConfig::default());
    let policy = ReconnectPolicy::new()
        .with_backoff(BackoffStrategy::fixed(Duration::from_millis(100)))
        .with_max_attempts(2);
    let auto = harness.supervised(policy);
    auto.connect(harness.profile()).await.unwrap();

    harness.driver.fail_next_connects(10);
    harness.driver.drop_link();

    wait_until(|| !auto.is_keep_alive()).await;
    assert_eq!(auto.attempts(), 2);
    assert_eq!(auto.reconnects(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.driver.connect_calls(), 3);
    assert_eq!(harness.connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_operator_disconnect_stops_supervision() {
    let harness = TestHarness::new(HarnessConfig::default());
    let auto = harness.supervised(ProfileFixtures::quick_reconnect());
    auto.connect(harness.profile()).await.unwrap();

    auto.disconnect().await.unwrap();
    assert!(!auto.is_keep_alive());
    assert_eq!(harness.connection.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.driver.connect_calls(), 1);
    assert_eq!(auto.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff() {
    let harness = TestHarness::new(HarnessConfig::default());
    let auto = harness.supervised(
        ReconnectPolicy::new().with_backoff(BackoffStrategy::fixed(Duration::from_secs(5))),
    );
    auto.connect(harness.profile()).await.unwrap();

    let mut observer = auto.state_observer();
    harness.driver.drop_link();
    within(DEFAULT_WAIT, observer.wait_for(|s| s.is_disconnected()))
        .await
        .unwrap();

    auto.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.driver.connect_calls(), 1);
    assert_eq!(auto.attempts(), 0);
    assert_eq!(harness.connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_is_not_retried() {
    let harness = TestHarness::new(HarnessConfig::default());
    harness.driver.fail_next_connects(1);
    let auto = harness.supervised(ProfileFixtures::quick_reconnect());

    assert!(auto.connect(harness.profile()).await.is_err());
    assert!(!auto.is_keep_alive());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.driver.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_operator_reconnect() {
    let harness = TestHarness::new(HarnessConfig::default());
    let auto = harness.supervised(ProfileFixtures::quick_reconnect());
    auto.connect(harness.profile()).await.unwrap();
    auto.disconnect().await.unwrap();

    // Supervision resumes with the next explicit connect.
    auto.connect(harness.profile()).await.unwrap();
    harness.driver.drop_link();
    wait_until(|| auto.reconnects() == 1).await;
    assert!(harness.connection.state().is_connected());
}
