// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Domain-specific assertion helpers with informative failure messages.

use opcbridge_core::{
    BridgeError, ConnectionState, OpcData, OperationStatus, Quality, StateObserver,
    StateTransition, StatusLevel, TagStream, Value,
};

use super::harness::{within, DEFAULT_WAIT};

// =============================================================================
// OpcData Assertions
// =============================================================================

/// Assertion extensions for [`OpcData`].
pub trait OpcDataAssertions {
    /// Assert that the sample has good quality and an informational status.
    fn assert_good(&self);

    /// Assert the quality.
    fn assert_quality(&self, expected: Quality);

    /// Assert the value.
    fn assert_value(&self, expected: &Value);

    /// Assert the status level.
    fn assert_status_level(&self, expected: StatusLevel);
}

impl OpcDataAssertions for OpcData {
    fn assert_good(&self) {
        assert_eq!(
            self.quality,
            Quality::Good,
            "Expected Good quality, but got {} for {}",
            self.quality,
            self.tag
        );
        assert!(
            self.status.is_ok(),
            "Expected an informational status, but got {} for {}",
            self.status,
            self.tag
        );
    }

    fn assert_quality(&self, expected: Quality) {
        assert_eq!(
            self.quality, expected,
            "Expected {} quality, but got {} for {}",
            expected, self.quality, self.tag
        );
    }

    fn assert_value(&self, expected: &Value) {
        assert_eq!(
            &self.value, expected,
            "Expected value {:?}, but got {:?} for {}",
            expected, self.value, self.tag
        );
    }

    fn assert_status_level(&self, expected: StatusLevel) {
        assert_eq!(
            self.status.level, expected,
            "Expected {} status, but got {} for {}",
            expected, self.status, self.tag
        );
    }
}

/// Assert the levels of a batch of statuses, in order.
pub fn assert_levels(statuses: &[OperationStatus], expected: &[StatusLevel]) {
    let actual: Vec<StatusLevel> = statuses.iter().map(|s| s.level).collect();
    assert_eq!(actual, expected, "Unexpected status levels: {:?}", statuses);
}

// =============================================================================
// State Assertions
// =============================================================================

/// Collects the next `count` transitions.
pub async fn collect_transitions(observer: &mut StateObserver, count: usize) -> Vec<StateTransition> {
    let mut transitions = Vec::with_capacity(count);
    for _ in 0..count {
        let transition = within(DEFAULT_WAIT, observer.next_transition())
            .await
            .expect("connection dropped while waiting for a transition");
        transitions.push(transition);
    }
    transitions
}

/// Assert that `transitions` is a walk of the state graph starting at `start`, with
/// gap-free sequence numbers.
pub fn assert_legal_walk(start: ConnectionState, transitions: &[StateTransition]) {
    let mut current = start;
    for pair in transitions.windows(2) {
        assert_eq!(
            pair[1].sequence,
            pair[0].sequence + 1,
            "Transition sequence has a gap: {:?}",
            transitions
        );
    }
    for transition in transitions {
        assert_eq!(
            transition.from, current,
            "Transition {:?} does not start at {}",
            transition, current
        );
        assert!(
            current.can_transition_to(transition.to),
            "Illegal transition {} -> {}",
            current,
            transition.to
        );
        current = transition.to;
    }
}

// =============================================================================
// Stream Assertions
// =============================================================================

/// Waits for the next delivered sample, panicking on termination or error.
pub async fn next_sample(stream: &mut TagStream) -> OpcData {
    match within(DEFAULT_WAIT, stream.next()).await {
        Some(Ok(sample)) => sample,
        Some(Err(error)) => panic!("stream {} failed: {}", stream.tag(), error),
        None => panic!("stream {} ended", stream.tag()),
    }
}

/// Waits for the terminal error of a stream, skipping samples still in flight.
pub async fn terminal_error(stream: &mut TagStream) -> BridgeError {
    loop {
        match within(DEFAULT_WAIT, stream.next()).await {
            Some(Ok(_)) => continue,
            Some(Err(error)) => return error,
            None => panic!("stream {} ended without an error", stream.tag()),
        }
    }
}
