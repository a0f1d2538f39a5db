// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection lifecycle state and its observable.
//!
//! ```text
//!  Disconnected ──connect──► Connecting ──handshake ok──► Connected
//!       ▲                        │                            │
//!       │                        │ handshake failed /         │ disconnect /
//!       │                        │ disconnect                 │ liveness failure
//!       │                        ▼                            ▼
//!       └──────────────────── Disconnecting ◄─────────────────┘
//! ```
//!
//! Transitions are applied under one lock and published before the lock is released, so
//! every observer sees them in the same total order. Observers get both the latest value
//! (`watch`) and the full transition sequence (`broadcast`).

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

// =============================================================================
// ConnectionState
// =============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Link established.
    Connected,
    /// Teardown in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Returns `true` if connected.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` if disconnected.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Returns `true` while the liveness prober should run.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Returns `true` if `next` is a legal successor.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected)
                | (Self::Connecting, Self::Disconnecting)
                | (Self::Connected, Self::Disconnecting)
                | (Self::Disconnecting, Self::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// One applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state.
    pub from: ConnectionState,
    /// New state.
    pub to: ConnectionState,
    /// Position in the connection's transition sequence, starting at 1.
    pub sequence: u64,
    /// When the transition was applied.
    pub at: DateTime<Utc>,
}

// =============================================================================
// StateMachine
// =============================================================================

struct MachineInner {
    state: ConnectionState,
    sequence: u64,
}

/// The authoritative state of one connection.
pub(crate) struct StateMachine {
    inner: Mutex<MachineInner>,
    latest: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<StateTransition>,
}

impl StateMachine {
    const TRANSITION_BUFFER: usize = 64;

    pub(crate) fn new() -> Self {
        let (latest, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(Self::TRANSITION_BUFFER);
        Self {
            inner: Mutex::new(MachineInner {
                state: ConnectionState::Disconnected,
                sequence: 0,
            }),
            latest,
            transitions,
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Moves to `to` if the current state is one of `expected`.
    ///
    /// Returns the previous state, or the current state if the transition was refused.
    pub(crate) fn transition_from(
        &self,
        expected: &[ConnectionState],
        to: ConnectionState,
    ) -> Result<ConnectionState, ConnectionState> {
        self.apply(|inner| expected.contains(&inner.state), to)
            .map(|transition| transition.from)
    }

    /// Like [`transition_from`](Self::transition_from), but returns the sequence number of
    /// the applied transition. The number identifies this phase for [`advance`](Self::advance).
    pub(crate) fn enter(
        &self,
        expected: &[ConnectionState],
        to: ConnectionState,
    ) -> Result<u64, ConnectionState> {
        self.apply(|inner| expected.contains(&inner.state), to)
            .map(|transition| transition.sequence)
    }

    /// Moves to `to` only if no transition was applied after the one numbered `epoch`.
    ///
    /// Returns the new sequence number.
    pub(crate) fn advance(&self, epoch: u64, to: ConnectionState) -> Result<u64, ConnectionState> {
        self.apply(|inner| inner.sequence == epoch, to)
            .map(|transition| transition.sequence)
    }

    /// The current state and the sequence number of the transition that produced it.
    pub(crate) fn epoch(&self) -> (ConnectionState, u64) {
        let inner = self.inner.lock();
        (inner.state, inner.sequence)
    }

    fn apply<F>(&self, admit: F, to: ConnectionState) -> Result<StateTransition, ConnectionState>
    where
        F: FnOnce(&MachineInner) -> bool,
    {
        let mut inner = self.inner.lock();
        let from = inner.state;
        if !admit(&inner) || !from.can_transition_to(to) {
            return Err(from);
        }

        inner.state = to;
        inner.sequence += 1;
        let transition = StateTransition {
            from,
            to,
            sequence: inner.sequence,
            at: Utc::now(),
        };
        self.latest.send_replace(to);
        let _ = self.transitions.send(transition);
        tracing::debug!(old_state = %from, new_state = %to, sequence = inner.sequence, "Connection state changed");
        Ok(transition)
    }

    /// Moves to `to` from whatever legal predecessor the machine is in.
    pub(crate) fn transition(&self, to: ConnectionState) -> Result<ConnectionState, ConnectionState> {
        let current = self.current();
        self.transition_from(&[current], to)
    }

    pub(crate) fn observe(&self) -> StateObserver {
        // Subscribe to both under the lock so the pair is consistent.
        let _guard = self.inner.lock();
        StateObserver {
            latest: self.latest.subscribe(),
            transitions: self.transitions.subscribe(),
        }
    }
}

// =============================================================================
// StateObserver
// =============================================================================

/// Observer of a connection's state.
///
/// [`get`](Self::get) returns the latest state; [`next_transition`](Self::next_transition)
/// yields every transition applied after the observer was created, in order.
pub struct StateObserver {
    latest: watch::Receiver<ConnectionState>,
    transitions: broadcast::Receiver<StateTransition>,
}

impl StateObserver {
    /// Returns the latest state.
    pub fn get(&self) -> ConnectionState {
        *self.latest.borrow()
    }

    /// Waits for the next transition. Returns `None` once the connection is dropped.
    pub async fn next_transition(&mut self) -> Option<StateTransition> {
        loop {
            match self.transitions.recv().await {
                Ok(transition) => return Some(transition),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "State observer lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Waits until the state satisfies `predicate` and returns it.
    ///
    /// Returns immediately if the current state already matches, `None` if the connection
    /// is dropped first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<ConnectionState>
    where
        F: FnMut(ConnectionState) -> bool,
    {
        self.latest
            .wait_for(|state| predicate(*state))
            .await
            .ok()
            .map(|state| *state)
    }

    /// Waits until the latest state changes and returns the new value.
    pub async fn changed(&mut self) -> Option<ConnectionState> {
        self.latest.changed().await.ok()?;
        Some(*self.latest.borrow_and_update())
    }

    /// Returns a plain `watch` receiver of the latest state.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.latest.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
