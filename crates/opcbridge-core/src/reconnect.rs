// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Automatic reconnection.
//!
//! [`AutoReconnect`] wraps an [`OpcConnection`]. After a successful `connect` it spawns a
//! supervisor task that waits for the connection to become `Disconnected` and, while the
//! keep-alive latch is set, retries `connect` with the policy's backoff.
//!
//! `disconnect` clears the latch, cancels the supervisor and joins it before tearing the
//! connection down, so no retry can start after it returns. An in-flight `connect` of the
//! supervisor is never dropped halfway; `disconnect` waits for it to finish.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionState, OpcConnection, StateObserver};
use crate::error::{BridgeError, BridgeResult, ConnectionError};
use crate::profile::ConnectionProfile;
use crate::retry::ReconnectPolicy;

struct Supervisor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Supervisor {
    async fn stop(self) {
        self.token.cancel();
        if let Err(error) = self.handle.await {
            tracing::error!(error = %error, "Reconnect supervisor panicked");
        }
    }
}

struct ReconnectInner {
    connection: OpcConnection,
    policy: ReconnectPolicy,
    keep_alive: AtomicBool,
    supervisor: Mutex<Option<Supervisor>>,
    attempts: AtomicU64,
    reconnects: AtomicU64,
}

/// A connection that reconnects itself after failure-induced disconnects.
#[derive(Clone)]
pub struct AutoReconnect {
    inner: Arc<ReconnectInner>,
}

impl AutoReconnect {
    /// Wraps a connection.
    pub fn new(connection: OpcConnection, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(ReconnectInner {
                connection,
                policy,
                keep_alive: AtomicBool::new(false),
                supervisor: Mutex::new(None),
                attempts: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
        }
    }

    /// The wrapped connection.
    pub fn connection(&self) -> &OpcConnection {
        &self.inner.connection
    }

    /// The retry policy.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Observer of the wrapped connection's state.
    pub fn state_observer(&self) -> StateObserver {
        self.inner.connection.state_observer()
    }

    /// Returns `true` while reconnection is wanted.
    pub fn is_keep_alive(&self) -> bool {
        self.inner.keep_alive.load(Ordering::SeqCst)
    }

    /// Number of reconnect attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Number of successful reconnects.
    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    /// Connects and starts supervising the connection.
    ///
    /// The first connect is not retried; its error is returned as is.
    pub async fn connect(&self, profile: ConnectionProfile) -> BridgeResult<()> {
        let mut slot = self.inner.supervisor.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        self.inner.connection.connect(profile.clone()).await?;
        self.inner.keep_alive.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        let handle = tokio::spawn(supervise(self.inner.clone(), profile, token.clone()));
        *slot = Some(Supervisor { token, handle });
        Ok(())
    }

    /// Stops supervision and disconnects.
    pub async fn disconnect(&self) -> BridgeResult<()> {
        let mut slot = self.inner.supervisor.lock().await;
        self.inner.keep_alive.store(false, Ordering::SeqCst);
        if let Some(supervisor) = slot.take() {
            supervisor.stop().await;
        }
        self.inner.connection.disconnect().await
    }
}

impl std::fmt::Debug for AutoReconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoReconnect")
            .field("connection", &self.inner.connection)
            .field("keep_alive", &self.is_keep_alive())
            .field("attempts", &self.attempts())
            .finish()
    }
}

async fn supervise(inner: Arc<ReconnectInner>, profile: ConnectionProfile, token: CancellationToken) {
    let connection_id = inner.connection.id();
    let mut observer = inner.connection.state_observer();
    tracing::debug!(connection_id = %connection_id, "Reconnect supervisor started");

    loop {
        let state = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            state = observer.wait_for(|state| state == ConnectionState::Disconnected) => state,
        };
        if state.is_none() || !inner.keep_alive.load(Ordering::SeqCst) {
            break;
        }
        tracing::warn!(connection_id = %connection_id, "Connection dropped, reconnecting");

        if !reconnect(&inner, &profile, &token).await {
            break;
        }
    }

    tracing::debug!(connection_id = %connection_id, "Reconnect supervisor stopped");
}

/// Retries until connected. Returns `false` if supervision should end.
async fn reconnect(inner: &ReconnectInner, profile: &ConnectionProfile, token: &CancellationToken) -> bool {
    let connection_id = inner.connection.id();
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        if !inner.policy.allows(attempt) {
            tracing::error!(
                connection_id = %connection_id,
                attempts = attempt - 1,
                "Reconnect attempts exhausted, giving up"
            );
            inner.keep_alive.store(false, Ordering::SeqCst);
            return false;
        }

        let delay = inner.policy.backoff.delay(attempt);
        tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        if !inner.keep_alive.load(Ordering::SeqCst) {
            return false;
        }

        inner.attempts.fetch_add(1, Ordering::Relaxed);
        match inner.connection.connect(profile.clone()).await {
            Ok(()) => {
                inner.reconnects.fetch_add(1, Ordering::Relaxed);
                tracing::info!(connection_id = %connection_id, attempt, "Reconnected");
                return true;
            }
            Err(BridgeError::Connection(ConnectionError::AlreadyActive { state })) => {
                tracing::debug!(connection_id = %connection_id, state = %state, "Connection already active");
                return true;
            }
            Err(error) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Reconnect attempt failed"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::DriverError;
    use crate::profile::ConnectionOptions;
    use crate::retry::BackoffStrategy;
    use crate::test_driver::TestDriver;
    use crate::types::{Protocol, ServerState};

    fn profile() -> ConnectionProfile {
        ConnectionProfile::builder(Protocol::Da)
            .host("localhost")
            .port(135)
            .build()
            .unwrap()
    }

    fn supervised(driver: Arc<TestDriver>, policy: ReconnectPolicy) -> AutoReconnect {
        let connection = OpcConnection::with_options(
            driver,
            ConnectionOptions::default()
                .with_liveness_period(Duration::from_millis(50))
                .with_liveness_timeout(Duration::from_millis(20)),
        );
        AutoReconnect::new(connection, policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_probe_failure() {
        let driver = Arc::new(TestDriver::new());
        let auto = supervised(driver.clone(), ReconnectPolicy::default());
        auto.connect(profile()).await.unwrap();
        let mut observer = auto.state_observer();

        driver.set_status(Err(DriverError::transport("link down")));
        observer.wait_for(|s| s.is_disconnected()).await.unwrap();
        driver.set_status(Ok(ServerState::Running));

        observer.wait_for(|s| s.is_connected()).await.unwrap();
        assert_eq!(auto.reconnects(), 1);
        assert!(auto.is_keep_alive());

        auto.disconnect().await.unwrap();
        assert_eq!(auto.connection().state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_disconnect_stops_retry() {
        let driver = Arc::new(TestDriver::new());
        let auto = supervised(driver.clone(), ReconnectPolicy::default());
        auto.connect(profile()).await.unwrap();

        auto.disconnect().await.unwrap();
        assert!(!auto.is_keep_alive());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(auto.connection().state(), ConnectionState::Disconnected);
        assert_eq!(auto.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let driver = Arc::new(TestDriver::new());
        let policy = ReconnectPolicy::new()
            .with_backoff(BackoffStrategy::fixed(Duration::from_millis(100)))
            .with_max_attempts(3);
        let auto = supervised(driver.clone(), policy);
        auto.connect(profile()).await.unwrap();
        let mut observer = auto.state_observer();

        driver.fail_connect(true);
        driver.set_status(Ok(ServerState::Failed));
        observer.wait_for(|s| s.is_disconnected()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(auto.attempts(), 3);
        assert!(!auto.is_keep_alive());
        assert_eq!(auto.connection().state(), ConnectionState::Disconnected);
    }
}
