// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          OpcConnection                           │
//! │                                                                  │
//! │  StateMachine ──► StateObserver (watch + broadcast)              │
//! │                                                                  │
//! │  ActiveLink { handle, profile, prober token, fault sender }      │
//! │        │                                                         │
//! │        └──► liveness task: server_status every period,           │
//! │                            session faults ──► force_disconnect   │
//! │                                                                  │
//! │  SessionRegistry<OpcSession>   ClientHandleAllocator             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `connect` and `disconnect` resolve only once the handshake or the full teardown
//! (including every session) is complete.

mod liveness;
mod state;

pub use state::{ConnectionState, StateObserver, StateTransition};

pub(crate) use liveness::{FaultReporter, LinkFault};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::driver::{LinkHandle, ProtocolDriver};
use crate::error::{BridgeError, BridgeResult, ConnectionError};
use crate::profile::{ConnectionOptions, ConnectionProfile, SessionProfile};
use crate::registry::SessionRegistry;
use crate::resolver::ClientHandleAllocator;
use crate::session::{OpcSession, SessionContext};
use crate::types::{BrowseNode, ConnectionId, SessionId};
use liveness::{run_prober, ProberConfig};
use state::StateMachine;

// =============================================================================
// ConnectionStats
// =============================================================================

/// Counters of a connection object.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    connects: AtomicU64,
    connect_failures: AtomicU64,
    disconnects: AtomicU64,
    forced_disconnects: AtomicU64,
    probe_failures: AtomicU64,
    link_faults: AtomicU64,
    sessions_created: AtomicU64,
    sessions_released: AtomicU64,
}

impl ConnectionStats {
    fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_disconnect(&self, forced: bool) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.forced_disconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_link_fault(&self) {
        self.link_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            forced_disconnects: self.forced_disconnects.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            link_faults: self.link_faults.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_released: self.sessions_released.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionStatsSnapshot {
    /// Successful handshakes.
    pub connects: u64,
    /// Failed handshakes.
    pub connect_failures: u64,
    /// Completed teardowns.
    pub disconnects: u64,
    /// Teardowns forced by a liveness failure or a link fault.
    pub forced_disconnects: u64,
    /// Failed liveness probes.
    pub probe_failures: u64,
    /// Connection-level failures reported by session channels.
    pub link_faults: u64,
    /// Sessions created.
    pub sessions_created: u64,
    /// Sessions released explicitly.
    pub sessions_released: u64,
}

// =============================================================================
// ConnectionInner
// =============================================================================

struct ActiveLink {
    handle: LinkHandle,
    generation: u64,
    profile: Arc<ConnectionProfile>,
    prober: CancellationToken,
    faults: mpsc::UnboundedSender<LinkFault>,
}

#[derive(Debug, Clone)]
enum DisconnectCause {
    Operator,
    Lost(String),
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    driver: Arc<dyn ProtocolDriver>,
    options: ConnectionOptions,
    state: StateMachine,
    link: Mutex<Option<ActiveLink>>,
    sessions: SessionRegistry<OpcSession>,
    allocator: Arc<ClientHandleAllocator>,
    next_session: AtomicU64,
    generations: AtomicU64,
    stats: ConnectionStats,
}

impl ConnectionInner {
    /// Full teardown. Safe to call from any task, including the prober's.
    async fn shutdown(&self, cause: DisconnectCause) {
        match self.state.transition_from(
            &[ConnectionState::Connected, ConnectionState::Connecting],
            ConnectionState::Disconnecting,
        ) {
            Ok(_) => {}
            Err(ConnectionState::Disconnecting) => {
                // Another task owns the teardown; wait for it to finish.
                let mut observer = self.state.observe();
                observer
                    .wait_for(|state| state != ConnectionState::Disconnecting)
                    .await;
                return;
            }
            Err(_) => return,
        }

        let link = self.link.lock().take();
        if let Some(link) = &link {
            link.prober.cancel();
        }

        let forced = matches!(cause, DisconnectCause::Lost(_));
        let stream_error = BridgeError::Connection(match &cause {
            DisconnectCause::Operator => ConnectionError::Closed,
            DisconnectCause::Lost(reason) => ConnectionError::lost(reason.clone()),
        });

        let sessions = self.sessions.drain();
        let session_count = sessions.len();
        for session in &sessions {
            session.detach(stream_error.clone());
        }

        if let Some(link) = &link {
            let timeout = link.profile.socket_timeout;
            let teardowns = sessions.iter().map(|session| {
                let driver = self.driver.clone();
                let subscription = session.subscription();
                let session_id = session.id();
                async move {
                    match tokio::time::timeout(
                        timeout,
                        driver.destroy_subscription(link.handle, subscription),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => tracing::debug!(
                            session_id = %session_id,
                            error = %error,
                            "Subscription teardown failed"
                        ),
                        Err(_) => tracing::debug!(session_id = %session_id, "Subscription teardown timed out"),
                    }
                }
            });
            join_all(teardowns).await;

            match tokio::time::timeout(timeout, self.driver.disconnect(link.handle)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(connection_id = %self.id, error = %error, "Driver disconnect failed")
                }
                Err(_) => tracing::warn!(connection_id = %self.id, "Driver disconnect timed out"),
            }
        }

        self.stats.record_disconnect(forced);
        let _ = self.state.transition(ConnectionState::Disconnected);
        match cause {
            DisconnectCause::Operator => tracing::info!(
                connection_id = %self.id,
                sessions = session_count,
                "Disconnected"
            ),
            DisconnectCause::Lost(reason) => tracing::warn!(
                connection_id = %self.id,
                sessions = session_count,
                reason = %reason,
                "Connection lost"
            ),
        }
    }

    /// Tears the link down if it is still the one identified by `generation`.
    pub(crate) async fn force_disconnect(&self, generation: u64, reason: String) {
        let current = self.link.lock().as_ref().map(|link| link.generation);
        if current != Some(generation) {
            return;
        }
        self.shutdown(DisconnectCause::Lost(reason)).await;
    }

    /// Closes a link obtained by a handshake that lost the race against a disconnect.
    async fn close_orphan(&self, handle: LinkHandle, timeout: Duration) {
        if let Ok(Err(error)) = tokio::time::timeout(timeout, self.driver.disconnect(handle)).await {
            tracing::debug!(connection_id = %self.id, error = %error, "Closing aborted link failed");
        }
    }
}

// =============================================================================
// OpcConnection
// =============================================================================

/// A connection to one server through one protocol driver.
///
/// Cloning is cheap; all clones share the same connection.
#[derive(Clone)]
pub struct OpcConnection {
    inner: Arc<ConnectionInner>,
}

impl OpcConnection {
    /// Creates a disconnected connection with default options.
    pub fn new(driver: Arc<dyn ProtocolDriver>) -> Self {
        Self::with_options(driver, ConnectionOptions::default())
    }

    /// Creates a disconnected connection.
    pub fn with_options(driver: Arc<dyn ProtocolDriver>, options: ConnectionOptions) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::new(),
                driver,
                options,
                state: StateMachine::new(),
                link: Mutex::new(None),
                sessions: SessionRegistry::new(),
                allocator: Arc::new(ClientHandleAllocator::new()),
                next_session: AtomicU64::new(1),
                generations: AtomicU64::new(0),
                stats: ConnectionStats::default(),
            }),
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    /// Returns an observer of the state.
    pub fn state_observer(&self) -> StateObserver {
        self.inner.state.observe()
    }

    /// Returns the options.
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Returns the counters.
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns the profile of the active link.
    pub fn profile(&self) -> Option<ConnectionProfile> {
        self.inner
            .link
            .lock()
            .as_ref()
            .map(|link| link.profile.as_ref().clone())
    }

    /// Opens the link.
    ///
    /// # Errors
    ///
    /// - `Connection(AlreadyActive)` if the state is not `Disconnected` (state unchanged)
    /// - `Connection(Handshake | TimedOut)` if the driver handshake failed
    /// - `Connection(Aborted)` if a disconnect won the race against the handshake
    pub async fn connect(&self, profile: ConnectionProfile) -> BridgeResult<()> {
        let inner = &self.inner;
        let epoch = inner
            .state
            .enter(&[ConnectionState::Disconnected], ConnectionState::Connecting)
            .map_err(|state| ConnectionError::AlreadyActive { state })?;

        let endpoint = profile.describe();
        tracing::info!(connection_id = %inner.id, endpoint = %endpoint, "Connecting");

        let handshake = tokio::time::timeout(profile.socket_timeout, inner.driver.connect(&profile)).await;
        let handle = match handshake {
            Ok(Ok(handle)) => handle,
            Ok(Err(source)) => {
                self.abort_connect(epoch);
                let error = BridgeError::from(ConnectionError::handshake(endpoint, source));
                error.log("connect");
                return Err(error);
            }
            Err(_) => {
                self.abort_connect(epoch);
                let error = BridgeError::from(ConnectionError::TimedOut {
                    endpoint,
                    timeout: profile.socket_timeout,
                });
                error.log("connect");
                return Err(error);
            }
        };

        let generation = inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let socket_timeout = profile.socket_timeout;
        let prober = CancellationToken::new();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let installed = {
            let mut link = inner.link.lock();
            // Only the CONNECTING phase this call entered may install a link.
            if inner.state.epoch() == (ConnectionState::Connecting, epoch) {
                *link = Some(ActiveLink {
                    handle,
                    generation,
                    profile: Arc::new(profile),
                    prober: prober.clone(),
                    faults: fault_tx,
                });
                inner.sessions.open();
                true
            } else {
                false
            }
        };
        if !installed {
            inner.close_orphan(handle, socket_timeout).await;
            return Err(ConnectionError::Aborted { endpoint }.into());
        }

        tokio::spawn(run_prober(
            Arc::downgrade(inner),
            ProberConfig {
                link: handle,
                generation,
                period: inner.options.liveness_period,
                timeout: inner.options.liveness_timeout,
            },
            prober,
            fault_rx,
        ));

        if inner.state.advance(epoch, ConnectionState::Connected).is_err() {
            // The racing disconnect owns the link now and closes it.
            return Err(ConnectionError::Aborted { endpoint }.into());
        }

        inner.stats.record_connect();
        tracing::info!(connection_id = %inner.id, endpoint = %endpoint, "Connected");
        Ok(())
    }

    fn abort_connect(&self, epoch: u64) {
        let state = &self.inner.state;
        self.inner.stats.record_connect_failure();
        if let Ok(next) = state.advance(epoch, ConnectionState::Disconnecting) {
            let _ = state.advance(next, ConnectionState::Disconnected);
        }
    }

    /// Closes the link.
    ///
    /// Every session is released and every live stream terminates with
    /// `ConnectionError::Closed` before this resolves. Calling it while already disconnected
    /// is a no-op; calling it during a teardown waits for that teardown.
    pub async fn disconnect(&self) -> BridgeResult<()> {
        self.inner.shutdown(DisconnectCause::Operator).await;
        Ok(())
    }

    /// Opens a session.
    ///
    /// # Errors
    ///
    /// - `ConnectionNotReady` unless the state is `Connected`
    /// - `Protocol` if the driver refuses the subscription
    pub async fn create_session(&self, profile: SessionProfile) -> BridgeResult<OpcSession> {
        let inner = &self.inner;
        let (state, epoch) = inner.state.epoch();
        if !state.is_connected() {
            return Err(BridgeError::not_ready(state));
        }
        let (handle, faults, timeout) = {
            let link = inner.link.lock();
            match link.as_ref() {
                Some(link) => (link.handle, link.faults.clone(), link.profile.socket_timeout),
                None => return Err(BridgeError::not_ready(inner.state.current())),
            }
        };

        let requested = profile.refresh_period;
        let subscription = match tokio::time::timeout(
            timeout,
            inner.driver.create_subscription(handle, requested),
        )
        .await
        {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(error)) => return Err(BridgeError::Protocol(error)),
            Err(_) => {
                return Err(BridgeError::Protocol(crate::error::DriverError::timeout(
                    "create_subscription timed out",
                )))
            }
        };

        let id = SessionId(inner.next_session.fetch_add(1, Ordering::SeqCst));
        let session = OpcSession::new(SessionContext {
            id,
            connection_id: inner.id,
            driver: inner.driver.clone(),
            link: handle,
            subscription,
            profile,
            allocator: inner.allocator.clone(),
            faults: FaultReporter::new(faults),
        });

        // Registered under the link lock so a reconnect cannot slip in between the check
        // and the insert.
        let registered = {
            let _link = inner.link.lock();
            if inner.state.epoch() == (ConnectionState::Connected, epoch) {
                inner.sessions.insert(id, session.clone())
            } else {
                Err(session.clone())
            }
        };
        if let Err(session) = registered {
            session.detach(BridgeError::detached(id));
            match tokio::time::timeout(timeout, inner.driver.destroy_subscription(handle, subscription))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::debug!(
                    session_id = %id,
                    error = %error,
                    "Subscription teardown failed"
                ),
                Err(_) => tracing::debug!(session_id = %id, "Subscription teardown timed out"),
            }
            return Err(BridgeError::not_ready(inner.state.current()));
        }

        inner.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            connection_id = %inner.id,
            session_id = %id,
            requested_ms = requested.as_millis() as u64,
            revised_ms = subscription.revised_rate.as_millis() as u64,
            "Session created"
        );
        Ok(session)
    }

    /// Releases a session. Idempotent.
    ///
    /// Live streams of the session terminate with `SessionDetached`.
    pub async fn release_session(&self, session: &OpcSession) -> BridgeResult<()> {
        let inner = &self.inner;
        if session.connection_id() != inner.id {
            return Err(BridgeError::invalid(format!(
                "{} does not belong to {}",
                session.id(),
                inner.id
            )));
        }
        let Some(session) = inner.sessions.remove(session.id()) else {
            return Ok(());
        };

        session.detach(BridgeError::detached(session.id()));
        inner.stats.sessions_released.fetch_add(1, Ordering::Relaxed);

        let link = inner
            .link
            .lock()
            .as_ref()
            .map(|link| (link.handle, link.profile.socket_timeout));
        if let Some((handle, timeout)) = link {
            match tokio::time::timeout(
                timeout,
                inner.driver.destroy_subscription(handle, session.subscription()),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::warn!(
                    session_id = %session.id(),
                    error = %error,
                    "Subscription teardown failed"
                ),
                Err(_) => tracing::warn!(session_id = %session.id(), "Subscription teardown timed out"),
            }
        }

        tracing::info!(connection_id = %inner.id, session_id = %session.id(), "Session released");
        Ok(())
    }

    /// Looks a live session up by id.
    pub fn session(&self, id: SessionId) -> Option<OpcSession> {
        self.inner.sessions.get(id)
    }

    /// Ids of the live sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.sessions.ids()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Lists the children of a node.
    pub async fn browse(&self, root: &str) -> BridgeResult<Vec<BrowseNode>> {
        let state = self.inner.state.current();
        let link = self
            .inner
            .link
            .lock()
            .as_ref()
            .map(|link| (link.handle, link.profile.socket_timeout));
        let (handle, timeout) = match link {
            Some(link) if state.is_connected() => link,
            _ => return Err(BridgeError::not_ready(state)),
        };

        match tokio::time::timeout(timeout, self.inner.driver.browse(handle, root)).await {
            Ok(result) => result.map_err(BridgeError::Protocol),
            Err(_) => Err(BridgeError::Protocol(crate::error::DriverError::timeout(
                "browse timed out",
            ))),
        }
    }
}

impl std::fmt::Debug for OpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcConnection")
            .field("id", &self.inner.id)
            .field("driver", &self.inner.driver.name())
            .field("state", &self.state())
            .field("sessions", &self.session_count())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
