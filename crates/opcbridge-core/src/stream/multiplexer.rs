// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The shared acquisition channel of a session.
//!
//! ```text
//!                 ┌──────────────── MuxState (per-session lock) ───────────────┐
//!                 │  tag → { handles, refs }      client handle → tag          │
//!                 └────────────────────────────────────────────────────────────┘
//!                          │ union of ref-counted tags
//!                          ▼
//!   ┌────────────────────────────────────────┐        broadcast<Arc<[OpcData]>>
//!   │ channel task                           │ ──────────────┬──────────────┬─────►
//!   │  Poll: read_batch every revised period │               ▼              ▼
//!   │  Push: forward driver notifications    │          pipeline A     pipeline B
//!   └────────────────────────────────────────┘       (filter/distinct/throttle)
//! ```
//!
//! The channel task runs only while at least one tag is ref-counted. It is started by the
//! first [`TagLease`] and stopped when the last one is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::connection::FaultReporter;
use crate::driver::{Acquisition, LinkHandle, Notification, ProtocolDriver, SubscriptionHandle};
use crate::error::{BridgeError, DriverError};
use crate::profile::ReadMode;
use crate::session::decode::SampleDecoder;
use crate::types::{ClientHandle, HandlePair, OpcData, SessionId};

/// One broadcast unit: the samples of a poll cycle, or a single pushed change.
pub(crate) type SampleBatch = Arc<[OpcData]>;

// =============================================================================
// State
// =============================================================================

struct TagEntry {
    pair: HandlePair,
    refs: usize,
}

#[derive(Default)]
struct MuxState {
    tags: HashMap<String, TagEntry>,
    by_client: HashMap<ClientHandle, String>,
    channel: Option<CancellationToken>,
    starts: u64,
}

pub(crate) struct MuxShared {
    session_id: SessionId,
    driver: Arc<dyn ProtocolDriver>,
    link: LinkHandle,
    subscription: SubscriptionHandle,
    read_mode: ReadMode,
    decoder: SampleDecoder,
    faults: FaultReporter,
    events: broadcast::Sender<SampleBatch>,
    closed: CancellationToken,
    close_reason: Mutex<Option<BridgeError>>,
    state: Mutex<MuxState>,
}

// =============================================================================
// StreamMultiplexer
// =============================================================================

/// Ref-counted fan-out of one shared acquisition channel.
#[derive(Clone)]
pub(crate) struct StreamMultiplexer {
    shared: Arc<MuxShared>,
}

impl StreamMultiplexer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session_id: SessionId,
        driver: Arc<dyn ProtocolDriver>,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        read_mode: ReadMode,
        decoder: SampleDecoder,
        faults: FaultReporter,
        capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(MuxShared {
                session_id,
                driver,
                link,
                subscription,
                read_mode,
                decoder,
                faults,
                events,
                closed: CancellationToken::new(),
                close_reason: Mutex::new(None),
                state: Mutex::new(MuxState::default()),
            }),
        }
    }

    /// Subscribes to the broadcast. Call before [`acquire`](Self::acquire) so no batch
    /// produced for the new tag is missed.
    pub(crate) fn attach(&self) -> broadcast::Receiver<SampleBatch> {
        self.shared.events.subscribe()
    }

    /// Increments the ref-count of a tag and makes sure the channel is running.
    pub(crate) fn acquire(&self, tag: &str, pair: HandlePair) -> Result<TagLease, BridgeError> {
        let mut state = self.shared.state.lock();
        if self.shared.closed.is_cancelled() {
            return Err(self.close_reason());
        }

        let entry = state
            .tags
            .entry(tag.to_string())
            .or_insert(TagEntry { pair, refs: 0 });
        entry.refs += 1;
        let refs = entry.refs;
        state.by_client.insert(pair.client, tag.to_string());

        if state.channel.is_none() {
            let token = self.shared.closed.child_token();
            state.channel = Some(token.clone());
            state.starts += 1;
            tracing::debug!(
                session_id = %self.shared.session_id,
                rate_ms = self.shared.subscription.revised_rate.as_millis() as u64,
                "Starting shared channel"
            );
            tokio::spawn(run_channel(self.shared.clone(), token));
        }

        tracing::trace!(session_id = %self.shared.session_id, tag = tag, refs, "Tag acquired");
        Ok(TagLease {
            shared: self.shared.clone(),
            tag: tag.to_string(),
        })
    }

    /// Current ref-count of a tag.
    pub(crate) fn ref_count(&self, tag: &str) -> usize {
        self.shared
            .state
            .lock()
            .tags
            .get(tag)
            .map_or(0, |entry| entry.refs)
    }

    /// Tags currently in the acquisition set.
    pub(crate) fn active_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.shared.state.lock().tags.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Returns `true` while the channel task is running.
    pub(crate) fn is_running(&self) -> bool {
        self.shared.state.lock().channel.is_some()
    }

    /// Number of times the channel was started.
    pub(crate) fn start_count(&self) -> u64 {
        self.shared.state.lock().starts
    }

    /// Token cancelled when the multiplexer shuts down.
    pub(crate) fn closed(&self) -> CancellationToken {
        self.shared.closed.clone()
    }

    /// Error every stream terminates with after shutdown.
    pub(crate) fn close_reason(&self) -> BridgeError {
        self.shared
            .close_reason
            .lock()
            .clone()
            .unwrap_or_else(|| BridgeError::detached(self.shared.session_id))
    }

    /// Stops the channel and terminates every stream with `reason`.
    pub(crate) fn shutdown(&self, reason: BridgeError) {
        {
            let mut close_reason = self.shared.close_reason.lock();
            if close_reason.is_some() {
                return;
            }
            *close_reason = Some(reason);
        }

        let mut state = self.shared.state.lock();
        state.tags.clear();
        state.by_client.clear();
        if let Some(token) = state.channel.take() {
            token.cancel();
        }
        self.shared.closed.cancel();
    }
}

// =============================================================================
// TagLease
// =============================================================================

/// One reference on a tag. Dropping it decrements the ref-count synchronously.
pub(crate) struct TagLease {
    shared: Arc<MuxShared>,
    tag: String,
}

impl Drop for TagLease {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        let remaining = match state.tags.get_mut(&self.tag) {
            Some(entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs
            }
            None => return,
        };

        if remaining == 0 {
            if let Some(entry) = state.tags.remove(&self.tag) {
                state.by_client.remove(&entry.pair.client);
            }
            tracing::trace!(session_id = %self.shared.session_id, tag = %self.tag, "Tag released");
        }

        if state.tags.is_empty() {
            if let Some(token) = state.channel.take() {
                token.cancel();
                tracing::debug!(session_id = %self.shared.session_id, "Stopping idle shared channel");
            }
        }
    }
}

// =============================================================================
// Channel task
// =============================================================================

async fn run_channel(shared: Arc<MuxShared>, token: CancellationToken) {
    match shared.driver.acquisition() {
        Acquisition::Poll => poll_loop(&shared, &token).await,
        Acquisition::Push => push_loop(&shared, &token).await,
    }
    tracing::trace!(session_id = %shared.session_id, "Shared channel exited");
}

async fn poll_loop(shared: &MuxShared, token: &CancellationToken) {
    let mut ticker = tokio::time::interval(shared.subscription.revised_rate);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let items: Vec<(String, HandlePair)> = {
            let state = shared.state.lock();
            state
                .tags
                .iter()
                .map(|(tag, entry)| (tag.clone(), entry.pair))
                .collect()
        };
        if items.is_empty() {
            continue;
        }
        let handles: Vec<_> = items.iter().map(|(_, pair)| pair.server).collect();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = shared.driver.read_batch(shared.link, shared.subscription, &handles, shared.read_mode) => result,
        };

        match result {
            Ok(samples) if samples.len() == items.len() => {
                if token.is_cancelled() {
                    return;
                }
                let batch: Vec<OpcData> = items
                    .into_iter()
                    .zip(samples)
                    .map(|((tag, _), raw)| shared.decoder.decode(&tag, raw))
                    .collect();
                let _ = shared.events.send(batch.into());
            }
            Ok(samples) => {
                tracing::warn!(
                    session_id = %shared.session_id,
                    expected = items.len(),
                    received = samples.len(),
                    "Driver returned a malformed poll batch"
                );
            }
            Err(error) => handle_channel_error(shared, error),
        }
    }
}

async fn push_loop(shared: &MuxShared, token: &CancellationToken) {
    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        opened = shared.driver.notifications(shared.link, shared.subscription) => opened,
    };
    let mut feed = match opened {
        Ok(feed) => feed,
        Err(error) => {
            handle_channel_error(shared, error);
            return;
        }
    };

    loop {
        let notification = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            notification = feed.recv() => notification,
        };

        match notification {
            Some(Notification { client, sample }) => {
                let tag = shared.state.lock().by_client.get(&client).cloned();
                if let Some(tag) = tag {
                    let data = shared.decoder.decode(&tag, sample);
                    let _ = shared.events.send(Arc::from(vec![data]));
                }
            }
            None => {
                if !token.is_cancelled() {
                    handle_channel_error(shared, DriverError::transport("notification feed closed"));
                }
                return;
            }
        }
    }
}

fn handle_channel_error(shared: &MuxShared, error: DriverError) {
    if error.is_connection_level() {
        tracing::warn!(
            session_id = %shared.session_id,
            error = %error,
            "Shared channel hit a connection-level failure"
        );
        shared.faults.report(shared.session_id, error);
    } else {
        tracing::warn!(
            session_id = %shared.session_id,
            error = %error,
            "Shared channel cycle failed, continuing"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::connection::FaultReporter;
    use crate::profile::SessionProfile;
    use crate::quality::decoder_for;
    use crate::test_driver::TestDriver;
    use crate::types::{Protocol, ServerHandle};

    fn mux(driver: Arc<TestDriver>) -> StreamMultiplexer {
        StreamMultiplexer::new(
            SessionId(1),
            driver,
            LinkHandle(1),
            SubscriptionHandle {
                id: 1,
                revised_rate: Duration::from_millis(100),
            },
            ReadMode::Cache,
            SampleDecoder::new(decoder_for(Protocol::Da), Arc::new(SessionProfile::default())),
            FaultReporter::detached(),
            16,
        )
    }

    fn pair(n: u32) -> HandlePair {
        HandlePair::new(ServerHandle(n), ClientHandle(n))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ref_counting_starts_and_stops_channel() {
        let mux = mux(Arc::new(TestDriver::new()));

        let a = mux.acquire("T1", pair(1)).unwrap();
        let b = mux.acquire("T1", pair(1)).unwrap();
        assert_eq!(mux.ref_count("T1"), 2);
        assert!(mux.is_running());

        drop(a);
        assert_eq!(mux.ref_count("T1"), 1);
        drop(b);
        assert_eq!(mux.ref_count("T1"), 0);
        assert!(!mux.is_running());
        assert!(mux.active_tags().is_empty());

        let _c = mux.acquire("T2", pair(2)).unwrap();
        assert_eq!(mux.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_broadcasts_union() {
        let driver = Arc::new(TestDriver::new());
        let mux = mux(driver.clone());
        let mut events = mux.attach();

        let _a = mux.acquire("T1", pair(1)).unwrap();
        let _b = mux.acquire("T2", pair(2)).unwrap();

        let batch = events.recv().await.unwrap();
        assert!(!batch.is_empty());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(driver.read_calls() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_and_clears() {
        let mux = mux(Arc::new(TestDriver::new()));
        let lease = mux.acquire("T1", pair(1)).unwrap();

        mux.shutdown(BridgeError::detached(SessionId(1)));
        assert!(mux.closed().is_cancelled());
        assert_eq!(mux.ref_count("T1"), 0);
        assert!(matches!(
            mux.acquire("T1", pair(1)),
            Err(BridgeError::SessionDetached { .. })
        ));

        // A late lease drop must not underflow anything.
        drop(lease);
        assert_eq!(mux.ref_count("T1"), 0);
    }
}
