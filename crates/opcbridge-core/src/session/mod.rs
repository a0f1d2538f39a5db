// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Sessions: batched read/write and streaming over one driver subscription.
//!
//! A session knows its connection only by id. The connection owns the session in its
//! registry and detaches it on release or disconnect; a detached session fails every
//! operation with [`BridgeError::SessionDetached`].

pub(crate) mod decode;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::FaultReporter;
use crate::driver::{LinkHandle, ProtocolDriver, SubscriptionHandle};
use crate::error::{BridgeError, BridgeResult, DriverError};
use crate::profile::SessionProfile;
use crate::quality::{decoder_for, OperationStatus};
use crate::resolver::{ClientHandleAllocator, TagHandleResolver};
use crate::stream::multiplexer::StreamMultiplexer;
use crate::stream::{self, StreamContext, TagStream};
use crate::types::{ConnectionId, HandlePair, OpcData, SessionId, Value};
use decode::SampleDecoder;

// =============================================================================
// SessionStats
// =============================================================================

/// Counters of one session.
#[derive(Debug, Default)]
pub struct SessionStats {
    reads: AtomicU64,
    read_failures: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
    streams_opened: AtomicU64,
    events_delivered: AtomicU64,
}

impl SessionStats {
    pub(crate) fn record_stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializable copy of a session's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStatsSnapshot {
    /// Completed batched reads.
    pub reads: u64,
    /// Batched reads that failed as a whole.
    pub read_failures: u64,
    /// Completed batched writes.
    pub writes: u64,
    /// Batched writes that failed as a whole.
    pub write_failures: u64,
    /// Streams opened.
    pub streams_opened: u64,
    /// Samples delivered to stream consumers.
    pub events_delivered: u64,
    /// Tags registered with the driver.
    pub resolutions: u64,
    /// Failed tag registrations.
    pub resolution_failures: u64,
}

// =============================================================================
// OpcSession
// =============================================================================

/// Everything a connection hands to a new session.
pub(crate) struct SessionContext {
    pub(crate) id: SessionId,
    pub(crate) connection_id: ConnectionId,
    pub(crate) driver: Arc<dyn ProtocolDriver>,
    pub(crate) link: LinkHandle,
    pub(crate) subscription: SubscriptionHandle,
    pub(crate) profile: SessionProfile,
    pub(crate) allocator: Arc<ClientHandleAllocator>,
    pub(crate) faults: FaultReporter,
}

struct SessionInner {
    id: SessionId,
    connection_id: ConnectionId,
    driver: Arc<dyn ProtocolDriver>,
    link: LinkHandle,
    subscription: SubscriptionHandle,
    profile: Arc<SessionProfile>,
    resolver: Arc<TagHandleResolver>,
    decoder: SampleDecoder,
    mux: StreamMultiplexer,
    faults: FaultReporter,
    detached: AtomicBool,
    stats: Arc<SessionStats>,
}

/// A session bound to one connection.
///
/// Cloning is cheap; all clones refer to the same session.
#[derive(Clone)]
pub struct OpcSession {
    inner: Arc<SessionInner>,
}

impl OpcSession {
    pub(crate) fn new(context: SessionContext) -> Self {
        let profile = Arc::new(context.profile);
        let decoder = SampleDecoder::new(decoder_for(context.driver.protocol()), profile.clone());
        let resolver = Arc::new(TagHandleResolver::new(
            context.id,
            context.driver.clone(),
            context.link,
            context.subscription,
            context.allocator,
        ));
        let mux = StreamMultiplexer::new(
            context.id,
            context.driver.clone(),
            context.link,
            context.subscription,
            profile.read_mode,
            decoder.clone(),
            context.faults.clone(),
            profile.stream_buffer,
        );

        Self {
            inner: Arc::new(SessionInner {
                id: context.id,
                connection_id: context.connection_id,
                driver: context.driver,
                link: context.link,
                subscription: context.subscription,
                profile,
                resolver,
                decoder,
                mux,
                faults: context.faults,
                detached: AtomicBool::new(false),
                stats: Arc::new(SessionStats::default()),
            }),
        }
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Id of the owning connection.
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    /// The profile the session was created with.
    pub fn profile(&self) -> &SessionProfile {
        &self.inner.profile
    }

    /// Refresh period granted by the driver.
    pub fn revised_rate(&self) -> Duration {
        self.inner.subscription.revised_rate
    }

    pub(crate) fn subscription(&self) -> SubscriptionHandle {
        self.inner.subscription
    }

    /// Returns `true` once the session was released or its connection went away.
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Detaches the session. The first reason wins and is what live streams end with.
    pub(crate) fn detach(&self, reason: BridgeError) {
        if self.inner.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.resolver.invalidate();
        self.inner.mux.shutdown(reason);
        tracing::debug!(session_id = %self.inner.id, "Session detached");
    }

    fn ensure_attached(&self) -> BridgeResult<()> {
        if self.is_detached() {
            Err(BridgeError::detached(self.inner.id))
        } else {
            Ok(())
        }
    }

    fn driver_failure(&self, error: DriverError) -> BridgeError {
        if error.is_connection_level() {
            self.inner.faults.report(self.inner.id, error.clone());
        }
        BridgeError::Protocol(error)
    }

    /// Resolves every tag; unresolved ones get their error status in place.
    async fn resolve_batch<S: AsRef<str>>(
        &self,
        tags: &[S],
    ) -> BridgeResult<Vec<Result<HandlePair, OperationStatus>>> {
        let resolved = self.inner.resolver.resolve_all(tags).await;
        let mut out = Vec::with_capacity(resolved.len());
        for result in resolved {
            match result {
                Ok(pair) => out.push(Ok(pair)),
                Err(error @ BridgeError::SessionDetached { .. }) => return Err(error),
                Err(error) => out.push(Err(error.to_status())),
            }
        }
        Ok(out)
    }

    /// Reads several tags in one driver round trip.
    ///
    /// Returns one sample per tag, in input order. A tag that cannot be resolved yields a
    /// sample with an error status instead of failing the call.
    ///
    /// # Errors
    ///
    /// - `SessionDetached` if the session was released
    /// - `Protocol` if the batch read itself failed
    pub async fn read<S: AsRef<str>>(&self, tags: &[S]) -> BridgeResult<Vec<OpcData>> {
        self.ensure_attached()?;
        if tags.is_empty() {
            return Ok(Vec::new());
        }

        let resolved = self.resolve_batch(tags).await?;
        let handles: Vec<_> = resolved
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|pair| pair.server))
            .collect();

        let samples = if handles.is_empty() {
            Vec::new()
        } else {
            let inner = &self.inner;
            let samples = inner
                .driver
                .read_batch(inner.link, inner.subscription, &handles, inner.profile.read_mode)
                .await
                .map_err(|error| {
                    inner.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                    self.driver_failure(error)
                })?;
            if samples.len() != handles.len() {
                inner.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                return Err(BridgeError::Protocol(DriverError::internal(format!(
                    "read returned {} samples for {} items",
                    samples.len(),
                    handles.len()
                ))));
            }
            samples
        };
        self.ensure_attached()?;

        let mut samples = samples.into_iter();
        let data = tags
            .iter()
            .zip(resolved)
            .map(|(tag, resolved)| {
                let tag = tag.as_ref();
                match (resolved, samples.next()) {
                    (Ok(_), Some(raw)) => self.inner.decoder.decode(tag, raw),
                    (Err(status), _) => OpcData::failed(tag, status),
                    (Ok(_), None) => OpcData::failed(tag, OperationStatus::error(0, "missing sample")),
                }
            })
            .collect();

        self.inner.stats.reads.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    /// Reads one tag.
    pub async fn read_one(&self, tag: &str) -> BridgeResult<OpcData> {
        let mut data = self.read(&[tag]).await?;
        data.pop()
            .ok_or_else(|| BridgeError::Protocol(DriverError::internal("empty read result")))
    }

    /// Writes several values in one driver round trip.
    ///
    /// Returns one status per item, in input order, whatever happened to the others.
    ///
    /// # Errors
    ///
    /// - `SessionDetached` if the session was released
    /// - `Protocol` if the batch write itself failed
    pub async fn write(&self, items: &[OpcData]) -> BridgeResult<Vec<OperationStatus>> {
        self.ensure_attached()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let tags: Vec<&str> = items.iter().map(|item| item.tag.as_str()).collect();
        let resolved = self.resolve_batch(&tags).await?;

        // Per item: either a precomputed status or the value to send.
        let prepared: Vec<Result<(HandlePair, Value), OperationStatus>> = items
            .iter()
            .zip(resolved)
            .map(|(item, resolved)| {
                let pair = resolved?;
                let value = self.inner.decoder.encode(&item.tag, &item.value)?;
                Ok((pair, value))
            })
            .collect();

        let batch: Vec<_> = prepared
            .iter()
            .filter_map(|p| p.as_ref().ok().map(|(pair, value)| (pair.server, value.clone())))
            .collect();

        let codes = if batch.is_empty() {
            Vec::new()
        } else {
            let inner = &self.inner;
            let codes = inner
                .driver
                .write_batch(inner.link, inner.subscription, &batch)
                .await
                .map_err(|error| {
                    inner.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    self.driver_failure(error)
                })?;
            if codes.len() != batch.len() {
                inner.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                return Err(BridgeError::Protocol(DriverError::internal(format!(
                    "write returned {} results for {} items",
                    codes.len(),
                    batch.len()
                ))));
            }
            codes
        };
        self.ensure_attached()?;

        let mut codes = codes.into_iter();
        let statuses = prepared
            .into_iter()
            .map(|prepared| match (prepared, codes.next()) {
                (Ok(_), Some(code)) => self.inner.decoder.write_status(code),
                (Err(status), _) => status,
                (Ok(_), None) => OperationStatus::error(0, "missing write result"),
            })
            .collect();

        self.inner.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(statuses)
    }

    /// Writes one value.
    ///
    /// # Errors
    ///
    /// `Write` if the server rejected the value, plus everything [`write`](Self::write) returns.
    pub async fn write_value(&self, tag: &str, value: impl Into<Value>) -> BridgeResult<OperationStatus> {
        let mut statuses = self.write(&[OpcData::new(tag, value)]).await?;
        let status = statuses
            .pop()
            .ok_or_else(|| BridgeError::Protocol(DriverError::internal("empty write result")))?;
        if status.is_error() {
            return Err(BridgeError::write(tag, status));
        }
        Ok(status)
    }

    /// Follows the value changes of a tag, at most one per `interval`.
    ///
    /// Returns immediately; failures arrive through the stream. Must be called within a
    /// tokio runtime.
    pub fn stream(&self, tag: &str, interval: Duration) -> TagStream {
        stream::open(
            StreamContext {
                resolver: self.inner.resolver.clone(),
                mux: self.inner.mux.clone(),
                stats: self.inner.stats.clone(),
            },
            tag,
            interval,
        )
    }

    /// Number of live streams on a tag.
    pub fn ref_count(&self, tag: &str) -> usize {
        self.inner.mux.ref_count(tag)
    }

    /// Tags currently acquired by the shared channel.
    pub fn active_tags(&self) -> Vec<String> {
        self.inner.mux.active_tags()
    }

    /// Returns `true` while the shared channel runs.
    pub fn is_channel_running(&self) -> bool {
        self.inner.mux.is_running()
    }

    /// Number of times the shared channel was started.
    pub fn channel_starts(&self) -> u64 {
        self.inner.mux.start_count()
    }

    /// Returns the cached handle pair of a tag.
    pub fn cached_handles(&self, tag: &str) -> Option<HandlePair> {
        self.inner.resolver.cached(tag)
    }

    /// Resolves a tag without reading it.
    pub async fn resolve(&self, tag: &str) -> BridgeResult<HandlePair> {
        self.ensure_attached()?;
        self.inner.resolver.resolve(tag).await
    }

    /// Returns the counters.
    pub fn stats(&self) -> SessionStatsSnapshot {
        let stats = &self.inner.stats;
        SessionStatsSnapshot {
            reads: stats.reads.load(Ordering::Relaxed),
            read_failures: stats.read_failures.load(Ordering::Relaxed),
            writes: stats.writes.load(Ordering::Relaxed),
            write_failures: stats.write_failures.load(Ordering::Relaxed),
            streams_opened: stats.streams_opened.load(Ordering::Relaxed),
            events_delivered: stats.events_delivered.load(Ordering::Relaxed),
            resolutions: self.inner.resolver.resolution_count(),
            resolution_failures: self.inner.resolver.failure_count(),
        }
    }
}

impl std::fmt::Debug for OpcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpcSession")
            .field("id", &self.inner.id)
            .field("connection_id", &self.inner.connection_id)
            .field("revised_rate", &self.inner.subscription.revised_rate)
            .field("detached", &self.is_detached())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{Quality, StatusLevel};
    use crate::test_driver::TestDriver;
    use crate::types::DataType;

    fn session_with(driver: Arc<TestDriver>, profile: SessionProfile) -> OpcSession {
        OpcSession::new(SessionContext {
            id: SessionId(7),
            connection_id: ConnectionId::new(),
            driver,
            link: LinkHandle(1),
            subscription: SubscriptionHandle {
                id: 1,
                revised_rate: Duration::from_millis(100),
            },
            profile,
            allocator: Arc::new(ClientHandleAllocator::new()),
            faults: FaultReporter::detached(),
        })
    }

    fn session(driver: Arc<TestDriver>) -> OpcSession {
        session_with(driver, SessionProfile::default())
    }

    #[tokio::test]
    async fn test_read_preserves_order_with_partial_failure() {
        let driver = Arc::new(TestDriver::new());
        driver.set_value("A", 1);
        driver.set_value("C", 3);
        driver.reject_tag("B");
        let session = session(driver);

        let data = session.read(&["A", "B", "C"]).await.unwrap();
        let tags: Vec<_> = data.iter().map(|d| d.tag.as_str()).collect();
        assert_eq!(tags, vec!["A", "B", "C"]);
        assert_eq!(data[0].value, Value::Int32(1));
        assert!(data[1].status.is_error());
        assert_eq!(data[1].quality, Quality::Bad);
        assert_eq!(data[2].value, Value::Int32(3));
    }

    #[tokio::test]
    async fn test_read_reports_item_quality() {
        let driver = Arc::new(TestDriver::new());
        driver.set_value_with_quality("Level", 17, 0x44);
        let session = session(driver);

        let data = session.read_one("Level").await.unwrap();
        assert_eq!(data.quality, Quality::Uncertain);
        assert_eq!(data.status.level, StatusLevel::Warning);
        assert_eq!(data.value, Value::Int32(17));
    }

    #[tokio::test]
    async fn test_read_batch_failure_fails_call() {
        let driver = Arc::new(TestDriver::new());
        driver.fail_reads(Some(DriverError::rejected("group inactive")));
        let session = session(driver);

        assert!(matches!(
            session.read(&["A"]).await,
            Err(BridgeError::Protocol(_))
        ));
        assert_eq!(session.stats().read_failures, 1);
    }

    #[tokio::test]
    async fn test_write_statuses_in_order() {
        let driver = Arc::new(TestDriver::new());
        driver.set_write_result("B", 0xC004_0008);
        driver.reject_tag("C");
        let session = session(driver);

        let statuses = session
            .write(&[
                OpcData::new("A", 1),
                OpcData::new("B", 2),
                OpcData::new("C", 3),
            ])
            .await
            .unwrap();
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0].level, StatusLevel::Info);
        assert!(statuses[1].is_error());
        assert!(statuses[2].is_error());
    }

    #[tokio::test]
    async fn test_write_value_rejection() {
        let driver = Arc::new(TestDriver::new());
        driver.set_write_result("Locked", 0xC004_0008);
        let session = session(driver);

        assert!(session.write_value("Free", 5).await.is_ok());
        assert!(matches!(
            session.write_value("Locked", 5).await,
            Err(BridgeError::Write { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_applies_override() {
        let driver = Arc::new(TestDriver::new());
        let profile = SessionProfile::builder()
            .type_override("Mode", DataType::Int16)
            .build()
            .unwrap();
        let session = session_with(driver, profile);

        let statuses = session
            .write(&[OpcData::new("Mode", "not a number")])
            .await
            .unwrap();
        assert!(statuses[0].is_error());
    }

    #[tokio::test]
    async fn test_detached_session_fails() {
        let session = session(Arc::new(TestDriver::new()));
        session.detach(BridgeError::detached(session.id()));

        assert!(session.is_detached());
        assert!(matches!(
            session.read(&["A"]).await,
            Err(BridgeError::SessionDetached { .. })
        ));
        assert!(matches!(
            session.write(&[OpcData::new("A", 1)]).await,
            Err(BridgeError::SessionDetached { .. })
        ));
        let mut stream = session.stream("A", Duration::from_millis(10));
        assert!(matches!(
            stream.next().await,
            Some(Err(BridgeError::SessionDetached { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_batches() {
        let session = session(Arc::new(TestDriver::new()));
        assert!(session.read::<&str>(&[]).await.unwrap().is_empty());
        assert!(session.write(&[]).await.unwrap().is_empty());
    }
}
