// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-tag value streams.
//!
//! A [`TagStream`] is backed by one pipeline task:
//!
//! ```text
//! resolve ─► attach + acquire lease ─► filter(tag) ─► distinct ─► latest-wins throttle ─► mailbox
//! ```
//!
//! The consumer side holds the tag lease, so dropping or cancelling a stream decrements the
//! tag's ref-count immediately, without waiting for the pipeline task to notice. The mailbox
//! keeps only the newest emitted sample, so a slow consumer skips stale values.

mod filter;
mod handoff;
pub(crate) mod multiplexer;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, BridgeResult};
use crate::resolver::TagHandleResolver;
use crate::session::SessionStats;
use crate::types::OpcData;
use filter::{DistinctUntilChanged, LatestThrottle};
use handoff::{mailbox, MailboxReceiver, MailboxSender};
use multiplexer::{StreamMultiplexer, TagLease};

// =============================================================================
// TagStream
// =============================================================================

#[derive(Default)]
struct LeaseSlot {
    lease: Option<TagLease>,
    cancelled: bool,
}

impl LeaseSlot {
    fn release(slot: &Mutex<LeaseSlot>) {
        let lease = {
            let mut slot = slot.lock();
            slot.cancelled = true;
            slot.lease.take()
        };
        drop(lease);
    }
}

/// A stream of value changes of one tag.
///
/// Yields `Ok(OpcData)` for every delivered change. A terminal `Err` is yielded once when
/// the stream ends for a reason other than the caller cancelling it (resolution failure,
/// session released, connection lost or closed); after that, and after [`cancel`](Self::cancel),
/// the stream yields `None`. Streams are not restartable.
pub struct TagStream {
    tag: String,
    rx: MailboxReceiver,
    token: CancellationToken,
    slot: Arc<Mutex<LeaseSlot>>,
    terminated: bool,
}

impl TagStream {
    /// The tag this stream follows.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Waits for the next item.
    pub async fn next(&mut self) -> Option<BridgeResult<OpcData>> {
        if self.terminated {
            return None;
        }
        let item = self.rx.recv().await;
        if !matches!(item, Some(Ok(_))) {
            self.terminated = true;
        }
        item
    }

    /// Stops the stream and releases its tag reference before returning.
    pub fn cancel(&mut self) {
        LeaseSlot::release(&self.slot);
        self.token.cancel();
        self.rx.close();
        self.terminated = true;
    }

    /// Returns `true` once the stream yielded its last item or was cancelled.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn failed(tag: String, error: BridgeError) -> Self {
        let (tx, rx) = mailbox(None);
        tx.finish(error);
        Self {
            tag,
            rx,
            token: CancellationToken::new(),
            slot: Arc::default(),
            terminated: false,
        }
    }
}

impl futures::Stream for TagStream {
    type Item = BridgeResult<OpcData>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(item) = &polled {
            if !matches!(item, Some(Ok(_))) {
                self.terminated = true;
            }
        }
        polled
    }
}

impl Drop for TagStream {
    fn drop(&mut self) {
        LeaseSlot::release(&self.slot);
        self.token.cancel();
    }
}

impl std::fmt::Debug for TagStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagStream")
            .field("tag", &self.tag)
            .field("terminated", &self.terminated)
            .finish()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// What a session hands to a new stream.
#[derive(Clone)]
pub(crate) struct StreamContext {
    pub(crate) resolver: Arc<TagHandleResolver>,
    pub(crate) mux: StreamMultiplexer,
    pub(crate) stats: Arc<SessionStats>,
}

/// Starts a stream. Must be called within a tokio runtime.
pub(crate) fn open(context: StreamContext, tag: &str, interval: Duration) -> TagStream {
    if interval.is_zero() {
        return TagStream::failed(
            tag.to_string(),
            BridgeError::invalid("stream interval must be greater than zero"),
        );
    }

    let (tx, rx) = mailbox(Some(context.stats.clone()));
    let token = CancellationToken::new();
    let slot = Arc::new(Mutex::new(LeaseSlot::default()));

    context.stats.record_stream_opened();
    tokio::spawn(run_pipeline(
        context,
        tag.to_string(),
        interval,
        slot.clone(),
        token.clone(),
        tx,
    ));

    TagStream {
        tag: tag.to_string(),
        rx,
        token,
        slot,
        terminated: false,
    }
}

async fn run_pipeline(
    context: StreamContext,
    tag: String,
    interval: Duration,
    slot: Arc<Mutex<LeaseSlot>>,
    token: CancellationToken,
    tx: MailboxSender,
) {
    let resolved = tokio::select! {
        biased;
        _ = token.cancelled() => return,
        resolved = context.resolver.resolve(&tag) => resolved,
    };
    let pair = match resolved {
        Ok(pair) => pair,
        Err(error) => {
            tx.finish(error);
            return;
        }
    };

    let mut events = context.mux.attach();
    let acquired = {
        let mut guard = slot.lock();
        if guard.cancelled {
            return;
        }
        context
            .mux
            .acquire(&tag, pair)
            .map(|lease| guard.lease = Some(lease))
    };
    if let Err(error) = acquired {
        tx.finish(error);
        return;
    }
    tracing::debug!(tag = %tag, interval_ms = interval.as_millis() as u64, "Stream attached");

    let closed = context.mux.closed();
    let mut distinct = DistinctUntilChanged::default();
    let mut throttle = LatestThrottle::new(interval);

    loop {
        let deadline = throttle.deadline();
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = closed.cancelled() => {
                LeaseSlot::release(&slot);
                tx.finish(context.mux.close_reason());
                return;
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(sample) = throttle.flush(Instant::now()) {
                    if !tx.publish(sample) {
                        break;
                    }
                }
            }
            received = events.recv() => match received {
                Ok(batch) => {
                    let mut due = None;
                    for sample in batch.iter().filter(|sample| sample.tag == tag) {
                        if distinct.admit(sample) {
                            due = throttle.offer(sample.clone(), Instant::now()).or(due);
                        }
                    }
                    if let Some(sample) = due {
                        if !tx.publish(sample) {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(tag = %tag, skipped, "Stream lagged behind the shared channel");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    LeaseSlot::release(&slot);
    tracing::debug!(tag = %tag, "Stream detached");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::FaultReporter;
    use crate::driver::{LinkHandle, SubscriptionHandle};
    use crate::profile::{ReadMode, SessionProfile};
    use crate::quality::decoder_for;
    use crate::resolver::ClientHandleAllocator;
    use crate::session::decode::SampleDecoder;
    use crate::test_driver::TestDriver;
    use crate::types::{Protocol, SessionId, Value};

    fn context(driver: Arc<TestDriver>) -> StreamContext {
        let subscription = SubscriptionHandle {
            id: 1,
            revised_rate: Duration::from_millis(100),
        };
        StreamContext {
            resolver: Arc::new(TagHandleResolver::new(
                SessionId(1),
                driver.clone(),
                LinkHandle(1),
                subscription,
                Arc::new(ClientHandleAllocator::new()),
            )),
            mux: StreamMultiplexer::new(
                SessionId(1),
                driver,
                LinkHandle(1),
                subscription,
                ReadMode::Cache,
                SampleDecoder::new(decoder_for(Protocol::Da), Arc::new(SessionProfile::default())),
                FaultReporter::detached(),
                16,
            ),
            stats: Arc::new(SessionStats::default()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_delivers_changes_only() {
        let driver = Arc::new(TestDriver::new());
        driver.set_value("T1", 1);
        let ctx = context(driver.clone());
        let mut stream = open(ctx.clone(), "T1", Duration::from_millis(10));

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.value, Value::Int32(1));

        driver.set_value("T1", 2);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.value, Value::Int32(2));
        assert_eq!(ctx.mux.ref_count("T1"), 1);

        stream.cancel();
        assert_eq!(ctx.mux.ref_count("T1"), 0);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tag_fails_without_lease() {
        let driver = Arc::new(TestDriver::new());
        driver.reject_tag("Nope");
        let ctx = context(driver);
        let mut stream = open(ctx.clone(), "Nope", Duration::from_millis(10));

        assert!(matches!(
            stream.next().await,
            Some(Err(BridgeError::TagResolution { .. }))
        ));
        assert!(stream.next().await.is_none());
        assert!(!ctx.mux.is_running());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let ctx = context(Arc::new(TestDriver::new()));
        let mut stream = open(ctx, "T1", Duration::ZERO);
        assert!(matches!(
            stream.next().await,
            Some(Err(BridgeError::InvalidArgument(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_terminates_with_reason() {
        let driver = Arc::new(TestDriver::new());
        driver.set_value("T1", 1);
        let ctx = context(driver);
        let mut stream = open(ctx.clone(), "T1", Duration::from_millis(10));
        stream.next().await.unwrap().unwrap();

        ctx.mux.shutdown(BridgeError::detached(SessionId(1)));
        assert!(matches!(
            stream.next().await,
            Some(Err(BridgeError::SessionDetached { .. }))
        ));
        assert!(stream.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_acquisition_forwards_notifications() {
        let driver = Arc::new(TestDriver::with_acquisition(crate::driver::Acquisition::Push));
        let ctx = context(driver.clone());
        let mut stream = open(ctx.clone(), "T1", Duration::from_millis(10));

        // Let the pipeline register the tag and open the feed.
        while !ctx.mux.is_running() {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        driver.push("T1", 5);
        let sample = stream.next().await.unwrap().unwrap();
        assert_eq!(sample.value, Value::Int32(5));
        assert_eq!(driver.read_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_lease() {
        let driver = Arc::new(TestDriver::new());
        driver.set_value("T1", 1);
        let ctx = context(driver);
        let mut a = open(ctx.clone(), "T1", Duration::from_millis(10));
        let mut b = open(ctx.clone(), "T1", Duration::from_millis(10));
        a.next().await.unwrap().unwrap();
        b.next().await.unwrap().unwrap();
        assert_eq!(ctx.mux.ref_count("T1"), 2);

        drop(a);
        assert_eq!(ctx.mux.ref_count("T1"), 1);
        drop(b);
        assert_eq!(ctx.mux.ref_count("T1"), 0);
        assert!(!ctx.mux.is_running());
    }
}
