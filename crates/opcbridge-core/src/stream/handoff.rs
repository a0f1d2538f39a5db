// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Latest-wins hand-off from a pipeline task to its consumer.
//!
//! The mailbox holds at most one undelivered sample. Publishing replaces it, so a consumer
//! that falls behind reads the newest emitted value, never a queued older one. A terminal
//! error is delivered after the last sample. The bounded `()` channel only carries wake-ups;
//! a wake-up that finds the mailbox empty is skipped.

use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{BridgeError, BridgeResult};
use crate::session::SessionStats;
use crate::types::OpcData;

#[derive(Debug, Default)]
struct Mailbox {
    latest: Option<OpcData>,
    terminal: Option<BridgeError>,
}

/// Creates a connected sender/receiver pair.
///
/// Delivered samples are counted on `stats` when given.
pub(crate) fn mailbox(stats: Option<Arc<SessionStats>>) -> (MailboxSender, MailboxReceiver) {
    let shared = Arc::new(Mutex::new(Mailbox::default()));
    let (wake_tx, wake_rx) = mpsc::channel(1);
    (
        MailboxSender {
            shared: shared.clone(),
            wake: wake_tx,
        },
        MailboxReceiver {
            shared,
            wake: wake_rx,
            stats,
        },
    )
}

// =============================================================================
// Sender
// =============================================================================

#[derive(Debug)]
pub(crate) struct MailboxSender {
    shared: Arc<Mutex<Mailbox>>,
    wake: mpsc::Sender<()>,
}

impl MailboxSender {
    /// Replaces the undelivered sample, if any. Returns `false` once the receiver is gone.
    pub(crate) fn publish(&self, sample: OpcData) -> bool {
        if self.wake.is_closed() {
            return false;
        }
        self.shared.lock().latest = Some(sample);
        self.notify();
        true
    }

    /// Queues the terminal error behind the undelivered sample and closes the mailbox.
    pub(crate) fn finish(self, error: BridgeError) {
        self.shared.lock().terminal = Some(error);
        self.notify();
    }

    fn notify(&self) {
        // A full buffer already holds a pending wake-up.
        let _ = self.wake.try_send(());
    }
}

// =============================================================================
// Receiver
// =============================================================================

#[derive(Debug)]
pub(crate) struct MailboxReceiver {
    shared: Arc<Mutex<Mailbox>>,
    wake: mpsc::Receiver<()>,
    stats: Option<Arc<SessionStats>>,
}

impl MailboxReceiver {
    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<BridgeResult<OpcData>>> {
        loop {
            if let Some(item) = self.take() {
                return Poll::Ready(Some(item));
            }
            match self.wake.poll_recv(cx) {
                Poll::Ready(Some(())) => continue,
                Poll::Ready(None) => return Poll::Ready(self.take()),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    pub(crate) async fn recv(&mut self) -> Option<BridgeResult<OpcData>> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Stops accepting samples. Anything undelivered is discarded.
    pub(crate) fn close(&mut self) {
        self.wake.close();
        let mut mailbox = self.shared.lock();
        mailbox.latest = None;
        mailbox.terminal = None;
    }

    fn take(&self) -> Option<BridgeResult<OpcData>> {
        let mut mailbox = self.shared.lock();
        if let Some(sample) = mailbox.latest.take() {
            if let Some(stats) = &self.stats {
                stats.record_event();
            }
            return Some(Ok(sample));
        }
        mailbox.terminal.take().map(Err)
    }
}
