// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Liveness supervision of an established link.
//!
//! One supervisor task per link. It wakes on a fixed period to query the server status
//! and also listens for connection-level faults reported by session channels. Either kind of
//! failure forces a full disconnect of the connection, run on the supervisor's own task.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::ConnectionInner;
use crate::driver::LinkHandle;
use crate::error::DriverError;
use crate::types::SessionId;

// =============================================================================
// Fault reporting
// =============================================================================

/// A connection-level failure observed outside the prober.
#[derive(Debug, Clone)]
pub(crate) struct LinkFault {
    pub(crate) session_id: SessionId,
    pub(crate) error: DriverError,
}

/// Handle sessions use to report connection-level failures to their connection.
#[derive(Debug, Clone)]
pub(crate) struct FaultReporter {
    tx: Option<mpsc::UnboundedSender<LinkFault>>,
}

impl FaultReporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<LinkFault>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A reporter that drops every fault.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { tx: None }
    }

    pub(crate) fn report(&self, session_id: SessionId, error: DriverError) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(LinkFault { session_id, error });
        }
    }
}

// =============================================================================
// Prober
// =============================================================================

/// Why the supervisor gave up on a link.
enum Failure {
    Probe(String),
    Fault(String),
}

pub(crate) struct ProberConfig {
    pub(crate) link: LinkHandle,
    pub(crate) generation: u64,
    pub(crate) period: Duration,
    pub(crate) timeout: Duration,
}

/// Runs until cancelled, the connection is dropped, or a failure forced a disconnect.
pub(crate) async fn run_prober(
    connection: Weak<ConnectionInner>,
    config: ProberConfig,
    cancel: CancellationToken,
    mut faults: mpsc::UnboundedReceiver<LinkFault>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.period, config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let failure = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            Some(fault) = faults.recv() => {
                break Failure::Fault(format!("{} reported: {}", fault.session_id, fault.error));
            }
            _ = ticker.tick() => {
                let Some(inner) = connection.upgrade() else { return };
                let driver = inner.driver.clone();
                drop(inner);

                let probe = tokio::time::timeout(config.timeout, driver.server_status(config.link));
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    outcome = probe => outcome,
                };

                match outcome {
                    Ok(Ok(state)) if state.is_running() => {
                        tracing::trace!(link = config.link.0, "Liveness probe ok");
                    }
                    Ok(Ok(state)) => break Failure::Probe(format!("server state is {}", state)),
                    Ok(Err(error)) => {
                        break Failure::Probe(format!("server status query failed: {}", error))
                    }
                    Err(_) => {
                        break Failure::Probe(format!(
                            "server status query timed out after {:?}",
                            config.timeout
                        ))
                    }
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    let Some(inner) = connection.upgrade() else { return };
    let reason = match failure {
        Failure::Probe(reason) => {
            tracing::warn!(connection_id = %inner.id, reason = %reason, "Liveness check failed, disconnecting");
            inner.stats.record_probe_failure();
            reason
        }
        Failure::Fault(reason) => {
            tracing::warn!(connection_id = %inner.id, reason = %reason, "Link fault reported, disconnecting");
            inner.stats.record_link_fault();
            reason
        }
    };
    inner.force_disconnect(config.generation, reason).await;
}
