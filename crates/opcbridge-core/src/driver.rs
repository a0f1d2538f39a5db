// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol driver abstraction.
//!
//! A driver wraps the raw primitives of one protocol stack. The engine only ever talks to
//! `dyn ProtocolDriver`, so both protocol families look the same from above:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 OpcConnection / OpcSession                   │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ Arc<dyn ProtocolDriver>
//!          ┌─────────────────────┴─────────────────────┐
//!          ▼                                           ▼
//!   legacy driver (Poll)                        session driver (Push)
//!   group + items + cache reads                 subscription + monitored items
//! ```
//!
//! Drivers are internally synchronized; every primitive takes `&self`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DriverError;
use crate::profile::{ConnectionProfile, ReadMode};
use crate::types::{BrowseNode, ClientHandle, Protocol, ServerHandle, ServerState, Value};

// =============================================================================
// Handles
// =============================================================================

/// Driver handle of an established link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkHandle(pub u64);

/// Driver handle of a subscription (modern protocol) or group (legacy protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    /// Driver assigned id.
    pub id: u32,
    /// Rate granted by the server, never below the requested one.
    pub revised_rate: Duration,
}

/// How a driver surfaces value changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    /// The engine reads the active items every revised period.
    #[default]
    Poll,
    /// The driver pushes change notifications for monitored items.
    Push,
}

// =============================================================================
// Samples
// =============================================================================

/// One value as returned by `read_batch`, positionally matched to the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Normalized value.
    pub value: Value,
    /// Raw protocol quality / status code.
    pub quality: u32,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
}

impl RawSample {
    /// Creates a sample.
    pub fn new(value: impl Into<Value>, quality: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            quality,
            timestamp,
        }
    }
}

/// A pushed change of a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Client handle the item was added with.
    pub client: ClientHandle,
    /// The new value.
    pub sample: RawSample,
}

// =============================================================================
// ProtocolDriver
// =============================================================================

/// Primitives consumed from a protocol stack.
///
/// Batched primitives must return exactly one entry per requested item, in request order.
#[async_trait]
pub trait ProtocolDriver: Send + Sync + 'static {
    /// Returns the driver name.
    fn name(&self) -> &str;

    /// Returns the protocol family.
    fn protocol(&self) -> Protocol;

    /// Returns how value changes are acquired.
    fn acquisition(&self) -> Acquisition {
        Acquisition::Poll
    }

    /// Performs the handshake.
    async fn connect(&self, profile: &ConnectionProfile) -> Result<LinkHandle, DriverError>;

    /// Closes the link.
    async fn disconnect(&self, link: LinkHandle) -> Result<(), DriverError>;

    /// Queries the server state.
    async fn server_status(&self, link: LinkHandle) -> Result<ServerState, DriverError>;

    /// Allocates a subscription or group.
    async fn create_subscription(
        &self,
        link: LinkHandle,
        requested_rate: Duration,
    ) -> Result<SubscriptionHandle, DriverError>;

    /// Tears down a subscription or group.
    async fn destroy_subscription(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
    ) -> Result<(), DriverError>;

    /// Registers a tag with the subscription.
    async fn add_item(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        tag: &str,
        client: ClientHandle,
    ) -> Result<ServerHandle, DriverError>;

    /// Reads registered items.
    async fn read_batch(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        items: &[ServerHandle],
        mode: ReadMode,
    ) -> Result<Vec<RawSample>, DriverError>;

    /// Writes registered items. Returns one raw result code per item.
    async fn write_batch(
        &self,
        link: LinkHandle,
        subscription: SubscriptionHandle,
        items: &[(ServerHandle, Value)],
    ) -> Result<Vec<u32>, DriverError>;

    /// Opens the change feed of a subscription.
    ///
    /// Only called for drivers reporting [`Acquisition::Push`]. May be called again after the
    /// previous receiver was dropped.
    async fn notifications(
        &self,
        _link: LinkHandle,
        _subscription: SubscriptionHandle,
    ) -> Result<mpsc::Receiver<Notification>, DriverError> {
        Err(DriverError::unsupported(format!(
            "{} does not push notifications",
            self.name()
        )))
    }

    /// Lists the children of a node.
    async fn browse(&self, link: LinkHandle, root: &str) -> Result<Vec<BrowseNode>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverErrorKind;

    struct NullDriver;

    #[async_trait]
    impl ProtocolDriver for NullDriver {
        fn name(&self) -> &str {
            "null"
        }

        fn protocol(&self) -> Protocol {
            Protocol::Da
        }

        async fn connect(&self, _: &ConnectionProfile) -> Result<LinkHandle, DriverError> {
            Ok(LinkHandle(1))
        }

        async fn disconnect(&self, _: LinkHandle) -> Result<(), DriverError> {
            Ok(())
        }

        async fn server_status(&self, _: LinkHandle) -> Result<ServerState, DriverError> {
            Ok(ServerState::Running)
        }

        async fn create_subscription(
            &self,
            _: LinkHandle,
            requested_rate: Duration,
        ) -> Result<SubscriptionHandle, DriverError> {
            Ok(SubscriptionHandle {
                id: 1,
                revised_rate: requested_rate,
            })
        }

        async fn destroy_subscription(
            &self,
            _: LinkHandle,
            _: SubscriptionHandle,
        ) -> Result<(), DriverError> {
            Ok(())
        }

        async fn add_item(
            &self,
            _: LinkHandle,
            _: SubscriptionHandle,
            _: &str,
            client: ClientHandle,
        ) -> Result<ServerHandle, DriverError> {
            Ok(ServerHandle(client.0 + 100))
        }

        async fn read_batch(
            &self,
            _: LinkHandle,
            _: SubscriptionHandle,
            items: &[ServerHandle],
            _: ReadMode,
        ) -> Result<Vec<RawSample>, DriverError> {
            Ok(items
                .iter()
                .map(|h| RawSample::new(h.0, 0xC0, Utc::now()))
                .collect())
        }

        async fn write_batch(
            &self,
            _: LinkHandle,
            _: SubscriptionHandle,
            items: &[(ServerHandle, Value)],
        ) -> Result<Vec<u32>, DriverError> {
            Ok(vec![0; items.len()])
        }

        async fn browse(&self, _: LinkHandle, _: &str) -> Result<Vec<BrowseNode>, DriverError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_defaults() {
        let driver = NullDriver;
        assert_eq!(driver.acquisition(), Acquisition::Poll);

        let sub = driver
            .create_subscription(LinkHandle(1), Duration::from_millis(250))
            .await
            .unwrap();
        let err = driver.notifications(LinkHandle(1), sub).await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn test_object_safety() {
        let driver: std::sync::Arc<dyn ProtocolDriver> = std::sync::Arc::new(NullDriver);
        let samples = driver
            .read_batch(
                LinkHandle(1),
                SubscriptionHandle {
                    id: 1,
                    revised_rate: Duration::from_secs(1),
                },
                &[ServerHandle(5), ServerHandle(6)],
                ReadMode::Cache,
            )
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].value, Value::UInt32(6));
    }
}
