// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcbridge-core
//!
//! Connection and session orchestration for OPC servers, independent of the wire protocol.
//!
//! A protocol stack plugs in through the [`ProtocolDriver`] trait. On top of it this crate
//! provides:
//!
//! - **Connection**: the four-state lifecycle with an observable state and a liveness prober
//! - **Session**: batched read/write and per-tag streams over one driver subscription
//! - **Resolver**: the per-session tag handle cache
//! - **Stream**: the ref-counted shared acquisition channel with per-subscriber throttling
//! - **Reconnect**: the auto-reconnect supervisor
//! - **Quality**: reduction of protocol status codes to [`Quality`] and [`OperationStatus`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use opcbridge_core::{ConnectionProfile, OpcConnection, Protocol, SessionProfile};
//!
//! let connection = OpcConnection::new(driver);
//! connection
//!     .connect(ConnectionProfile::builder(Protocol::Ua).host("plc-01").port(4840).build()?)
//!     .await?;
//!
//! let session = connection.create_session(SessionProfile::default()).await?;
//! let mut speed = session.stream("Line1.Speed", Duration::from_millis(500));
//! while let Some(Ok(sample)) = speed.next().await {
//!     println!("{sample}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod profile;
pub mod quality;
pub mod types;

// =============================================================================
// Driver & Lifecycle Modules
// =============================================================================

pub mod connection;
pub mod driver;
pub mod reconnect;
pub mod registry;
pub mod retry;

// =============================================================================
// Session Modules
// =============================================================================

pub mod resolver;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_driver;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use connection::{
    ConnectionState, ConnectionStats, ConnectionStatsSnapshot, OpcConnection, StateObserver,
    StateTransition,
};
pub use driver::{
    Acquisition, LinkHandle, Notification, ProtocolDriver, RawSample, SubscriptionHandle,
};
pub use error::{
    BridgeError, BridgeResult, ConnectionError, DriverError, DriverErrorKind, ErrorCode,
    ErrorSeverity,
};
pub use profile::{
    ConnectionOptions, ConnectionProfile, ConnectionProfileBuilder, Credentials, ReadMode,
    SessionProfile, SessionProfileBuilder,
};
pub use quality::{decoder_for, OperationStatus, Quality, QualityDecoder, StatusLevel};
pub use reconnect::AutoReconnect;
pub use registry::SessionRegistry;
pub use resolver::{ClientHandleAllocator, TagHandleResolver};
pub use retry::{BackoffStrategy, ReconnectPolicy};
pub use session::{OpcSession, SessionStats, SessionStatsSnapshot};
pub use stream::TagStream;
pub use types::{
    BrowseNode, ClientHandle, ConnectionId, Currency, DataType, HandlePair, OpcData, Protocol,
    ServerHandle, ServerState, SessionId, Value,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
