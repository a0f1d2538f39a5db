// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! A [`MockDriver`] wired into an [`OpcConnection`] with fast liveness probing, plus helpers
//! to open sessions and bound waits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opcbridge_core::{
    Acquisition, AutoReconnect, ConnectionOptions, ConnectionProfile, OpcConnection,
    OpcSession, Protocol, ReconnectPolicy, SessionProfile,
};

use super::fixtures::ProfileFixtures;
use super::mocks::MockDriver;

/// Upper bound for any single wait in the helpers.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the test harness.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Protocol of the mock driver and the profile.
    pub protocol: Protocol,
    /// Acquisition mode of the mock driver.
    pub acquisition: Acquisition,
    /// Smallest rate the mock driver grants.
    pub min_rate: Duration,
    /// Connection options (liveness).
    pub options: ConnectionOptions,
    /// Refresh period of sessions opened by [`TestHarness::session`].
    pub refresh_period: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Da,
            acquisition: Acquisition::Poll,
            min_rate: Duration::from_millis(1),
            options: ProfileFixtures::fast_options(),
            refresh_period: Duration::from_millis(100),
        }
    }
}

impl HarnessConfig {
    /// A pushing modern-protocol setup.
    pub fn push() -> Self {
        Self {
            protocol: Protocol::Ua,
            acquisition: Acquisition::Push,
            ..Default::default()
        }
    }

    /// Sets the session refresh period.
    pub fn refresh_period(mut self, period: Duration) -> Self {
        self.refresh_period = period;
        self
    }

    /// Sets the smallest rate the driver grants.
    pub fn min_rate(mut self, rate: Duration) -> Self {
        self.min_rate = rate;
        self
    }

    /// Sets the connection options.
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A connection over a [`MockDriver`].
pub struct TestHarness {
    /// The scripted driver.
    pub driver: Arc<MockDriver>,
    /// The connection under test.
    pub connection: OpcConnection,
    /// Configuration used to build this harness.
    pub config: HarnessConfig,
}

impl TestHarness {
    /// Builds a disconnected harness.
    pub fn new(config: HarnessConfig) -> Self {
        let driver = Arc::new(
            MockDriver::with_protocol(config.protocol, config.acquisition).with_min_rate(config.min_rate),
        );
        let connection = OpcConnection::with_options(driver.clone(), config.options.clone());
        Self {
            driver,
            connection,
            config,
        }
    }

    /// Builds a harness and connects it.
    pub async fn connected(config: HarnessConfig) -> Self {
        let harness = Self::new(config);
        harness
            .connection
            .connect(harness.profile())
            .await
            .expect("harness connect");
        tracing::debug!(
            connection_id = %harness.connection.id(),
            protocol = %harness.config.protocol,
            "Harness connected"
        );
        harness
    }

    /// The connection profile for the configured protocol.
    pub fn profile(&self) -> ConnectionProfile {
        ProfileFixtures::for_protocol(self.config.protocol)
    }

    /// Opens a session with the configured refresh period.
    pub async fn session(&self) -> OpcSession {
        self.session_with(ProfileFixtures::session(self.config.refresh_period))
            .await
    }

    /// Opens a session with an explicit profile.
    pub async fn session_with(&self, profile: SessionProfile) -> OpcSession {
        self.connection
            .create_session(profile)
            .await
            .expect("harness create_session")
    }

    /// Wraps the connection in a reconnect supervisor.
    pub fn supervised(&self, policy: ReconnectPolicy) -> AutoReconnect {
        AutoReconnect::new(self.connection.clone(), policy)
    }
}

/// Awaits `future`, panicking if it takes longer than `limit`.
pub async fn within<F: Future>(limit: Duration, future: F) -> F::Output {
    tokio::time::timeout(limit, future)
        .await
        .unwrap_or_else(|_| panic!("operation did not complete within {:?}", limit))
}
