// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bridge runtime.
//!
//! Builds the driver, the connection and (when enabled) the reconnect supervisor from a
//! [`BridgeConfig`], and owns their startup and teardown.

use std::sync::Arc;
use std::time::Duration;

use opcbridge_config::{BridgeConfig, SimTagConfig, SimTagKind, SimulationConfig};
use opcbridge_core::{
    AutoReconnect, ConnectionState, OpcConnection, OpcSession, Protocol, SessionProfile,
    StateObserver,
};
use opcbridge_sim::{SimTag, SimulatedDriver};
use tracing::info;

use crate::error::{BinError, BinResult};

const LATCH_POLL: Duration = Duration::from_millis(250);

// =============================================================================
// Driver construction
// =============================================================================

fn sim_tag(config: &SimTagConfig) -> SimTag {
    let tag = match config.kind {
        SimTagKind::RandomWalk => SimTag::random_walk(&config.name, config.initial, config.step),
        SimTagKind::Counter => {
            SimTag::counter(&config.name, config.initial as i64, config.step as i64)
        }
        SimTagKind::Toggle => SimTag::toggle(&config.name, config.initial != 0.0),
        SimTagKind::Static => SimTag::fixed(
            &config.name,
            config.value.clone().unwrap_or_else(|| config.initial.to_string()),
        ),
    };
    if config.writable {
        tag
    } else {
        tag.read_only()
    }
}

/// Builds the simulated server described by the `simulation` section.
pub fn simulated_driver(protocol: Protocol, config: &SimulationConfig) -> SimulatedDriver {
    let mut builder = SimulatedDriver::builder(protocol)
        .acquisition(config.acquisition)
        .min_rate(config.min_rate)
        .update_period(config.update_period)
        .tags(config.tags.iter().map(sim_tag));
    if let Some(seed) = config.seed {
        builder = builder.seed(seed);
    }
    builder.build()
}

// =============================================================================
// BridgeRuntime
// =============================================================================

/// A configured connection with optional auto-reconnect.
pub struct BridgeRuntime {
    config: Arc<BridgeConfig>,
    connection: OpcConnection,
    supervisor: Option<AutoReconnect>,
}

impl BridgeRuntime {
    /// Builds the runtime over the simulated server.
    pub fn new(config: BridgeConfig, reconnect: bool) -> Self {
        let driver = simulated_driver(config.connection.protocol, &config.simulation);
        let connection = OpcConnection::with_options(Arc::new(driver), config.connection_options());
        let supervisor = (reconnect && config.reconnect.enabled)
            .then(|| AutoReconnect::new(connection.clone(), config.reconnect_policy()));
        Self {
            config: Arc::new(config),
            connection,
            supervisor,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The connection.
    pub fn connection(&self) -> &OpcConnection {
        &self.connection
    }

    /// Observer of the connection state.
    pub fn state_observer(&self) -> StateObserver {
        self.connection.state_observer()
    }

    /// Returns `true` while the supervisor still wants the connection up.
    pub fn is_reconnecting(&self) -> bool {
        self.supervisor.as_ref().is_some_and(|s| s.is_keep_alive())
    }

    /// Connects, through the supervisor when enabled.
    pub async fn start(&self) -> BinResult<()> {
        let profile = self.config.connection_profile()?;
        let endpoint = profile.describe();
        let connected = match &self.supervisor {
            Some(supervisor) => supervisor.connect(profile).await,
            None => self.connection.connect(profile).await,
        };
        connected
            .map_err(|e| BinError::from(e).with_context(format!("connecting to {}", endpoint)))?;
        info!(
            connection_id = %self.connection.id(),
            endpoint = %endpoint,
            reconnect = self.supervisor.is_some(),
            "Connected"
        );
        Ok(())
    }

    /// Opens a session with the configured profile.
    pub async fn open_session(&self) -> BinResult<OpcSession> {
        self.open_session_with(self.config.session_profile()?).await
    }

    /// Opens a session with an explicit profile.
    pub async fn open_session_with(&self, profile: SessionProfile) -> BinResult<OpcSession> {
        let session = self.connection.create_session(profile).await?;
        info!(
            session_id = %session.id(),
            revised_rate_ms = session.revised_rate().as_millis() as u64,
            "Session created"
        );
        Ok(session)
    }

    /// Waits until the connection is `Connected` again. Returns `false` if it never will be.
    pub async fn wait_connected(&self) -> bool {
        let mut observer = self.state_observer();
        loop {
            if observer.get() == ConnectionState::Connected {
                return true;
            }
            if !self.is_reconnecting() {
                return false;
            }
            // The supervisor gives up without a state change, so the latch is re-checked.
            if let Ok(None) = tokio::time::timeout(LATCH_POLL, observer.changed()).await {
                return false;
            }
        }
    }

    /// Disconnects and stops supervision.
    pub async fn stop(&self) -> BinResult<()> {
        match &self.supervisor {
            Some(supervisor) => supervisor.disconnect().await?,
            None => self.connection.disconnect().await?,
        }
        let stats = self.connection.stats();
        info!(
            connects = stats.connects,
            disconnects = stats.disconnects,
            "Disconnected"
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use opcbridge_config::ConnectionConfig;
    use opcbridge_core::Value;

    use super::*;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::new(ConnectionConfig::new(Protocol::Ua, "sim"));
        config.simulation.seed = Some(1);
        config.simulation.tags = vec![
            SimTagConfig {
                name: "Line1.Count".into(),
                kind: SimTagKind::Counter,
                initial: 5.0,
                step: 1.0,
                value: None,
                writable: true,
            },
            SimTagConfig {
                name: "Plant.Name".into(),
                kind: SimTagKind::Static,
                initial: 0.0,
                step: 1.0,
                value: Some("North".into()),
                writable: false,
            },
        ];
        config
    }

    #[tokio::test]
    async fn test_start_read_stop() {
        let runtime = BridgeRuntime::new(config(), false);
        runtime.start().await.unwrap();
        assert_eq!(runtime.connection().state(), ConnectionState::Connected);

        let session = runtime.open_session().await.unwrap();
        let samples = session.read(&["Plant.Name"]).await.unwrap();
        assert_eq!(samples[0].value, Value::from("North"));
        assert!(session.write_value("Plant.Name", "South").await.is_err());

        runtime.stop().await.unwrap();
        assert_eq!(runtime.connection().state(), ConnectionState::Disconnected);
        assert!(!runtime.wait_connected().await);
    }

    #[tokio::test]
    async fn test_reconnect_respects_config() {
        let mut config = config();
        config.reconnect.enabled = false;
        let runtime = BridgeRuntime::new(config, true);
        runtime.start().await.unwrap();
        assert!(!runtime.is_reconnecting());
        runtime.stop().await.unwrap();

        let runtime = BridgeRuntime::new(self::config(), true);
        runtime.start().await.unwrap();
        assert!(runtime.is_reconnecting());
        runtime.stop().await.unwrap();
        assert!(!runtime.is_reconnecting());
    }
}
