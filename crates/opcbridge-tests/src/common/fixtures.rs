// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built profiles, options and configuration documents.

use std::time::Duration;

use opcbridge_core::{
    BackoffStrategy, ConnectionOptions, ConnectionProfile, Credentials, Protocol,
    ReconnectPolicy, SessionProfile, Value,
};

// =============================================================================
// Profile Fixtures
// =============================================================================

/// Factory for engine profiles.
pub struct ProfileFixtures;

impl ProfileFixtures {
    /// A legacy-protocol profile for `localhost:135`.
    pub fn da() -> ConnectionProfile {
        ConnectionProfile::builder(Protocol::Da)
            .host("localhost")
            .port(135)
            .endpoint("Sim.Server.1")
            .socket_timeout(Duration::from_secs(1))
            .build()
            .expect("valid profile")
    }

    /// A modern-protocol profile with user credentials.
    pub fn ua() -> ConnectionProfile {
        ConnectionProfile::builder(Protocol::Ua)
            .host("localhost")
            .port(4840)
            .endpoint("opc.tcp://localhost:4840/sim")
            .credentials(Credentials::UserPassword {
                domain: None,
                username: "operator".into(),
                password: "secret".into(),
            })
            .socket_timeout(Duration::from_secs(1))
            .build()
            .expect("valid profile")
    }

    /// A profile for the given protocol.
    pub fn for_protocol(protocol: Protocol) -> ConnectionProfile {
        match protocol {
            Protocol::Da => Self::da(),
            Protocol::Ua => Self::ua(),
        }
    }

    /// Liveness probing every 50ms with a 20ms timeout.
    pub fn fast_options() -> ConnectionOptions {
        ConnectionOptions::default()
            .with_liveness_period(Duration::from_millis(50))
            .with_liveness_timeout(Duration::from_millis(20))
    }

    /// A session profile with the given refresh period.
    pub fn session(refresh: Duration) -> SessionProfile {
        SessionProfile::builder()
            .refresh_period(refresh)
            .build()
            .expect("valid session profile")
    }

    /// Fixed 100ms reconnect backoff without an attempt limit.
    pub fn quick_reconnect() -> ReconnectPolicy {
        ReconnectPolicy::new().with_backoff(BackoffStrategy::fixed(Duration::from_millis(100)))
    }
}

// =============================================================================
// Tag Fixtures
// =============================================================================

/// Factory for tag catalogues.
pub struct TagFixtures;

impl TagFixtures {
    /// A small production line: `(tag, value)`.
    pub fn line() -> Vec<(&'static str, Value)> {
        vec![
            ("Line1.Speed", Value::Float64(12.5)),
            ("Line1.Running", Value::Bool(true)),
            ("Line1.Count", Value::Int32(42)),
            ("Line1.Recipe", Value::String("A-100".into())),
        ]
    }

    /// Tag names of [`line`](Self::line).
    pub fn line_names() -> Vec<&'static str> {
        Self::line().into_iter().map(|(tag, _)| tag).collect()
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Configuration documents in every supported format.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A complete YAML configuration.
    pub fn yaml() -> &'static str {
        r#"
connection:
  protocol: ua
  host: plc-01.local
  port: 4841
  socket_timeout: 2s
  endpoint: opc.tcp://plc-01.local:4841/line
  credentials:
    username: operator
    password: secret
liveness:
  period: 2s
  timeout: 500ms
reconnect:
  enabled: true
  strategy: exponential
  initial_delay: 500ms
  max_delay: 10s
  multiplier: 2.0
  max_attempts: 20
session:
  refresh_period: 250ms
  read_mode: device
  type_overrides:
    - tag: Line1.Count
      data_type: int64
watch:
  default_interval: 1s
  tags:
    - tag: Line1.Speed
      interval: 200ms
    - tag: Line1.Running
simulation:
  acquisition: push
  min_rate: 100ms
  seed: 7
logging:
  level: debug
  format: json
"#
    }

    /// A minimal TOML configuration.
    pub fn toml() -> &'static str {
        r#"
[connection]
protocol = "da"
host = "legacy-host"
endpoint = "Vendor.Server.1"

[session]
refresh_period = "500ms"

[[watch.tags]]
tag = "Line2.Count"
interval = "2s"
"#
    }

    /// A minimal JSON configuration.
    pub fn json() -> &'static str {
        r#"{
  "connection": { "protocol": "ua", "host": "json-host", "port": 4840 },
  "reconnect": { "enabled": false }
}"#
    }
}
