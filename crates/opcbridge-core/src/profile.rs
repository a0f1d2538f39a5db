// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection and session profiles.
//!
//! Profiles are plain configuration structs. Each has a dedicated builder that validates
//! the result in `build()`.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::types::{DataType, Protocol};

// =============================================================================
// Credentials
// =============================================================================

/// Credentials presented during the handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// No authentication.
    #[default]
    Anonymous,
    /// User name and password, with an optional Windows domain.
    UserPassword {
        /// Domain (legacy protocol only).
        domain: Option<String>,
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserPassword {
                domain, username, ..
            } => f
                .debug_struct("UserPassword")
                .field("domain", domain)
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

// =============================================================================
// ConnectionProfile
// =============================================================================

/// Everything needed to open a connection.
///
/// A profile is cloned into the connection on `connect` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Protocol family.
    pub protocol: Protocol,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Timeout for the handshake and every blocking driver call.
    pub socket_timeout: Duration,
    /// Protocol specific endpoint (endpoint url, ProgID or CLSID).
    pub endpoint: Option<String>,
    /// Credentials.
    pub credentials: Credentials,
}

impl ConnectionProfile {
    /// Default handshake timeout.
    pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a builder.
    pub fn builder(protocol: Protocol) -> ConnectionProfileBuilder {
        ConnectionProfileBuilder::new(protocol)
    }

    /// Human readable endpoint used in logs and errors.
    pub fn describe(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}://{}:{}/{}", self.protocol, self.host, self.port, endpoint),
            None => format!("{}://{}:{}", self.protocol, self.host, self.port),
        }
    }
}

/// Builder for [`ConnectionProfile`].
#[derive(Debug, Clone)]
pub struct ConnectionProfileBuilder {
    protocol: Protocol,
    host: Option<String>,
    port: Option<u16>,
    socket_timeout: Duration,
    endpoint: Option<String>,
    credentials: Credentials,
}

impl ConnectionProfileBuilder {
    fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            host: None,
            port: None,
            socket_timeout: ConnectionProfile::DEFAULT_SOCKET_TIMEOUT,
            endpoint: None,
            credentials: Credentials::Anonymous,
        }
    }

    /// Sets the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the socket timeout.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Sets the protocol specific endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the credentials.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Validates and builds the profile.
    pub fn build(self) -> BridgeResult<ConnectionProfile> {
        let host = self
            .host
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| BridgeError::invalid("host must not be empty"))?;
        let port = match self.port {
            Some(0) | None => return Err(BridgeError::invalid("port must be set and non-zero")),
            Some(port) => port,
        };
        if self.socket_timeout.is_zero() {
            return Err(BridgeError::invalid("socket timeout must be greater than zero"));
        }

        Ok(ConnectionProfile {
            protocol: self.protocol,
            host,
            port,
            socket_timeout: self.socket_timeout,
            endpoint: self.endpoint,
            credentials: self.credentials,
        })
    }
}

// =============================================================================
// SessionProfile
// =============================================================================

/// Where reads are served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Server cache (cheap, refreshed at the session's rate).
    #[default]
    Cache,
    /// Directly from the device.
    Device,
}

/// Parameters of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProfile {
    /// Requested refresh period. The driver may revise it upward.
    pub refresh_period: Duration,
    /// Read mode for batched reads and polling.
    pub read_mode: ReadMode,
    /// Per-tag type overrides applied to read and streamed values.
    pub type_overrides: HashMap<String, DataType>,
    /// Capacity of the shared broadcast channel and of each subscriber buffer.
    pub stream_buffer: usize,
}

impl SessionProfile {
    /// Default refresh period.
    pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(1);

    /// Default stream buffer capacity.
    pub const DEFAULT_STREAM_BUFFER: usize = 256;

    /// Creates a builder.
    pub fn builder() -> SessionProfileBuilder {
        SessionProfileBuilder::default()
    }

    /// Returns the override for a tag, if any.
    pub fn type_override(&self, tag: &str) -> Option<DataType> {
        self.type_overrides.get(tag).copied()
    }
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            refresh_period: Self::DEFAULT_REFRESH_PERIOD,
            read_mode: ReadMode::default(),
            type_overrides: HashMap::new(),
            stream_buffer: Self::DEFAULT_STREAM_BUFFER,
        }
    }
}

/// Builder for [`SessionProfile`].
#[derive(Debug, Clone, Default)]
pub struct SessionProfileBuilder {
    profile: SessionProfile,
}

impl SessionProfileBuilder {
    /// Sets the requested refresh period.
    pub fn refresh_period(mut self, period: Duration) -> Self {
        self.profile.refresh_period = period;
        self
    }

    /// Sets the read mode.
    pub fn read_mode(mut self, mode: ReadMode) -> Self {
        self.profile.read_mode = mode;
        self
    }

    /// Adds a type override.
    pub fn type_override(mut self, tag: impl Into<String>, data_type: DataType) -> Self {
        self.profile.type_overrides.insert(tag.into(), data_type);
        self
    }

    /// Sets the stream buffer capacity.
    pub fn stream_buffer(mut self, capacity: usize) -> Self {
        self.profile.stream_buffer = capacity;
        self
    }

    /// Validates and builds the profile.
    pub fn build(self) -> BridgeResult<SessionProfile> {
        if self.profile.refresh_period.is_zero() {
            return Err(BridgeError::invalid("refresh period must be greater than zero"));
        }
        if self.profile.stream_buffer == 0 {
            return Err(BridgeError::invalid("stream buffer must be at least 1"));
        }
        Ok(self.profile)
    }
}

// =============================================================================
// ConnectionOptions
// =============================================================================

/// Engine side tuning of a connection object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Period of the liveness prober.
    pub liveness_period: Duration,
    /// Timeout of a single liveness probe.
    pub liveness_timeout: Duration,
}

impl ConnectionOptions {
    /// Sets the liveness period.
    pub fn with_liveness_period(mut self, period: Duration) -> Self {
        self.liveness_period = period;
        self
    }

    /// Sets the probe timeout.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            liveness_period: Duration::from_secs(5),
            liveness_timeout: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_profile_builder() {
        let profile = ConnectionProfile::builder(Protocol::Ua)
            .host("plc.local")
            .port(4840)
            .endpoint("opc.tcp/plant")
            .build()
            .unwrap();

        assert_eq!(profile.socket_timeout, ConnectionProfile::DEFAULT_SOCKET_TIMEOUT);
        assert_eq!(profile.describe(), "ua://plc.local:4840/opc.tcp/plant");
    }

    #[test]
    fn test_connection_profile_validation() {
        assert!(ConnectionProfile::builder(Protocol::Da).port(135).build().is_err());
        assert!(ConnectionProfile::builder(Protocol::Da).host("h").build().is_err());
        assert!(ConnectionProfile::builder(Protocol::Da)
            .host("h")
            .port(135)
            .socket_timeout(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::UserPassword {
            domain: Some("PLANT".into()),
            username: "operator".into(),
            password: "hunter2".into(),
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("operator"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_session_profile_builder() {
        let profile = SessionProfile::builder()
            .refresh_period(Duration::from_millis(100))
            .type_override("Line1.Speed", DataType::Float32)
            .build()
            .unwrap();

        assert_eq!(profile.type_override("Line1.Speed"), Some(DataType::Float32));
        assert_eq!(profile.type_override("other"), None);
        assert!(SessionProfile::builder().refresh_period(Duration::ZERO).build().is_err());
    }
}
