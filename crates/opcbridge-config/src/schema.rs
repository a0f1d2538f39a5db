// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema.
//!
//! # Schema Structure
//!
//! ```text
//! BridgeConfig
//! ├── connection: ConnectionConfig
//! ├── liveness: LivenessConfig
//! ├── reconnect: ReconnectConfig
//! ├── session: SessionConfig
//! ├── watch: WatchConfig
//! ├── simulation: SimulationConfig
//! └── logging: LoggingConfig
//! ```
//!
//! Durations use humantime notation (`"250ms"`, `"5s"`, `"1m 30s"`).

use std::time::Duration;

use opcbridge_core::{
    Acquisition, BackoffStrategy, ConnectionOptions, ConnectionProfile, Credentials, DataType,
    Protocol, ReadMode, ReconnectPolicy, SessionProfile,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Constants
// =============================================================================

/// Default port of the legacy protocol (RPC endpoint mapper).
pub const DEFAULT_DA_PORT: u16 = 135;

/// Default port of the modern protocol.
pub const DEFAULT_UA_PORT: u16 = 4840;

/// Default socket timeout.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Default reconnect delay.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound of growing reconnect delays.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default stream interval of watched tags.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest accepted stream interval.
pub const MIN_STREAM_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// The root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Server to connect to.
    pub connection: ConnectionConfig,

    /// Liveness prober settings.
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Auto-reconnect settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Tags followed by the `watch` command.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Simulated server settings.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Creates a configuration with defaults for everything but the connection.
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            liveness: LivenessConfig::default(),
            reconnect: ReconnectConfig::default(),
            session: SessionConfig::default(),
            watch: WatchConfig::default(),
            simulation: SimulationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.connection.validate()?;
        self.liveness.validate()?;
        self.reconnect.validate()?;
        self.session.validate()?;
        self.watch.validate()?;
        self.simulation.validate()?;
        Ok(())
    }

    /// Builds the connection profile.
    pub fn connection_profile(&self) -> ConfigResult<ConnectionProfile> {
        self.connection.to_profile()
    }

    /// Builds the session profile.
    pub fn session_profile(&self) -> ConfigResult<SessionProfile> {
        self.session.to_profile()
    }

    /// Builds the connection options.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions::default()
            .with_liveness_period(self.liveness.period)
            .with_liveness_timeout(self.liveness.timeout)
    }

    /// Builds the reconnect policy.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect.to_policy()
    }
}

fn require_positive(field: &str, value: Duration) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::validation(field, "must be greater than zero"));
    }
    Ok(())
}

// =============================================================================
// Connection
// =============================================================================

/// Server endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Protocol (`da` or `ua`).
    pub protocol: Protocol,

    /// Server host.
    pub host: String,

    /// Server port. Defaults to the protocol's well-known port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Handshake and request timeout.
    #[serde(default = "default_socket_timeout", with = "humantime_serde")]
    pub socket_timeout: Duration,

    /// Server program id (legacy) or endpoint path (modern).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Credentials. Anonymous when absent.
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

fn default_socket_timeout() -> Duration {
    DEFAULT_SOCKET_TIMEOUT
}

impl ConnectionConfig {
    /// Creates an anonymous connection config on the protocol's default port.
    pub fn new(protocol: Protocol, host: impl Into<String>) -> Self {
        Self {
            protocol,
            host: host.into(),
            port: None,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            endpoint: None,
            credentials: None,
        }
    }

    /// The configured port, or the protocol's default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(match self.protocol {
            Protocol::Da => DEFAULT_DA_PORT,
            Protocol::Ua => DEFAULT_UA_PORT,
        })
    }

    /// Validates the connection section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::validation("connection.host", "must not be empty"));
        }
        if self.port == Some(0) {
            return Err(ConfigError::validation("connection.port", "must not be zero"));
        }
        require_positive("connection.socket_timeout", self.socket_timeout)?;
        if let Some(credentials) = &self.credentials {
            if credentials.username.trim().is_empty() {
                return Err(ConfigError::validation(
                    "connection.credentials.username",
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// Converts into an engine profile.
    pub fn to_profile(&self) -> ConfigResult<ConnectionProfile> {
        let mut builder = ConnectionProfile::builder(self.protocol)
            .host(self.host.clone())
            .port(self.effective_port())
            .socket_timeout(self.socket_timeout);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint.clone());
        }
        if let Some(credentials) = &self.credentials {
            builder = builder.credentials(credentials.to_credentials());
        }
        Ok(builder.build()?)
    }
}

/// User name and password.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Windows domain (legacy protocol only).
    #[serde(default)]
    pub domain: Option<String>,
    /// User name.
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
}

impl CredentialsConfig {
    fn to_credentials(&self) -> Credentials {
        Credentials::UserPassword {
            domain: self.domain.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("domain", &self.domain)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// Liveness
// =============================================================================

/// Liveness prober settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LivenessConfig {
    /// Probe period.
    #[serde(default = "default_liveness_period", with = "humantime_serde")]
    pub period: Duration,

    /// Timeout of a single probe.
    #[serde(default = "default_liveness_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_liveness_period() -> Duration {
    ConnectionOptions::default().liveness_period
}

fn default_liveness_timeout() -> Duration {
    ConnectionOptions::default().liveness_timeout
}

impl LivenessConfig {
    /// Validates the liveness section.
    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("liveness.period", self.period)?;
        require_positive("liveness.timeout", self.timeout)
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            period: default_liveness_period(),
            timeout: default_liveness_timeout(),
        }
    }
}

// =============================================================================
// Reconnect
// =============================================================================

/// Shape of the reconnect delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay every time.
    #[default]
    Fixed,
    /// Delay grows by `increment`.
    Linear,
    /// Delay is multiplied by `multiplier`.
    Exponential,
}

/// Auto-reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Reconnect after failure-induced disconnects.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay schedule.
    #[serde(default)]
    pub strategy: BackoffKind,

    /// First delay (the only one for `fixed`).
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound of growing delays.
    #[serde(default = "default_reconnect_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Increment of `linear`.
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub increment: Duration,

    /// Factor of `exponential`.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Give up after this many consecutive failures.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> Duration {
    DEFAULT_RECONNECT_DELAY
}

fn default_reconnect_max_delay() -> Duration {
    DEFAULT_RECONNECT_MAX_DELAY
}

fn default_multiplier() -> f64 {
    2.0
}

impl ReconnectConfig {
    /// Validates the reconnect section.
    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("reconnect.initial_delay", self.initial_delay)?;
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::validation(
                "reconnect.max_delay",
                "must not be smaller than initial_delay",
            ));
        }
        if self.strategy == BackoffKind::Exponential && self.multiplier < 1.0 {
            return Err(ConfigError::validation("reconnect.multiplier", "must be at least 1.0"));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::validation("reconnect.max_attempts", "must not be zero"));
        }
        Ok(())
    }

    /// Converts into an engine policy.
    pub fn to_policy(&self) -> ReconnectPolicy {
        let backoff = match self.strategy {
            BackoffKind::Fixed => BackoffStrategy::fixed(self.initial_delay),
            BackoffKind::Linear => BackoffStrategy::Linear {
                initial: self.initial_delay,
                increment: self.increment,
                max: self.max_delay,
            },
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                initial: self.initial_delay,
                multiplier: self.multiplier,
                max: self.max_delay,
            },
        };
        let policy = ReconnectPolicy::new().with_backoff(backoff);
        match self.max_attempts {
            Some(attempts) => policy.with_max_attempts(attempts),
            None => policy,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: BackoffKind::default(),
            initial_delay: DEFAULT_RECONNECT_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            increment: DEFAULT_RECONNECT_DELAY,
            multiplier: default_multiplier(),
            max_attempts: None,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// A declared data type for one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeOverride {
    /// Tag name.
    pub tag: String,
    /// Declared type.
    pub data_type: DataType,
}

/// Session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Requested refresh period.
    #[serde(default = "default_refresh_period", with = "humantime_serde")]
    pub refresh_period: Duration,

    /// Read from the server cache or the device.
    #[serde(default)]
    pub read_mode: ReadMode,

    /// Capacity of the shared stream channel.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Per-tag type overrides.
    #[serde(default)]
    pub type_overrides: Vec<TypeOverride>,
}

fn default_refresh_period() -> Duration {
    SessionProfile::DEFAULT_REFRESH_PERIOD
}

fn default_stream_buffer() -> usize {
    SessionProfile::DEFAULT_STREAM_BUFFER
}

impl SessionConfig {
    /// Validates the session section.
    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("session.refresh_period", self.refresh_period)?;
        if self.stream_buffer == 0 {
            return Err(ConfigError::validation("session.stream_buffer", "must not be zero"));
        }
        for (i, entry) in self.type_overrides.iter().enumerate() {
            if entry.tag.trim().is_empty() {
                return Err(ConfigError::validation(
                    format!("session.type_overrides[{}].tag", i),
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// Converts into an engine profile.
    pub fn to_profile(&self) -> ConfigResult<SessionProfile> {
        let builder = self.type_overrides.iter().fold(
            SessionProfile::builder()
                .refresh_period(self.refresh_period)
                .read_mode(self.read_mode)
                .stream_buffer(self.stream_buffer),
            |builder, entry| builder.type_override(entry.tag.clone(), entry.data_type),
        );
        Ok(builder.build()?)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_period: default_refresh_period(),
            read_mode: ReadMode::default(),
            stream_buffer: default_stream_buffer(),
            type_overrides: Vec::new(),
        }
    }
}

// =============================================================================
// Watch
// =============================================================================

/// One watched tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchTag {
    /// Tag name.
    pub tag: String,
    /// Stream interval. Falls back to `watch.default_interval`.
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
}

/// Tags followed by the `watch` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Interval of tags without their own.
    #[serde(default = "default_watch_interval", with = "humantime_serde")]
    pub default_interval: Duration,

    /// Watched tags.
    #[serde(default)]
    pub tags: Vec<WatchTag>,
}

fn default_watch_interval() -> Duration {
    DEFAULT_WATCH_INTERVAL
}

impl WatchConfig {
    /// Validates the watch section.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_interval < MIN_STREAM_INTERVAL {
            return Err(ConfigError::validation("watch.default_interval", "must be at least 1ms"));
        }
        for (i, entry) in self.tags.iter().enumerate() {
            if entry.tag.trim().is_empty() {
                return Err(ConfigError::validation(
                    format!("watch.tags[{}].tag", i),
                    "must not be empty",
                ));
            }
            if matches!(entry.interval, Some(interval) if interval < MIN_STREAM_INTERVAL) {
                return Err(ConfigError::validation(
                    format!("watch.tags[{}].interval", i),
                    "must be at least 1ms",
                ));
            }
        }
        Ok(())
    }

    /// Tag names with their effective intervals.
    pub fn resolved(&self) -> Vec<(String, Duration)> {
        self.tags
            .iter()
            .map(|entry| {
                (
                    entry.tag.clone(),
                    entry.interval.unwrap_or(self.default_interval),
                )
            })
            .collect()
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_WATCH_INTERVAL,
            tags: Vec::new(),
        }
    }
}

// =============================================================================
// Simulation
// =============================================================================

/// Behavior of a simulated tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimTagKind {
    /// Float drifting by up to `step` per refresh.
    #[default]
    RandomWalk,
    /// Integer growing by `step` per refresh.
    Counter,
    /// Boolean flipping on every refresh.
    Toggle,
    /// Fixed string `value`.
    Static,
}

/// One simulated tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimTagConfig {
    /// Tag name.
    pub name: String,
    /// Behavior.
    #[serde(default)]
    pub kind: SimTagKind,
    /// Starting value of numeric tags.
    #[serde(default)]
    pub initial: f64,
    /// Step of numeric tags.
    #[serde(default = "default_step")]
    pub step: f64,
    /// Value of static tags.
    #[serde(default)]
    pub value: Option<String>,
    /// Accepts writes.
    #[serde(default = "default_true")]
    pub writable: bool,
}

fn default_step() -> f64 {
    1.0
}

/// Simulated server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Poll or push acquisition.
    #[serde(default)]
    pub acquisition: Acquisition,

    /// Smallest refresh period the simulated server grants.
    #[serde(default = "default_min_rate", with = "humantime_serde")]
    pub min_rate: Duration,

    /// How often simulated values evolve.
    #[serde(default = "default_update_period", with = "humantime_serde")]
    pub update_period: Duration,

    /// Seed of the value generator.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Tag catalogue. A small default catalogue is used when empty.
    #[serde(default)]
    pub tags: Vec<SimTagConfig>,
}

fn default_min_rate() -> Duration {
    Duration::from_millis(50)
}

fn default_update_period() -> Duration {
    Duration::from_millis(500)
}

impl SimulationConfig {
    /// Validates the simulation section.
    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("simulation.update_period", self.update_period)?;
        for (i, tag) in self.tags.iter().enumerate() {
            if tag.name.trim().is_empty() {
                return Err(ConfigError::validation(
                    format!("simulation.tags[{}].name", i),
                    "must not be empty",
                ));
            }
            if !tag.step.is_finite() || !tag.initial.is_finite() {
                return Err(ConfigError::validation(
                    format!("simulation.tags[{}]", i),
                    "initial and step must be finite",
                ));
            }
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            acquisition: Acquisition::default(),
            min_rate: default_min_rate(),
            update_period: default_update_period(),
            seed: None,
            tags: Vec::new(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable.
    #[default]
    Text,
    /// Compact single line.
    Compact,
    /// JSON lines.
    Json,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BridgeConfig {
        BridgeConfig::new(ConnectionConfig::new(Protocol::Ua, "plc-01"))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        config.validate().unwrap();
        assert_eq!(config.connection.effective_port(), DEFAULT_UA_PORT);
        assert_eq!(config.reconnect_policy(), ReconnectPolicy::default());
    }

    #[test]
    fn test_empty_host_rejected() {
        let mut config = config();
        config.connection.host = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { field, .. }) if field == "connection.host"
        ));
    }

    #[test]
    fn test_reconnect_bounds() {
        let mut config = config();
        config.reconnect.initial_delay = Duration::from_secs(10);
        config.reconnect.max_delay = Duration::from_secs(5);
        assert!(config.validate().is_err());

        config.reconnect.max_delay = Duration::from_secs(60);
        config.reconnect.strategy = BackoffKind::Exponential;
        let policy = config.reconnect_policy();
        assert_eq!(policy.backoff.delay(1), Duration::from_secs(10));
        assert_eq!(policy.backoff.delay(2), Duration::from_secs(20));
        assert_eq!(policy.backoff.delay(5), Duration::from_secs(60));
    }

    #[test]
    fn test_watch_intervals() {
        let mut config = config();
        config.watch.tags = vec![
            WatchTag {
                tag: "Line1.Speed".into(),
                interval: Some(Duration::from_millis(250)),
            },
            WatchTag {
                tag: "Line1.Running".into(),
                interval: None,
            },
        ];
        assert_eq!(
            config.watch.resolved(),
            vec![
                ("Line1.Speed".to_string(), Duration::from_millis(250)),
                ("Line1.Running".to_string(), DEFAULT_WATCH_INTERVAL),
            ]
        );

        config.watch.tags[0].interval = Some(Duration::from_micros(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_profile_conversion() {
        let mut config = config();
        config.session.type_overrides.push(TypeOverride {
            tag: "Line1.Speed".into(),
            data_type: DataType::Float32,
        });
        let profile = config.session_profile().unwrap();
        assert_eq!(profile.type_override("Line1.Speed"), Some(DataType::Float32));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = CredentialsConfig {
            domain: None,
            username: "operator".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }
}
