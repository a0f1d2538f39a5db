// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcbridge-config
//!
//! Configuration for the opcbridge CLI.
//!
//! - **Schema**: [`BridgeConfig`] with validation and conversion into engine profiles
//! - **Multi-Format Support**: YAML, TOML and JSON files
//! - **Environment Overrides**: `${VAR:default}` placeholders and `OPCBRIDGE_*` variables
//!
//! ```no_run
//! use opcbridge_config::load_config;
//!
//! let config = load_config("bridge.yaml").unwrap();
//! let profile = config.connection_profile().unwrap();
//! println!("Connecting to {}", profile.describe());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    BackoffKind, BridgeConfig, ConnectionConfig, CredentialsConfig, LivenessConfig, LogFormat,
    LogLevel, LoggingConfig, ReconnectConfig, SessionConfig, SimTagConfig, SimTagKind,
    SimulationConfig, TypeOverride, WatchConfig, WatchTag,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
