// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcbridge-bin
//!
//! CLI binary for opcbridge.
//!
//! This crate provides the `opcbridge` entry point, including:
//!
//! - CLI argument parsing with clap
//! - Connection runtime with optional auto-reconnect
//! - Graceful shutdown handling
//! - Logging initialization
//! - Command implementations (watch, read, browse, validate, version)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         main.rs                              │
//! │                    (Entry Point)                             │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                    ┌──────▼──────┐
//!                    │    cli.rs   │
//!                    └──────┬──────┘
//!                           │
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ commands │ │ runtime  │ │ logging  │
//!        └──────────┘ └────┬─────┘ └──────────┘
//!               │          │
//!               │   ┌──────▼──────────────────┐
//!               │   │ OpcConnection           │
//!               │   │ AutoReconnect           │
//!               │   │ SimulatedDriver         │
//!               │   └─────────────────────────┘
//!        ┌──────▼──────┐
//!        │  shutdown   │
//!        └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Stream the configured watch list (default command)
//! opcbridge -c bridge.yaml
//!
//! # Stream two tags for ten seconds as JSON lines
//! opcbridge watch -t Line1.Speed -t Line1.Running -i 250ms -d 10s -f json
//!
//! # Read once, straight from the device
//! opcbridge read Line1.Speed Line2.Count --device
//!
//! # Browse two levels
//! opcbridge browse --depth 2
//!
//! # Validate configuration
//! opcbridge validate --show-config
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{simulated_driver, BridgeRuntime};
pub use shutdown::ShutdownCoordinator;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
