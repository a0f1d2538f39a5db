// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcbridge Integration Tests
//!
//! Test utilities and integration tests for the opcbridge engine.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `mocks`: [`MockDriver`](common::mocks::MockDriver), a scriptable protocol driver
//!   - `fixtures`: Pre-built profiles and configuration documents
//!   - `harness`: A connected connection with one driver, ready to open sessions
//!   - `assertions`: Assertion helpers for samples, statuses and state walks
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p opcbridge-tests
//!
//! # Run one suite
//! cargo test -p opcbridge-tests --test integration_connection
//! cargo test -p opcbridge-tests --test integration_session
//! cargo test -p opcbridge-tests --test integration_stream
//! cargo test -p opcbridge-tests --test integration_reconnect
//! cargo test -p opcbridge-tests --test integration_config
//! cargo test -p opcbridge-tests --test integration_sim
//! ```
//!
//! ## Test Categories
//!
//! ### Connection (`integration_connection.rs`)
//! - State walks and ordered transitions
//! - Liveness failures forcing a disconnect
//! - Session draining on disconnect
//!
//! ### Session (`integration_session.rs`)
//! - Batched read/write ordering with partial failures
//! - Detached sessions
//! - Collapsed concurrent resolution, no handle reuse across links
//!
//! ### Streams (`integration_stream.rs`)
//! - Change delivery, latest-wins throttling, ref-counting
//! - Push acquisition
//! - Termination on connection loss
//!
//! ### Reconnect (`integration_reconnect.rs`)
//! - Recovery after link loss, attempt limits, operator disconnect
//!
//! ### Config (`integration_config.rs`)
//! - YAML/TOML/JSON files, validation, environment overrides
//!
//! ### Simulated server (`integration_sim.rs`)
//! - The full stack against the in-memory server
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use opcbridge_tests::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_something() {
//!     let harness = TestHarness::connected(HarnessConfig::default()).await;
//!     harness.driver.set_value("T1", 1);
//!     let session = harness.session().await;
//!     let mut stream = session.stream("T1", Duration::from_millis(50));
//!     stream.next().await.unwrap().unwrap().assert_value(&Value::Int32(1));
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{init_test_logging, temp_config_file};
}
