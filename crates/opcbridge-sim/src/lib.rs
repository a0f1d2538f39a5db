// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # opcbridge-sim
//!
//! An in-process OPC server for demos and tests.
//!
//! [`SimulatedDriver`] implements [`opcbridge_core::ProtocolDriver`] over an in-memory address
//! space of [`SimTag`]s. It supports both acquisition modes, grants a configurable minimum
//! revised rate and exposes fault injection hooks (failed probes, dropped links, refused
//! connections) for exercising the engine's failure paths.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod driver;
pub mod tag;

pub use driver::{SimulatedDriver, SimulatedDriverBuilder, DEFAULT_MIN_RATE, DEFAULT_UPDATE_PERIOD};
pub use tag::{default_catalogue, SimTag, TagBehavior};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
