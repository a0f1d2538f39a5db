// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Quality and status normalization.
//!
//! Both protocols report data health with their own code space. The decoders in this module
//! reduce those codes to one protocol-agnostic model:
//!
//! ```text
//!   raw code ──► QualityDecoder ──► Quality        (Good | Uncertain | Bad | Unknown)
//!                              └──► OperationStatus { level, code, detail }
//! ```
//!
//! | Quality   | StatusLevel |
//! |-----------|-------------|
//! | Good      | Info        |
//! | Bad       | Error       |
//! | Uncertain | Warning     |
//! | Unknown   | Warning     |

mod da;
mod ua;

pub use da::DaQualityDecoder;
pub use ua::UaQualityDecoder;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Protocol;

// =============================================================================
// Quality
// =============================================================================

/// Coarse health of a data value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Value is reliable.
    Good,
    /// Value may be stale or inaccurate.
    Uncertain,
    /// Value is not usable.
    Bad,
    /// Code outside the known field values.
    #[default]
    Unknown,
}

impl Quality {
    /// Returns `true` for `Good`.
    #[inline]
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Good)
    }

    /// Returns `true` for `Bad`.
    #[inline]
    pub fn is_bad(&self) -> bool {
        matches!(self, Self::Bad)
    }

    /// Status level implied by this quality.
    pub fn level(&self) -> StatusLevel {
        match self {
            Self::Good => StatusLevel::Info,
            Self::Bad => StatusLevel::Error,
            Self::Uncertain | Self::Unknown => StatusLevel::Warning,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "Good"),
            Self::Uncertain => write!(f, "Uncertain"),
            Self::Bad => write!(f, "Bad"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

// =============================================================================
// OperationStatus
// =============================================================================

/// Severity of an operation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusLevel {
    /// Operation succeeded.
    Info,
    /// Operation succeeded with a caveat.
    Warning,
    /// Operation failed.
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Structured outcome of a read, write or stream item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Severity.
    pub level: StatusLevel,
    /// Protocol specific numeric code (0 means success in both code spaces).
    pub code: u32,
    /// Human readable description, when known.
    pub detail: Option<String>,
}

impl OperationStatus {
    /// Creates a status.
    pub fn new(level: StatusLevel, code: u32, detail: Option<String>) -> Self {
        Self { level, code, detail }
    }

    /// The plain success status.
    pub fn ok() -> Self {
        Self::new(StatusLevel::Info, 0, None)
    }

    /// A warning with a description.
    pub fn warning(code: u32, detail: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warning, code, Some(detail.into()))
    }

    /// An error with a description.
    pub fn error(code: u32, detail: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, code, Some(detail.into()))
    }

    /// Returns `true` if the level is `Error`.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }

    /// Returns `true` if the level is `Info`.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.level == StatusLevel::Info
    }
}

impl Default for OperationStatus {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} 0x{:08X}", self.level, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

// =============================================================================
// QualityDecoder
// =============================================================================

/// Reduces a protocol's raw quality/status codes to the common model.
pub trait QualityDecoder: Send + Sync {
    /// Protocol this decoder understands.
    fn protocol(&self) -> Protocol;

    /// Extracts the quality field of a raw value quality code.
    fn quality(&self, raw: u32) -> Quality;

    /// Static description of a known sub-code, `None` otherwise.
    fn describe(&self, raw: u32) -> Option<&'static str>;

    /// Status record for a raw value quality code.
    fn operation_status(&self, raw: u32) -> OperationStatus {
        OperationStatus::new(
            self.quality(raw).level(),
            raw,
            self.describe(raw).map(str::to_string),
        )
    }

    /// Status record for the raw result of a write.
    ///
    /// Protocols whose operation results share the quality code space use the default.
    fn result_status(&self, raw: u32) -> OperationStatus {
        self.operation_status(raw)
    }
}

/// Returns the decoder for a protocol.
pub fn decoder_for(protocol: Protocol) -> &'static dyn QualityDecoder {
    static DA: DaQualityDecoder = DaQualityDecoder;
    static UA: UaQualityDecoder = UaQualityDecoder;

    match protocol {
        Protocol::Da => &DA,
        Protocol::Ua => &UA,
    }
}

// =============================================================================
// Tests
// =============================================================================
