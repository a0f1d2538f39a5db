// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the engine.
//!
//! # Error Hierarchy
//!
//! ```text
//! BridgeError
//! ├── Connection(ConnectionError)   - handshake / transport failure, link lost
//! │   ├── Handshake
//! │   ├── TimedOut
//! │   ├── AlreadyActive
//! │   ├── Aborted
//! │   ├── Lost
//! │   └── Closed
//! ├── ConnectionNotReady             - operation attempted outside CONNECTED
//! ├── TagResolution                  - unknown or inaccessible tag
//! ├── SessionDetached                - operation on a released session
//! ├── Write                          - value rejected by the server
//! ├── Protocol(DriverError)          - opaque lower-level driver failure
//! └── InvalidArgument                - rejected profile or parameter
//! ```
//!
//! Every error is `Clone` so one terminal error can be handed to every live stream.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::connection::ConnectionState;
use crate::quality::OperationStatus;
use crate::types::SessionId;

/// Result type alias for engine operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

// =============================================================================
// BridgeError
// =============================================================================

/// The root error type of the engine.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Handshake or transport failure.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Operation attempted while the connection is not `Connected`.
    #[error("Connection not ready: state is {state}")]
    ConnectionNotReady {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// The driver could not register the tag.
    #[error("Failed to resolve tag '{tag}': {source}")]
    TagResolution {
        /// Tag name.
        tag: String,
        /// Driver failure.
        #[source]
        source: DriverError,
    },

    /// The session was released or its connection went away.
    #[error("Session {session_id} is detached")]
    SessionDetached {
        /// Session id.
        session_id: SessionId,
    },

    /// The server rejected a written value.
    #[error("Write to '{tag}' rejected: {status}")]
    Write {
        /// Tag name.
        tag: String,
        /// Per-item status returned by the server.
        status: OperationStatus,
    },

    /// Any other driver failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] DriverError),

    /// A profile or parameter was rejected before reaching the driver.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl BridgeError {
    /// Creates a not-ready error.
    pub fn not_ready(state: ConnectionState) -> Self {
        Self::ConnectionNotReady { state }
    }

    /// Creates a tag resolution error.
    pub fn tag_resolution(tag: impl Into<String>, source: DriverError) -> Self {
        Self::TagResolution {
            tag: tag.into(),
            source,
        }
    }

    /// Creates a detached-session error.
    pub fn detached(session_id: SessionId) -> Self {
        Self::SessionDetached { session_id }
    }

    /// Creates a write rejection.
    pub fn write(tag: impl Into<String>, status: OperationStatus) -> Self {
        Self::Write {
            tag: tag.into(),
            status,
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Converts this error into the error status reported for a single tag.
    pub fn to_status(&self) -> OperationStatus {
        match self {
            Self::Write { status, .. } => status.clone(),
            Self::TagResolution { source, .. } | Self::Protocol(source) => {
                let code = source
                    .code
                    .unwrap_or_else(|| self.error_code().as_u16() as u32);
                OperationStatus::error(code, self.to_string())
            }
            _ => OperationStatus::error(self.error_code().as_u16() as u32, self.to_string()),
        }
    }

    /// Returns `true` if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::ConnectionNotReady { .. } => true,
            Self::TagResolution { source, .. } => source.is_retryable(),
            Self::SessionDetached { .. } => false,
            Self::Write { .. } => false,
            Self::Protocol(e) => e.is_retryable(),
            Self::InvalidArgument(_) => false,
        }
    }

    /// Returns `true` if this error means the underlying link is unusable.
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Protocol(e) => e.is_connection_level(),
            _ => false,
        }
    }

    /// Returns the severity of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(e) => e.severity(),
            Self::ConnectionNotReady { .. } => ErrorSeverity::Warning,
            Self::TagResolution { .. } => ErrorSeverity::Warning,
            Self::SessionDetached { .. } => ErrorSeverity::Warning,
            Self::Write { .. } => ErrorSeverity::Warning,
            Self::Protocol(_) => ErrorSeverity::Error,
            Self::InvalidArgument(_) => ErrorSeverity::Error,
        }
    }

    /// Returns the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::ConnectionNotReady { .. } => "connection_not_ready",
            Self::TagResolution { .. } => "tag_resolution",
            Self::SessionDetached { .. } => "session_detached",
            Self::Write { .. } => "write",
            Self::Protocol(_) => "protocol",
            Self::InvalidArgument(_) => "invalid_argument",
        }
    }

    /// Returns the numeric error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::ConnectionNotReady { .. } => ErrorCode::new(2, 1),
            Self::TagResolution { source, .. } => ErrorCode::new(3, source.kind.code()),
            Self::SessionDetached { .. } => ErrorCode::new(4, 1),
            Self::Write { .. } => ErrorCode::new(5, 1),
            Self::Protocol(e) => ErrorCode::new(6, e.kind.code()),
            Self::InvalidArgument(_) => ErrorCode::new(7, 1),
        }
    }

    /// Returns the tracing level matching the severity.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Emits a structured log event for this error.
    pub fn log(&self, context: &str) {
        let code = self.error_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection level failures.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The driver handshake failed.
    #[error("Handshake with {endpoint} failed: {source}")]
    Handshake {
        /// Endpoint description.
        endpoint: String,
        /// Driver failure.
        #[source]
        source: DriverError,
    },

    /// The handshake did not finish within the socket timeout.
    #[error("Connecting to {endpoint} timed out after {timeout:?}")]
    TimedOut {
        /// Endpoint description.
        endpoint: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// `connect` was called while the connection was not disconnected.
    #[error("Cannot connect: connection is {state}")]
    AlreadyActive {
        /// State at the time of the call.
        state: ConnectionState,
    },

    /// A disconnect raced the handshake and won.
    #[error("Connecting to {endpoint} was aborted by a disconnect")]
    Aborted {
        /// Endpoint description.
        endpoint: String,
    },

    /// The link failed after it was established.
    #[error("Connection lost: {reason}")]
    Lost {
        /// Failure description.
        reason: String,
    },

    /// The connection was closed by the operator.
    #[error("Connection closed")]
    Closed,
}

impl ConnectionError {
    /// Creates a handshake failure.
    pub fn handshake(endpoint: impl Into<String>, source: DriverError) -> Self {
        Self::Handshake {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Creates a lost-link failure.
    pub fn lost(reason: impl Into<String>) -> Self {
        Self::Lost {
            reason: reason.into(),
        }
    }

    /// Returns `true` if reconnecting may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handshake { source, .. } => source.is_retryable(),
            Self::TimedOut { .. } | Self::Aborted { .. } | Self::Lost { .. } => true,
            Self::AlreadyActive { .. } | Self::Closed => false,
        }
    }

    /// Returns the severity of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Handshake { .. } | Self::TimedOut { .. } | Self::Lost { .. } => {
                ErrorSeverity::Error
            }
            Self::AlreadyActive { .. } | Self::Aborted { .. } => ErrorSeverity::Warning,
            Self::Closed => ErrorSeverity::Info,
        }
    }

    /// Returns the numeric error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Handshake { .. } => 1,
            Self::TimedOut { .. } => 2,
            Self::AlreadyActive { .. } => 3,
            Self::Aborted { .. } => 4,
            Self::Lost { .. } => 5,
            Self::Closed => 6,
        };
        ErrorCode::new(1, code)
    }
}

// =============================================================================
// DriverError
// =============================================================================

/// Classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    /// The transport failed (socket, RPC channel).
    Transport,
    /// The driver call did not complete in time.
    Timeout,
    /// The referenced item or node does not exist.
    NotFound,
    /// The caller lacks rights for the operation.
    AccessDenied,
    /// The server refused the request.
    Rejected,
    /// The driver does not implement the primitive.
    Unsupported,
    /// Anything else.
    Internal,
}

impl DriverErrorKind {
    fn code(&self) -> u8 {
        match self {
            Self::Transport => 1,
            Self::Timeout => 2,
            Self::NotFound => 3,
            Self::AccessDenied => 4,
            Self::Rejected => 5,
            Self::Unsupported => 6,
            Self::Internal => 7,
        }
    }
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport error",
            Self::Timeout => "timeout",
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::Rejected => "rejected",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Opaque failure reported by a protocol driver.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct DriverError {
    /// Failure class.
    pub kind: DriverErrorKind,
    /// Driver supplied message.
    pub message: String,
    /// Native status code, when the driver has one.
    pub code: Option<u32>,
}

impl DriverError {
    /// Creates a driver error.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Creates a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Transport, message)
    }

    /// Creates a timeout failure.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Timeout, message)
    }

    /// Creates a not-found failure.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::NotFound, message)
    }

    /// Creates an access-denied failure.
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::AccessDenied, message)
    }

    /// Creates a rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Rejected, message)
    }

    /// Creates an unsupported-primitive failure.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Unsupported, message)
    }

    /// Creates an internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Internal, message)
    }

    /// Attaches the native status code.
    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    /// Returns `true` if the failure invalidates the whole link.
    pub fn is_connection_level(&self) -> bool {
        matches!(self.kind, DriverErrorKind::Transport | DriverErrorKind::Timeout)
    }

    /// Returns `true` if a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::Transport | DriverErrorKind::Timeout | DriverErrorKind::Internal
        )
    }
}

// =============================================================================
// ErrorSeverity / ErrorCode
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to a tracing level.
    pub fn to_tracing_level(&self) -> Level {
        match self {
            Self::Info => Level::DEBUG,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the severity name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable numeric error code, rendered as `OB-CCNN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode {
    /// Category (1-9).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OB-{:02}{:02}", self.category, self.code)
    }
}

// =============================================================================
// Tests
// =============================================================================
