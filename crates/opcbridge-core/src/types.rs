// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types shared by every component of the engine.
//!
//! - [`Value`] / [`DataType`]: normalized tag values and their kinds
//! - [`OpcData`]: one sample of a tag (value, quality, timestamp, status)
//! - [`SessionId`], [`ConnectionId`]: identifiers for registry lookups and logs
//! - [`HandlePair`]: the resolved (server, client) handle of a tag
//! - [`BrowseNode`], [`ServerState`], [`Protocol`]: driver facing descriptors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::quality::{OperationStatus, Quality};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a session within its owning connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier of a connection object, stable across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Creates a fresh random connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group of the uuid is enough to tell connections apart in logs.
        let simple = self.0.simple().to_string();
        write!(f, "conn-{}", &simple[..8])
    }
}

/// Locally generated correlation id of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientHandle(pub u32);

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Server assigned identifier of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerHandle(pub u32);

impl fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sh-{}", self.0)
    }
}

/// A resolved tag: the server handle plus the client correlation id it was registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlePair {
    /// Server assigned handle.
    pub server: ServerHandle,
    /// Client correlation id.
    pub client: ClientHandle,
}

impl HandlePair {
    /// Creates a new handle pair.
    pub fn new(server: ServerHandle, client: ClientHandle) -> Self {
        Self { server, client }
    }
}

// =============================================================================
// Protocol
// =============================================================================

/// The protocol family a driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Legacy COM/RPC based point protocol (OPC DA).
    Da,
    /// Binary session protocol (OPC UA).
    Ua,
}

impl Protocol {
    /// Short name used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Da => "da",
            Self::Ua => "ua",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Currency
// =============================================================================

/// Fixed point currency amount stored in ten-thousandths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Currency(pub i64);

impl Currency {
    /// Number of fractional units per whole unit.
    pub const SCALE: i64 = 10_000;

    /// Creates a currency value from its raw scaled representation.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Converts a floating point amount, rounding to the nearest ten-thousandth.
    pub fn from_f64(amount: f64) -> Option<Self> {
        let scaled = (amount * Self::SCALE as f64).round();
        if scaled.is_finite() && scaled >= i64::MIN as f64 && scaled <= i64::MAX as f64 {
            Some(Self(scaled as i64))
        } else {
            None
        }
    }

    /// Returns the amount as a float.
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        write!(f, "{}{}.{:04}", sign, abs / scale, abs % scale)
    }
}

// =============================================================================
// DataType
// =============================================================================

/// Kind of a normalized value, used for per-tag type overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Boolean
    Bool,
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// String
    String,
    /// Byte array
    Bytes,
    /// Date/time
    DateTime,
    /// Currency
    Currency,
    /// No declared type; values pass through unchanged.
    #[default]
    Unknown,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::DateTime => "datetime",
            Self::Currency => "currency",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Value
// =============================================================================

/// A normalized tag value.
///
/// Drivers convert their native variants into this representation; the engine never looks at
/// protocol specific encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Signed 8-bit integer
    Int8(i8),
    /// Signed 16-bit integer
    Int16(i16),
    /// Signed 32-bit integer
    Int32(i32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 8-bit integer
    UInt8(u8),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Timestamp
    DateTime(DateTime<Utc>),
    /// Fixed point currency
    Currency(Currency),
    /// Array of values
    Array(Vec<Value>),
    /// No value (bad reads, unresolved tags)
    #[default]
    Null,
}

impl Value {
    /// Returns the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt8(_) => "uint8",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::Currency(_) => "currency",
            Value::Array(_) => "array",
            Value::Null => "null",
        }
    }

    /// Returns `true` if this is the null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to convert this value to a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Some(true),
                "false" | "0" | "off" => Some(false),
                _ => None,
            },
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Attempts to convert this value to an i64. Floats are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Float32(v) if v.is_finite() => Some(*v as i64),
            Value::Float64(v) if v.is_finite() => Some(*v as i64),
            Value::Currency(c) => Some(c.0 / Currency::SCALE),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            Value::UInt64(v) => Some(*v as f64),
            Value::Currency(c) => Some(c.to_f64()),
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the string payload if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts this value to the requested kind.
    ///
    /// Returns `None` when the value cannot be represented in the target kind
    /// (out of range, unparsable string, incompatible variant).
    pub fn coerce(&self, target: DataType) -> Option<Value> {
        fn int<T: TryFrom<i64>>(v: &Value) -> Option<T> {
            v.as_i64().and_then(|i| T::try_from(i).ok())
        }

        match target {
            DataType::Unknown => Some(self.clone()),
            DataType::Bool => self.as_bool().map(Value::Bool),
            DataType::Int8 => int(self).map(Value::Int8),
            DataType::Int16 => int(self).map(Value::Int16),
            DataType::Int32 => int(self).map(Value::Int32),
            DataType::Int64 => self.as_i64().map(Value::Int64),
            DataType::UInt8 => int(self).map(Value::UInt8),
            DataType::UInt16 => int(self).map(Value::UInt16),
            DataType::UInt32 => int(self).map(Value::UInt32),
            DataType::UInt64 => match self {
                Value::UInt64(v) => Some(Value::UInt64(*v)),
                other => int(other).map(Value::UInt64),
            },
            DataType::Float32 => self.as_f64().map(|v| Value::Float32(v as f32)),
            DataType::Float64 => self.as_f64().map(Value::Float64),
            DataType::String => match self {
                Value::Null | Value::Array(_) | Value::Bytes(_) => None,
                other => Some(Value::String(other.to_string())),
            },
            DataType::Bytes => match self {
                Value::Bytes(b) => Some(Value::Bytes(b.clone())),
                Value::String(s) => Some(Value::Bytes(s.as_bytes().to_vec())),
                _ => None,
            },
            DataType::DateTime => match self {
                Value::DateTime(d) => Some(Value::DateTime(*d)),
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|d| Value::DateTime(d.with_timezone(&Utc))),
                _ => None,
            },
            DataType::Currency => match self {
                Value::Currency(c) => Some(Value::Currency(*c)),
                other => other.as_f64().and_then(Currency::from_f64).map(Value::Currency),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Currency(v) => write!(f, "{}", v),
            Value::Array(v) => write!(f, "[{} elements]", v.len()),
            Value::Null => write!(f, "null"),
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int8, i8);
impl_from_for_value!(Int16, i16);
impl_from_for_value!(Int32, i32);
impl_from_for_value!(Int64, i64);
impl_from_for_value!(UInt8, u8);
impl_from_for_value!(UInt16, u16);
impl_from_for_value!(UInt32, u32);
impl_from_for_value!(UInt64, u64);
impl_from_for_value!(Float32, f32);
impl_from_for_value!(Float64, f64);
impl_from_for_value!(String, String);
impl_from_for_value!(Bytes, Vec<u8>);
impl_from_for_value!(DateTime, DateTime<Utc>);
impl_from_for_value!(Currency, Currency);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

// =============================================================================
// OpcData
// =============================================================================

/// One sample of a tag as delivered by reads and streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpcData {
    /// Tag name.
    pub tag: String,
    /// Source timestamp of the value.
    pub timestamp: DateTime<Utc>,
    /// Reduced quality.
    pub quality: Quality,
    /// Normalized value.
    pub value: Value,
    /// Outcome of the operation that produced this sample.
    pub status: OperationStatus,
}

impl OpcData {
    /// Creates a sample with `Good` quality and an informational status.
    pub fn new(tag: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            tag: tag.into(),
            timestamp: Utc::now(),
            quality: Quality::Good,
            value: value.into(),
            status: OperationStatus::ok(),
        }
    }

    /// Creates a valueless sample carrying a failure status.
    pub fn failed(tag: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            tag: tag.into(),
            timestamp: Utc::now(),
            quality: Quality::Bad,
            value: Value::Null,
            status,
        }
    }

    /// Sets the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the quality.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns `true` if the other sample carries the same reading.
    ///
    /// Timestamps are ignored: two polls of an unchanged tag compare equal.
    pub fn same_reading(&self, other: &OpcData) -> bool {
        self.value == other.value && self.quality == other.quality
    }
}

impl fmt::Display for OpcData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} [{}] @ {}",
            self.tag,
            self.value,
            self.quality,
            self.timestamp.to_rfc3339()
        )
    }
}

// =============================================================================
// Driver facing descriptors
// =============================================================================

/// Server state reported by the driver's status primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Server is running normally.
    Running,
    /// Server is suspended.
    Suspended,
    /// Server is in a failed state.
    Failed,
    /// Server has no configuration loaded.
    NoConfiguration,
    /// Server is in test mode.
    Test,
    /// Server is shutting down.
    Shutdown,
    /// Any other state.
    Unknown,
}

impl ServerState {
    /// Returns `true` if the server is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
            Self::NoConfiguration => "no_configuration",
            Self::Test => "test",
            Self::Shutdown => "shutdown",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A child node returned by browsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseNode {
    /// Fully qualified id (usable as a tag name for leaves).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether the node can be browsed further.
    pub has_children: bool,
}

impl BrowseNode {
    /// Creates a leaf node.
    pub fn leaf(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            has_children: false,
        }
    }

    /// Creates a branch node.
    pub fn branch(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            has_children: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
