// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Conversion of raw driver samples into [`OpcData`].

use std::sync::Arc;

use crate::driver::RawSample;
use crate::quality::{OperationStatus, QualityDecoder, StatusLevel};
use crate::profile::SessionProfile;
use crate::types::{OpcData, Value};

/// Applies quality decoding and the session's type overrides.
#[derive(Clone)]
pub(crate) struct SampleDecoder {
    quality: &'static dyn QualityDecoder,
    profile: Arc<SessionProfile>,
}

impl SampleDecoder {
    pub(crate) fn new(quality: &'static dyn QualityDecoder, profile: Arc<SessionProfile>) -> Self {
        Self { quality, profile }
    }

    /// Builds the sample delivered to callers.
    pub(crate) fn decode(&self, tag: &str, raw: RawSample) -> OpcData {
        let quality = self.quality.quality(raw.quality);
        let mut status = self.quality.operation_status(raw.quality);

        let value = match self.profile.type_override(tag) {
            Some(target) if !raw.value.is_null() => match raw.value.coerce(target) {
                Some(value) => value,
                None => {
                    if status.level == StatusLevel::Info {
                        status = OperationStatus::warning(
                            raw.quality,
                            format!("cannot convert {} to {}", raw.value.type_name(), target),
                        );
                    }
                    raw.value
                }
            },
            _ => raw.value,
        };

        OpcData {
            tag: tag.to_string(),
            timestamp: raw.timestamp,
            quality,
            value,
            status,
        }
    }

    /// Converts an outgoing value to the tag's declared type.
    pub(crate) fn encode(&self, tag: &str, value: &Value) -> Result<Value, OperationStatus> {
        match self.profile.type_override(tag) {
            Some(target) => value.coerce(target).ok_or_else(|| {
                OperationStatus::error(
                    0,
                    format!("cannot convert {} to {}", value.type_name(), target),
                )
            }),
            None => Ok(value.clone()),
        }
    }

    /// Status of a raw write result.
    pub(crate) fn write_status(&self, raw: u32) -> OperationStatus {
        self.quality.result_status(raw)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::quality::{decoder_for, Quality};
    use crate::types::{DataType, Protocol};

    fn decoder() -> SampleDecoder {
        let profile = SessionProfile::builder()
            .type_override("Speed", DataType::Float32)
            .type_override("Mode", DataType::Int16)
            .build()
            .unwrap();
        SampleDecoder::new(decoder_for(Protocol::Da), Arc::new(profile))
    }

    #[test]
    fn test_decode_applies_override() {
        let data = decoder().decode("Speed", RawSample::new(12i32, 0xC0, Utc::now()));
        assert_eq!(data.value, Value::Float32(12.0));
        assert_eq!(data.quality, Quality::Good);
        assert!(data.status.is_ok());
    }

    #[test]
    fn test_decode_failed_coercion_warns() {
        let data = decoder().decode("Mode", RawSample::new("auto", 0xC0, Utc::now()));
        assert_eq!(data.value, Value::String("auto".into()));
        assert_eq!(data.status.level, StatusLevel::Warning);
    }

    #[test]
    fn test_decode_bad_quality() {
        let data = decoder().decode("Other", RawSample::new(Value::Null, 0x18, Utc::now()));
        assert_eq!(data.quality, Quality::Bad);
        assert!(data.status.is_error());
        assert_eq!(data.status.detail.as_deref(), Some("Bad: communication failure"));
    }

    #[test]
    fn test_encode() {
        let d = decoder();
        assert_eq!(d.encode("Mode", &Value::Float64(3.0)), Ok(Value::Int16(3)));
        assert!(d.encode("Mode", &Value::String("x".into())).is_err());
        assert_eq!(d.encode("Free", &Value::Bool(true)), Ok(Value::Bool(true)));
    }
}
