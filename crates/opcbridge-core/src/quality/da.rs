// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Legacy protocol quality word.
//!
//! The value quality is a 16-bit word laid out as `VVVVVVVV QQSSSSLL`: vendor byte, two quality
//! bits, four sub-status bits and two limit bits. Operation results (writes) are HRESULTs.

use super::{OperationStatus, Quality, QualityDecoder, StatusLevel};
use crate::types::Protocol;

const QUALITY_MASK: u32 = 0xC0;
const STATUS_MASK: u32 = 0xFC;

const QUALITY_BAD: u32 = 0x00;
const QUALITY_UNCERTAIN: u32 = 0x40;
const QUALITY_GOOD: u32 = 0xC0;

const QUALITY_DESCRIPTIONS: &[(u32, &str)] = &[
    (0x00, "Bad: non-specific"),
    (0x04, "Bad: configuration error"),
    (0x08, "Bad: not connected"),
    (0x0C, "Bad: device failure"),
    (0x10, "Bad: sensor failure"),
    (0x14, "Bad: last known value"),
    (0x18, "Bad: communication failure"),
    (0x1C, "Bad: out of service"),
    (0x20, "Bad: waiting for initial data"),
    (0x40, "Uncertain: non-specific"),
    (0x44, "Uncertain: last usable value"),
    (0x50, "Uncertain: sensor not accurate"),
    (0x54, "Uncertain: engineering units exceeded"),
    (0x58, "Uncertain: sub-normal"),
    (0xC0, "Good: non-specific"),
    (0xD8, "Good: local override"),
];

const RESULT_DESCRIPTIONS: &[(u32, &str)] = &[
    (0x0000_0000, "Success"),
    (0x0000_0001, "Success with no effect"),
    (0x0004_000E, "Value was clamped to the item range"),
    (0x8000_4005, "Unspecified failure"),
    (0x8007_0005, "Access denied"),
    (0x8007_000E, "Out of memory"),
    (0x8007_0057, "Invalid argument"),
    (0x8007_06BA, "The RPC server is unavailable"),
    (0xC004_0001, "Invalid item handle"),
    (0xC004_0004, "Value cannot be converted to the item type"),
    (0xC004_0006, "Item is not writable"),
    (0xC004_0007, "Unknown item id"),
    (0xC004_0008, "Invalid item id"),
    (0xC004_000B, "Value is out of range"),
];

fn lookup(table: &[(u32, &'static str)], code: u32) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, d)| *d)
}

/// Decoder for the legacy protocol's quality word and HRESULT results.
#[derive(Debug, Clone, Copy, Default)]
pub struct DaQualityDecoder;

impl QualityDecoder for DaQualityDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Da
    }

    fn quality(&self, raw: u32) -> Quality {
        if raw > 0xFFFF {
            return Quality::Unknown;
        }
        match raw & QUALITY_MASK {
            QUALITY_GOOD => Quality::Good,
            QUALITY_UNCERTAIN => Quality::Uncertain,
            QUALITY_BAD => Quality::Bad,
            _ => Quality::Unknown,
        }
    }

    fn describe(&self, raw: u32) -> Option<&'static str> {
        if raw > 0xFFFF {
            return None;
        }
        lookup(QUALITY_DESCRIPTIONS, raw & STATUS_MASK)
    }

    fn result_status(&self, raw: u32) -> OperationStatus {
        let level = if raw & 0x8000_0000 != 0 {
            StatusLevel::Error
        } else if raw == 0 {
            StatusLevel::Info
        } else {
            StatusLevel::Warning
        };
        OperationStatus::new(level, raw, lookup(RESULT_DESCRIPTIONS, raw).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_field() {
        let d = DaQualityDecoder;
        assert_eq!(d.quality(0xC0), Quality::Good);
        assert_eq!(d.quality(0xD8), Quality::Good);
        assert_eq!(d.quality(0x44), Quality::Uncertain);
        assert_eq!(d.quality(0x18), Quality::Bad);
        // 10 in the quality bits is not assigned
        assert_eq!(d.quality(0x80), Quality::Unknown);
        assert_eq!(d.quality(0x1_00C0), Quality::Unknown);
    }

    #[test]
    fn test_limit_and_vendor_bits_ignored() {
        let d = DaQualityDecoder;
        assert_eq!(d.quality(0x12C3), Quality::Good);
        assert_eq!(d.describe(0x0047), Some("Uncertain: last usable value"));
    }

    #[test]
    fn test_operation_status() {
        let d = DaQualityDecoder;
        let status = d.operation_status(0x1C);
        assert_eq!(status.level, StatusLevel::Error);
        assert_eq!(status.detail.as_deref(), Some("Bad: out of service"));

        let status = d.operation_status(0xC4);
        assert_eq!(status.level, StatusLevel::Info);
        assert_eq!(status.detail, None);
    }

    #[test]
    fn test_result_status() {
        let d = DaQualityDecoder;
        assert!(d.result_status(0).is_ok());
        assert_eq!(d.result_status(0x0004_000E).level, StatusLevel::Warning);

        let rejected = d.result_status(0xC004_0006);
        assert!(rejected.is_error());
        assert_eq!(rejected.detail.as_deref(), Some("Item is not writable"));
    }
}
