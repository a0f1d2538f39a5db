// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Modern protocol status codes.
//!
//! A status code is a 32-bit value whose two most significant bits carry the severity
//! (`00` good, `01` uncertain, `10` bad, `11` reserved). The next 14 bits identify the
//! sub-code; the low 16 bits hold info flags and are ignored for lookups.

use super::{Quality, QualityDecoder};
use crate::types::Protocol;

const SEVERITY_SHIFT: u32 = 30;
const CODE_MASK: u32 = 0xFFFF_0000;

const DESCRIPTIONS: &[(u32, &str)] = &[
    (0x0000_0000, "Good"),
    (0x0096_0000, "GoodLocalOverride"),
    (0x00A2_0000, "GoodClamped"),
    (0x4000_0000, "Uncertain"),
    (0x408F_0000, "UncertainNoCommunicationLastUsableValue"),
    (0x4090_0000, "UncertainLastUsableValue"),
    (0x4091_0000, "UncertainSubstituteValue"),
    (0x4092_0000, "UncertainInitialValue"),
    (0x4093_0000, "UncertainSensorNotAccurate"),
    (0x4094_0000, "UncertainEngineeringUnitsExceeded"),
    (0x4095_0000, "UncertainSubNormal"),
    (0x8000_0000, "Bad"),
    (0x8001_0000, "BadUnexpectedError"),
    (0x8002_0000, "BadInternalError"),
    (0x8003_0000, "BadOutOfMemory"),
    (0x8005_0000, "BadCommunicationError"),
    (0x800A_0000, "BadTimeout"),
    (0x800D_0000, "BadServerNotConnected"),
    (0x800E_0000, "BadServerHalted"),
    (0x801F_0000, "BadUserAccessDenied"),
    (0x8031_0000, "BadNoCommunication"),
    (0x8032_0000, "BadWaitingForInitialData"),
    (0x8033_0000, "BadNodeIdInvalid"),
    (0x8034_0000, "BadNodeIdUnknown"),
    (0x8035_0000, "BadAttributeIdInvalid"),
    (0x803A_0000, "BadNotReadable"),
    (0x803B_0000, "BadNotWritable"),
    (0x803C_0000, "BadOutOfRange"),
    (0x8074_0000, "BadTypeMismatch"),
];

/// Decoder for the modern protocol's status codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UaQualityDecoder;

impl QualityDecoder for UaQualityDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Ua
    }

    fn quality(&self, raw: u32) -> Quality {
        match raw >> SEVERITY_SHIFT {
            0b00 => Quality::Good,
            0b01 => Quality::Uncertain,
            0b10 => Quality::Bad,
            _ => Quality::Unknown,
        }
    }

    fn describe(&self, raw: u32) -> Option<&'static str> {
        let code = raw & CODE_MASK;
        DESCRIPTIONS
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, d)| *d)
    }
}
