// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat (0x81) payload decoding.
//!
//! The payload is a fixed-offset little-endian record. Everything through
//! the no-car ratio (38 bytes) is mandatory; the trailing control-status
//! byte is optional and defaults to 0 on older firmware.

use super::{FrameError, SerialNumber};

/// Decoded 0x81 telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatReport {
    pub serial: SerialNumber,
    pub action_step: u8,
    /// 0 = dry, 1 = water detected.
    pub water_detection: u8,
    pub battery_3_7v: u8,
    /// Cellular signal strength, 0-99.
    pub signal_strength: u8,
    pub flow_number: u32,
    pub device_type: u8,
    /// Volts; the wire carries the value times ten.
    pub battery_12v: f64,
    pub device_status: u8,
    pub car_status: u8,
    pub error_code: u16,
    pub current_frequency: u32,
    pub no_car_base: u32,
    pub car_base: u32,
    pub car_ratio: u16,
    pub no_car_ratio: u16,
    pub control_status: u8,
}

impl HeartbeatReport {
    /// Decode a heartbeat payload. Requires at least 32 bytes; the
    /// control-status byte at offset 38 defaults to 0 when absent.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < 32 {
            return Err(FrameError::PayloadTooShort {
                expected: 32,
                actual: payload.len(),
            });
        }

        let mut serial = [0u8; 8];
        serial.copy_from_slice(&payload[..8]);

        Ok(Self {
            serial,
            action_step: payload[8],
            water_detection: payload[9],
            battery_3_7v: payload[10],
            signal_strength: payload[11],
            flow_number: u32_le(payload, 12),
            device_type: payload[16],
            battery_12v: f64::from(payload[17]) / 10.0,
            device_status: payload[18],
            car_status: payload[19],
            error_code: u16_le(payload, 20),
            current_frequency: u32_le(payload, 22),
            no_car_base: u32_le(payload, 26),
            car_base: if payload.len() >= 34 { u32_le(payload, 30) } else { 0 },
            car_ratio: if payload.len() >= 36 { u16_le(payload, 34) } else { 0 },
            no_car_ratio: if payload.len() >= 38 { u16_le(payload, 36) } else { 0 },
            control_status: if payload.len() > 38 { payload[38] } else { 0 },
        })
    }

    pub fn device_status_label(&self) -> String {
        device_status_label(self.device_status)
    }

    pub fn car_status_label(&self) -> String {
        car_status_label(self.car_status)
    }

    pub fn control_status_label(&self) -> String {
        control_status_label(self.control_status)
    }

    pub fn water_detection_label(&self) -> &'static str {
        water_detection_label(self.water_detection)
    }

    pub fn has_error(&self) -> bool {
        self.error_code != 0
    }

    /// Descriptions of every error bit set in `error_code`.
    pub fn error_labels(&self) -> Vec<&'static str> {
        error_labels(self.error_code)
    }
}

pub fn device_status_label(code: u8) -> String {
    match code {
        0 => "power-on init".into(),
        1 => "lock raised in place".into(),
        2 => "lock lowered in place".into(),
        3 => "lock raise error".into(),
        4 => "lock lower error".into(),
        5 => "lock moving, not yet in place".into(),
        6 => "ground sensor error".into(),
        9 => "car on device".into(),
        other => format!("unknown({})", other),
    }
}

pub fn car_status_label(code: u8) -> String {
    match code {
        0 => "ready".into(),
        1 => "car present".into(),
        2 => "no car".into(),
        other => format!("unknown({})", other),
    }
}

pub fn control_status_label(code: u8) -> String {
    match code {
        0 => "normal".into(),
        1 => "hold open".into(),
        2 => "hold close".into(),
        other => format!("unknown({})", other),
    }
}

/// The webhook contract carries the original device-manual wording.
pub fn water_detection_label(code: u8) -> &'static str {
    if code == 1 {
        "有水"
    } else {
        "无水"
    }
}

const ERROR_BITS: &[(u16, &str)] = &[
    (0x0001, "upper limit switch error"),
    (0x0002, "lower limit switch error"),
    (0x0004, "motor down stall"),
    (0x0008, "motor up stall"),
    (0x0010, "rise timeout"),
    (0x0020, "fall timeout"),
    (0x0040, "ground sensor fault"),
    (0x0080, "gear fault"),
    (0x0100, "motor coil fault"),
    (0x0200, "car-detect module fault"),
    (0x0400, "temporary hold-open"),
];

pub fn error_labels(error_code: u16) -> Vec<&'static str> {
    ERROR_BITS
        .iter()
        .filter(|(bit, _)| error_code & bit != 0)
        .map(|&(_, label)| label)
        .collect()
}

fn u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
