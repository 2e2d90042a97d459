// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parking-lock wire protocol: framing codec and command table.
//!
//! Frame layout (little-endian integers throughout):
//!
//! ```text
//! +--------+-----------+------------+-----------+---------+---------+-------+--------+
//! | 0xDA   | CheckCode | Length (2) | MapFactor | Command | Payload | CRC16 | 0xDD   |
//! +--------+-----------+------------+-----------+---------+---------+-------+--------+
//! ```
//!
//! `Length` counts the whole frame, header to footer. The CRC16 (Modbus
//! variant) covers every byte preceding the CRC field. CheckCode and
//! MapFactor are emitted as zero and not interpreted on receive.

pub mod heartbeat;
pub mod reader;

/// Frame header sentinel.
pub const FRAME_HEADER: u8 = 0xDA;

/// Frame footer sentinel.
pub const FRAME_FOOTER: u8 = 0xDD;

/// Bytes a frame occupies beyond its payload (header, check code, length,
/// map factor, command, CRC16, footer).
pub const FRAME_OVERHEAD: usize = 9;

/// Smallest byte count `parse` will look at.
pub const MIN_FRAME_LEN: usize = 8;

/// 8-byte device identifier - the registry key.
pub type SerialNumber = [u8; 8];

/// Command bytes observed on the wire.
pub mod command {
    /// Device reports a car-state change.
    pub const CAR_STATUS: u8 = 0x60;
    /// Device login carrying its serial number.
    pub const LOGIN: u8 = 0x80;
    /// Periodic telemetry.
    pub const HEARTBEAT: u8 = 0x81;
    /// Operator: raise the lock.
    pub const REMOTE_OPEN: u8 = 0x84;
    /// Operator: lower the lock.
    pub const REMOTE_CLOSE: u8 = 0x85;
    /// Operator: push the current unix time to the device.
    pub const SYNC_TIME: u8 = 0x86;
    /// Device confirms an order (hold-down models).
    pub const ORDER_CONFIRM: u8 = 0x87;
    /// Device completes an order (hold-up models).
    pub const ORDER_COMPLETE: u8 = 0x88;
    /// Device reports a fault.
    pub const DEVICE_FAULT: u8 = 0x89;
    /// Operator: set the hold state (normal / hold open / hold close).
    pub const SET_LOCK_STATE: u8 = 0x8E;
    /// Operator: reboot the device.
    pub const REMOTE_RESTART: u8 = 0x8F;

    /// Human-readable command name for logging.
    pub fn name(command: u8) -> &'static str {
        match command {
            CAR_STATUS => "car status change",
            LOGIN => "device login",
            HEARTBEAT => "heartbeat",
            REMOTE_OPEN => "remote open",
            REMOTE_CLOSE => "remote close",
            SYNC_TIME => "time sync",
            ORDER_CONFIRM => "order confirm",
            ORDER_COMPLETE => "order complete",
            DEVICE_FAULT => "device fault",
            SET_LOCK_STATE => "set lock state",
            REMOTE_RESTART => "remote restart",
            _ => "unknown",
        }
    }
}

/// A parsed frame: command byte plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub payload: Vec<u8>,
}

/// CRC16 over `data`, Modbus variant: initial 0xFFFF, polynomial 0xA001,
/// processed least-significant-bit first. Serialized little-endian on the
/// wire.
pub fn crc16(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

/// Parse one complete frame.
///
/// Validates the header/footer sentinels, the declared length against the
/// actual byte count, and the trailing CRC16. Check code and map factor
/// are accepted as-is.
pub fn parse(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort(bytes.len()));
    }
    if bytes[0] != FRAME_HEADER {
        return Err(FrameError::BadHeader(bytes[0]));
    }
    if bytes[bytes.len() - 1] != FRAME_FOOTER {
        return Err(FrameError::BadFooter(bytes[bytes.len() - 1]));
    }

    let declared = bytes[2] as usize | (bytes[3] as usize) << 8;
    if declared != bytes.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let received = bytes[bytes.len() - 3] as u16 | (bytes[bytes.len() - 2] as u16) << 8;
    let calculated = crc16(&bytes[..bytes.len() - 3]);
    if received != calculated {
        return Err(FrameError::CrcMismatch {
            calculated,
            received,
        });
    }

    Ok(Frame {
        command: bytes[5],
        payload: bytes[6..bytes.len() - 3].to_vec(),
    })
}

/// Build a frame around `command` and `payload`.
pub fn build(command: u8, payload: &[u8]) -> Vec<u8> {
    let frame_length = FRAME_OVERHEAD + payload.len();
    let mut frame = Vec::with_capacity(frame_length);
    frame.push(FRAME_HEADER);
    frame.push(0x00); // check code
    frame.push((frame_length & 0xFF) as u8);
    frame.push((frame_length >> 8) as u8);
    frame.push(0x00); // map factor
    frame.push(command);
    frame.extend_from_slice(payload);

    let crc = crc16(&frame);
    frame.push((crc & 0xFF) as u8);
    frame.push((crc >> 8) as u8);
    frame.push(FRAME_FOOTER);
    frame
}

/// Parse a lowercase-hex serial number as used by the HTTP surface.
pub fn parse_serial(s: &str) -> Result<SerialNumber, FrameError> {
    let bytes = hex::decode(s).map_err(|_| FrameError::InvalidSerial(s.to_string()))?;
    if bytes.len() != 8 {
        return Err(FrameError::InvalidSerial(s.to_string()));
    }
    let mut serial = [0u8; 8];
    serial.copy_from_slice(&bytes);
    Ok(serial)
}

/// External representation of a serial number: lowercase hex, no separators.
pub fn serial_hex(serial: &SerialNumber) -> String {
    hex::encode(serial)
}

/// Framing and payload decode errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    TooShort(usize),
    BadHeader(u8),
    BadFooter(u8),
    LengthMismatch { declared: usize, actual: usize },
    CrcMismatch { calculated: u16, received: u16 },
    PayloadTooShort { expected: usize, actual: usize },
    InvalidSerial(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort(n) => write!(f, "Frame too short: {} bytes", n),
            Self::BadHeader(b) => write!(f, "Invalid frame header: 0x{:02X}", b),
            Self::BadFooter(b) => write!(f, "Invalid frame footer: 0x{:02X}", b),
            Self::LengthMismatch { declared, actual } => {
                write!(f, "Frame length mismatch: declared {}, got {}", declared, actual)
            }
            Self::CrcMismatch {
                calculated,
                received,
            } => write!(
                f,
                "CRC mismatch: calculated 0x{:04X}, received 0x{:04X}",
                calculated, received
            ),
            Self::PayloadTooShort { expected, actual } => {
                write!(f, "Payload too short: need {} bytes, got {}", expected, actual)
            }
            Self::InvalidSerial(s) => write!(f, "Invalid serial number: {:?}", s),
        }
    }
}

impl std::error::Error for FrameError {}

/// Hex encoding/decoding utilities.
pub mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, ()> {
        if s.len() % 2 != 0 {
            return Err(());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_reference_value() {
        // Modbus check value for the standard "123456789" test input.
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_build_golden_vectors() {
        // Empty login reply body; CRC over DA 00 09 00 00 80 is 0x1D11.
        assert_eq!(
            build(command::LOGIN, &[]),
            hex::decode("da0009000080111ddd").unwrap()
        );
        // Single-byte ACK.
        assert_eq!(
            build(command::ORDER_CONFIRM, &[0x01]),
            hex::decode("da000a000087015afcdd").unwrap()
        );
        // Empty restart frame.
        assert_eq!(
            build(command::REMOTE_RESTART, &[]),
            hex::decode("da000900008f5119dd").unwrap()
        );
        // Heartbeat reply carrying unix time 1700000000 LE.
        assert_eq!(
            build(command::HEARTBEAT, &1_700_000_000u32.to_le_bytes()),
            hex::decode("da000d00008100f153650421dd").unwrap()
        );
    }

    #[test]
    fn test_parse_build_roundtrip() {
        for len in [0usize, 1, 8, 39, 255, 1024] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let bytes = build(command::HEARTBEAT, &payload);
            let frame = parse(&bytes).unwrap();
            assert_eq!(frame.command, command::HEARTBEAT);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert_eq!(parse(&[0xDA, 0x00, 0x08]), Err(FrameError::TooShort(3)));
    }

    #[test]
    fn test_parse_rejects_bad_sentinels() {
        let mut bytes = build(command::LOGIN, &[]);
        bytes[0] = 0xDB;
        assert_eq!(parse(&bytes), Err(FrameError::BadHeader(0xDB)));

        let mut bytes = build(command::LOGIN, &[]);
        let last = bytes.len() - 1;
        bytes[last] = 0xDE;
        assert_eq!(parse(&bytes), Err(FrameError::BadFooter(0xDE)));
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let mut bytes = build(command::LOGIN, &[0x01, 0x02]);
        bytes[2] = 0x20;
        assert!(matches!(
            parse(&bytes),
            Err(FrameError::LengthMismatch { declared: 0x20, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_corrupt_crc() {
        let mut bytes = build(command::HEARTBEAT, &[0xAA, 0xBB]);
        bytes[7] ^= 0xFF; // flip a payload byte, CRC no longer matches
        assert!(matches!(parse(&bytes), Err(FrameError::CrcMismatch { .. })));
    }

    #[test]
    fn test_nonzero_check_code_and_map_factor_accepted() {
        // The emitter always writes zeros, but the parser must not reject
        // frames where the device populated these bytes.
        let mut bytes = build(command::LOGIN, &[1, 2, 3, 4, 5, 6, 7, 8]);
        bytes[1] = 0x5A;
        bytes[4] = 0x03;
        let crc = crc16(&bytes[..bytes.len() - 3]);
        let len = bytes.len();
        bytes[len - 3] = (crc & 0xFF) as u8;
        bytes[len - 2] = (crc >> 8) as u8;
        let frame = parse(&bytes).unwrap();
        assert_eq!(frame.command, command::LOGIN);
    }

    #[test]
    fn test_serial_hex_roundtrip() {
        let serial: SerialNumber = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let s = serial_hex(&serial);
        assert_eq!(s, "0102030405060708");
        assert_eq!(parse_serial(&s).unwrap(), serial);
    }

    #[test]
    fn test_parse_serial_rejects_bad_input() {
        assert!(parse_serial("0102").is_err()); // too short
        assert!(parse_serial("01020304050607zz").is_err()); // not hex
        assert!(parse_serial("010203040506070809").is_err()); // too long
    }

    #[test]
    fn test_command_names() {
        assert_eq!(command::name(command::LOGIN), "device login");
        assert_eq!(command::name(command::SET_LOCK_STATE), "set lock state");
        assert_eq!(command::name(0x42), "unknown");
    }
}
