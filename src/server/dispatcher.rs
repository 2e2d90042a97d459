// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operator command dispatch.
//!
//! Each operation looks the target up in the registry, builds the command
//! frame and writes it through the session's write path. The flow number
//! is a short rolling identifier (`now mod 10000`) the device echoes back
//! in order-related frames.

use super::registry::DeviceRegistry;
use crate::protocol::{self, command, SerialNumber};
use std::sync::Arc;
use tracing::info;

/// Hold-state values accepted by the 0x8E command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Normal,
    HoldOpen,
    HoldClose,
}

impl LockState {
    pub fn code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::HoldOpen => 1,
            Self::HoldClose => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::HoldOpen),
            2 => Some(Self::HoldClose),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::HoldOpen => "hold open",
            Self::HoldClose => "hold close",
        }
    }
}

/// Routes operator requests to the target device's session.
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Raise the lock (0x84).
    pub async fn open_lock(&self, serial: &SerialNumber) -> Result<(), DispatchError> {
        let mut payload = serial.to_vec();
        payload.extend_from_slice(&flow_number().to_le_bytes());
        self.dispatch(serial, command::REMOTE_OPEN, &payload).await
    }

    /// Lower the lock (0x85).
    pub async fn close_lock(&self, serial: &SerialNumber) -> Result<(), DispatchError> {
        let mut payload = serial.to_vec();
        payload.extend_from_slice(&flow_number().to_le_bytes());
        self.dispatch(serial, command::REMOTE_CLOSE, &payload).await
    }

    /// Set the hold state (0x8E).
    pub async fn set_lock_state(
        &self,
        serial: &SerialNumber,
        state: LockState,
    ) -> Result<(), DispatchError> {
        let mut payload = serial.to_vec();
        payload.extend_from_slice(&flow_number().to_le_bytes());
        payload.push(state.code());
        self.dispatch(serial, command::SET_LOCK_STATE, &payload).await
    }

    /// Push the current unix time to the device (0x86).
    pub async fn sync_time(&self, serial: &SerialNumber) -> Result<(), DispatchError> {
        let mut payload = serial.to_vec();
        payload.extend_from_slice(&(super::unix_now() as u32).to_le_bytes());
        self.dispatch(serial, command::SYNC_TIME, &payload).await
    }

    /// Reboot the device (0x8F, empty payload).
    pub async fn restart(&self, serial: &SerialNumber) -> Result<(), DispatchError> {
        self.dispatch(serial, command::REMOTE_RESTART, &[]).await
    }

    async fn dispatch(
        &self,
        serial: &SerialNumber,
        cmd: u8,
        payload: &[u8],
    ) -> Result<(), DispatchError> {
        let session = self
            .registry
            .lookup(serial)
            .await
            .ok_or_else(|| DispatchError::NotConnected(protocol::serial_hex(serial)))?;

        let frame = protocol::build(cmd, payload);
        session
            .send_frame(&frame)
            .await
            .map_err(|e| DispatchError::Socket(e.to_string()))?;

        info!(
            command = command::name(cmd),
            serial = %protocol::serial_hex(serial),
            "operator command sent"
        );
        Ok(())
    }
}

/// Current flow number: unix seconds modulo 10000.
pub fn flow_number() -> u32 {
    (super::unix_now() % 10_000) as u32
}

/// Dispatch error types.
#[derive(Debug, Clone)]
pub enum DispatchError {
    /// No live session for the requested serial.
    NotConnected(String),
    /// The session's socket rejected the write.
    Socket(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected(serial) => write!(f, "Device {} not connected", serial),
            Self::Socket(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::DeviceSession;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    const SERIAL: SerialNumber = [1, 2, 3, 4, 5, 6, 7, 8];

    async fn connected_dispatcher() -> (CommandDispatcher, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (_read, write) = stream.into_split();

        let registry = Arc::new(DeviceRegistry::new());
        let session = DeviceSession::new(write, peer);
        registry.bind(SERIAL, &session).await;

        (CommandDispatcher::new(registry), client)
    }

    async fn read_frame(client: &mut TcpStream) -> crate::protocol::Frame {
        let mut reader = crate::protocol::reader::FrameReader::new(4096, 64 * 1024);
        let mut buf = [0u8; 256];
        loop {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed before a frame arrived");
            let frames = reader.feed(&buf[..n]).unwrap();
            if let Some(raw) = frames.into_iter().next() {
                return crate::protocol::parse(&raw).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_open_lock_frame_layout() {
        let (dispatcher, mut client) = connected_dispatcher().await;
        let before = flow_number();
        dispatcher.open_lock(&SERIAL).await.unwrap();
        let after = flow_number();

        let frame = read_frame(&mut client).await;
        assert_eq!(frame.command, command::REMOTE_OPEN);
        assert_eq!(&frame.payload[..8], &SERIAL);

        let flow = u32::from_le_bytes(frame.payload[8..12].try_into().unwrap());
        // Flow rolls with the clock; accept either side of a tick.
        assert!(flow == before || flow == after);
    }

    #[tokio::test]
    async fn test_set_lock_state_frame_layout() {
        let (dispatcher, mut client) = connected_dispatcher().await;
        dispatcher
            .set_lock_state(&SERIAL, LockState::HoldOpen)
            .await
            .unwrap();

        let frame = read_frame(&mut client).await;
        assert_eq!(frame.command, command::SET_LOCK_STATE);
        assert_eq!(frame.payload.len(), 13);
        assert_eq!(&frame.payload[..8], &SERIAL);
        assert_eq!(frame.payload[12], 1);
    }

    #[tokio::test]
    async fn test_sync_time_carries_unix_seconds() {
        let (dispatcher, mut client) = connected_dispatcher().await;
        dispatcher.sync_time(&SERIAL).await.unwrap();

        let frame = read_frame(&mut client).await;
        assert_eq!(frame.command, command::SYNC_TIME);
        let ts = u32::from_le_bytes(frame.payload[8..12].try_into().unwrap());
        let now = crate::server::unix_now() as u32;
        assert!(now.abs_diff(ts) <= 2);
    }

    #[tokio::test]
    async fn test_restart_has_empty_payload() {
        let (dispatcher, mut client) = connected_dispatcher().await;
        dispatcher.restart(&SERIAL).await.unwrap();

        let frame = read_frame(&mut client).await;
        assert_eq!(frame.command, command::REMOTE_RESTART);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_serial_fails_fast() {
        let registry = Arc::new(DeviceRegistry::new());
        let dispatcher = CommandDispatcher::new(registry);

        let err = dispatcher.open_lock(&SERIAL).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotConnected(_)));
        assert!(err.to_string().contains("0102030405060708"));
    }

    #[test]
    fn test_lock_state_codes() {
        assert_eq!(LockState::from_code(0), Some(LockState::Normal));
        assert_eq!(LockState::from_code(1), Some(LockState::HoldOpen));
        assert_eq!(LockState::from_code(2), Some(LockState::HoldClose));
        assert_eq!(LockState::from_code(3), None);
        assert_eq!(LockState::HoldClose.code(), 2);
        assert_eq!(LockState::HoldOpen.label(), "hold open");
    }
}
