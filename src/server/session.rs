// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-device session state and the connection read loop.
//!
//! Each accepted socket gets one read loop; writes from the read loop
//! (protocol replies) and from the dispatcher (operator commands) are
//! serialized by the session's write mutex. Frames are self-delimited, so
//! per-frame write atomicity is the only ordering the protocol needs.

use super::registry::{BindOutcome, DeviceRegistry};
use super::webhook::{StatusUpdate, WebhookSink};
use crate::config::GatewayConfig;
use crate::protocol::heartbeat::{self, HeartbeatReport};
use crate::protocol::reader::FrameReader;
use crate::protocol::{self, command, SerialNumber};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Live state for one connected device.
pub struct DeviceSession {
    peer_addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    serial: parking_lot::Mutex<Option<SerialNumber>>,
    telemetry: parking_lot::Mutex<Telemetry>,
    closed: Notify,
    close_flag: AtomicBool,
}

#[derive(Default)]
struct Telemetry {
    last_heartbeat: f64,
    report: Option<HeartbeatReport>,
    prev_device_status: Option<u8>,
    prev_car_status: Option<u8>,
}

impl DeviceSession {
    pub fn new(writer: OwnedWriteHalf, peer_addr: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            peer_addr,
            writer: Mutex::new(writer),
            serial: parking_lot::Mutex::new(None),
            telemetry: parking_lot::Mutex::new(Telemetry::default()),
            closed: Notify::new(),
            close_flag: AtomicBool::new(false),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The serial this session logged in with, if any.
    pub fn serial(&self) -> Option<SerialNumber> {
        *self.serial.lock()
    }

    pub(crate) fn bind_serial(&self, serial: SerialNumber) {
        *self.serial.lock() = Some(serial);
    }

    /// Write one frame, holding the session's write mutex for the duration
    /// of the send.
    pub async fn send_frame(&self, frame: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        debug!(
            peer = %self.peer_addr,
            frame = %protocol::hex::encode(frame),
            "sent frame"
        );
        Ok(())
    }

    /// Refresh the last-heartbeat time.
    pub fn touch(&self) {
        self.telemetry.lock().last_heartbeat = super::unix_now_f64();
    }

    /// Store a decoded heartbeat and refresh the last-heartbeat time.
    /// Returns the previous (device_status, car_status) pair when either
    /// changed, for operator-visible logging.
    pub fn record_heartbeat(&self, report: &HeartbeatReport) -> Option<(u8, u8)> {
        let mut telemetry = self.telemetry.lock();
        telemetry.last_heartbeat = super::unix_now_f64();

        let changed = match (telemetry.prev_device_status, telemetry.prev_car_status) {
            (Some(prev_status), Some(prev_car))
                if prev_status != report.device_status || prev_car != report.car_status =>
            {
                Some((prev_status, prev_car))
            }
            _ => None,
        };

        telemetry.prev_device_status = Some(report.device_status);
        telemetry.prev_car_status = Some(report.car_status);
        telemetry.report = Some(report.clone());
        changed
    }

    /// Unix seconds of the last login or heartbeat.
    pub fn last_heartbeat(&self) -> f64 {
        self.telemetry.lock().last_heartbeat
    }

    pub fn last_report(&self) -> Option<HeartbeatReport> {
        self.telemetry.lock().report.clone()
    }

    /// Signal the read loop to terminate. Used for takeover and shutdown.
    pub fn close(&self) {
        self.close_flag.store(true, Ordering::SeqCst);
        self.closed.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.close_flag.load(Ordering::SeqCst)
    }

    /// Resolves once `close` has been called.
    pub async fn wait_closed(&self) {
        if self.is_closed() {
            return;
        }
        self.closed.notified().await;
    }
}

/// Reply payload: current unix time as u32 LE.
fn timestamp_payload() -> [u8; 4] {
    (super::unix_now() as u32).to_le_bytes()
}

/// Read loop for one device connection. Runs until the peer closes, a
/// read/write error occurs, the session is superseded by a takeover, or
/// the server shuts down.
pub(crate) async fn run_session(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<DeviceRegistry>,
    sink: WebhookSink,
    config: Arc<GatewayConfig>,
    shutdown: Arc<Notify>,
) {
    let (mut read_half, write_half) = stream.into_split();
    let session = DeviceSession::new(write_half, peer_addr);
    let mut frames = FrameReader::new(config.max_frame_len, config.recv_buffer_limit);
    let mut buf = vec![0u8; 1024];

    'session: loop {
        tokio::select! {
            result = read_half.read(&mut buf) => match result {
                Ok(0) => {
                    info!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                Ok(n) => {
                    let candidates = match frames.feed(&buf[..n]) {
                        Ok(candidates) => candidates,
                        Err(e) => {
                            warn!(peer = %peer_addr, error = %e, "dropping abusive connection");
                            break;
                        }
                    };
                    for raw in candidates {
                        if let Err(e) = handle_frame(&session, &raw, &registry, &sink).await {
                            warn!(peer = %peer_addr, error = %e, "write failed, closing session");
                            break 'session;
                        }
                    }
                }
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "read error");
                    break;
                }
            },
            _ = session.wait_closed() => {
                debug!(peer = %peer_addr, "session closed by registry");
                break;
            }
            _ = shutdown.notified() => {
                debug!(peer = %peer_addr, "session shutting down");
                break;
            }
        }
    }

    if registry.unbind(&session).await {
        if let Some(serial) = session.serial() {
            info!(serial = %protocol::serial_hex(&serial), "device disconnected");
        }
    }
}

/// Validate and act on one candidate frame. Invalid frames are logged and
/// dropped without touching the connection; only write failures bubble up.
async fn handle_frame(
    session: &Arc<DeviceSession>,
    raw: &[u8],
    registry: &DeviceRegistry,
    sink: &WebhookSink,
) -> std::io::Result<()> {
    debug!(
        peer = %session.peer_addr(),
        frame = %protocol::hex::encode(raw),
        "recv frame"
    );

    let frame = match protocol::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(peer = %session.peer_addr(), error = %e, "discarding invalid frame");
            return Ok(());
        }
    };

    match frame.command {
        command::LOGIN => {
            if frame.payload.len() >= 8 {
                let mut serial = [0u8; 8];
                serial.copy_from_slice(&frame.payload[..8]);
                match registry.bind(serial, session).await {
                    BindOutcome::Registered => info!(
                        serial = %protocol::serial_hex(&serial),
                        peer = %session.peer_addr(),
                        "device logged in"
                    ),
                    BindOutcome::TookOver => info!(
                        serial = %protocol::serial_hex(&serial),
                        peer = %session.peer_addr(),
                        "device reconnected, closed previous session"
                    ),
                    BindOutcome::Refreshed => {}
                }
            } else {
                warn!(
                    peer = %session.peer_addr(),
                    len = frame.payload.len(),
                    "login payload too short, not binding"
                );
            }
            session
                .send_frame(&protocol::build(command::LOGIN, &timestamp_payload()))
                .await?;
        }

        command::HEARTBEAT => {
            // Reply first; decoding must never delay the device's ack.
            session
                .send_frame(&protocol::build(command::HEARTBEAT, &timestamp_payload()))
                .await?;

            match HeartbeatReport::decode(&frame.payload) {
                Ok(report) => {
                    if session.serial().is_some() {
                        let serial = protocol::serial_hex(&report.serial);
                        if let Some((prev_status, prev_car)) = session.record_heartbeat(&report) {
                            info!(
                                serial = %serial,
                                "device status changed: {} ({}) -> {} ({}), car {} -> {}",
                                prev_status,
                                heartbeat::device_status_label(prev_status),
                                report.device_status,
                                report.device_status_label(),
                                prev_car,
                                report.car_status
                            );
                        }
                        sink.enqueue(StatusUpdate::from_report(&report, session.last_heartbeat()));
                        debug!(serial = %serial, "heartbeat processed");
                    } else {
                        debug!(peer = %session.peer_addr(), "heartbeat before login, reply only");
                    }
                }
                Err(e) => {
                    warn!(peer = %session.peer_addr(), error = %e, "failed to decode heartbeat payload");
                }
            }
        }

        command::ORDER_CONFIRM | command::ORDER_COMPLETE | command::DEVICE_FAULT => {
            session
                .send_frame(&protocol::build(frame.command, &[0x01]))
                .await?;
            info!(
                command = command::name(frame.command),
                peer = %session.peer_addr(),
                "acknowledged device frame"
            );
        }

        command::CAR_STATUS => {
            session
                .send_frame(&protocol::build(command::CAR_STATUS, &[0x01]))
                .await?;
            if frame.payload.len() >= 10 {
                // Observational only; authoritative car state comes from heartbeats.
                let mut serial = [0u8; 8];
                serial.copy_from_slice(&frame.payload[..8]);
                info!(
                    serial = %protocol::serial_hex(&serial),
                    car_present = frame.payload[8],
                    lock_status = frame.payload[9],
                    "car status change reported"
                );
            }
        }

        other => {
            warn!(
                peer = %session.peer_addr(),
                command = format_args!("0x{:02X}", other),
                "unhandled command, dropping frame"
            );
        }
    }

    Ok(())
}
