// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for the operator API.

use super::AppState;
use crate::protocol::{self, SerialNumber};
use crate::server::{DispatchError, LockState, ServerError, StatusUpdate};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

/// Uniform response for command routes.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

impl CommandResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }

    fn fail(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: message.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    #[serde(rename = "deviceSerial")]
    pub device_serial: String,
}

#[derive(Debug, Deserialize)]
pub struct SetStateRequest {
    #[serde(rename = "deviceSerial")]
    pub device_serial: String,
    pub state: u8,
}

#[derive(Debug, Serialize)]
struct DeviceEntry {
    serial: String,
    address: String,
    last_heartbeat: f64,
    last_heartbeat_seconds_ago: u64,
}

#[derive(Debug, Serialize)]
struct DeviceStatusEntry {
    address: String,
    #[serde(flatten)]
    status: StatusUpdate,
}

fn parse_serial(hex: &str) -> Result<SerialNumber, Json<CommandResponse>> {
    protocol::parse_serial(hex).map_err(|e| {
        warn!(serial = hex, "rejected operator request: {}", e);
        CommandResponse::fail("Invalid serial number")
    })
}

fn dispatch_result(result: Result<(), DispatchError>, sent: impl Into<String>) -> Json<CommandResponse> {
    match result {
        Ok(()) => CommandResponse::ok(sent),
        Err(e) => CommandResponse::fail(e.to_string()),
    }
}

/// GET /status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = if state.server.is_running() {
        "running"
    } else {
        "stopped"
    };
    Json(json!({ "status": status }))
}

/// GET /devices
pub async fn devices(State(state): State<Arc<AppState>>) -> Json<Value> {
    let now = crate::server::unix_now_f64();
    let devices: Vec<DeviceEntry> = state
        .server
        .registry()
        .snapshot()
        .await
        .into_iter()
        .map(|summary| DeviceEntry {
            serial: protocol::serial_hex(&summary.serial),
            address: summary.address.to_string(),
            last_heartbeat: summary.last_heartbeat,
            last_heartbeat_seconds_ago: (now - summary.last_heartbeat).max(0.0) as u64,
        })
        .collect();

    Json(json!({ "success": true, "devices": devices }))
}

/// GET /device_status/:serial
pub async fn device_status(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> Json<Value> {
    let serial = match protocol::parse_serial(&serial) {
        Ok(serial) => serial,
        Err(_) => {
            return Json(json!({ "success": false, "message": "Invalid serial number" }));
        }
    };

    let Some(session) = state.server.registry().lookup(&serial).await else {
        return Json(json!({ "success": false, "message": "Device not connected" }));
    };

    match session.last_report() {
        Some(report) => {
            let status = StatusUpdate::from_report(&report, session.last_heartbeat());
            Json(json!({ "success": true, "status": status }))
        }
        None => Json(json!({
            "success": false,
            "message": "No heartbeat data available for this device"
        })),
    }
}

/// GET /device_statuses
pub async fn device_statuses(State(state): State<Arc<AppState>>) -> Json<Value> {
    let devices: Vec<DeviceStatusEntry> = state
        .server
        .registry()
        .snapshot()
        .await
        .into_iter()
        .filter_map(|summary| {
            summary.report.map(|report| DeviceStatusEntry {
                address: summary.address.to_string(),
                status: StatusUpdate::from_report(&report, summary.last_heartbeat),
            })
        })
        .collect();

    Json(json!({ "success": true, "devices": devices }))
}

/// POST /open_lock
pub async fn open_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    let serial = match parse_serial(&req.device_serial) {
        Ok(serial) => serial,
        Err(resp) => return resp,
    };
    dispatch_result(
        state.dispatcher.open_lock(&serial).await,
        "Open lock command sent",
    )
}

/// POST /close_lock
pub async fn close_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    let serial = match parse_serial(&req.device_serial) {
        Ok(serial) => serial,
        Err(resp) => return resp,
    };
    dispatch_result(
        state.dispatcher.close_lock(&serial).await,
        "Close lock command sent",
    )
}

/// POST /set_state
pub async fn set_state(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetStateRequest>,
) -> Json<CommandResponse> {
    let serial = match parse_serial(&req.device_serial) {
        Ok(serial) => serial,
        Err(resp) => return resp,
    };
    let Some(lock_state) = LockState::from_code(req.state) else {
        return CommandResponse::fail("Invalid state: must be 0, 1 or 2");
    };
    dispatch_result(
        state.dispatcher.set_lock_state(&serial, lock_state).await,
        format!("Set {} state command sent", lock_state.label()),
    )
}

/// POST /restart_device
pub async fn restart_device(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    let serial = match parse_serial(&req.device_serial) {
        Ok(serial) => serial,
        Err(resp) => return resp,
    };
    dispatch_result(
        state.dispatcher.restart(&serial).await,
        "Restart command sent",
    )
}

/// POST /sync_time
pub async fn sync_time(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeviceRequest>,
) -> Json<CommandResponse> {
    let serial = match parse_serial(&req.device_serial) {
        Ok(serial) => serial,
        Err(resp) => return resp,
    };
    dispatch_result(
        state.dispatcher.sync_time(&serial).await,
        "Sync time command sent",
    )
}

/// POST /start_server
pub async fn start_server(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    match state.server.start().await {
        Ok(addr) => CommandResponse::ok(format!("Server started on {}", addr)),
        Err(ServerError::AlreadyRunning) => CommandResponse::fail("Server already running"),
        Err(e) => CommandResponse::fail(format!("Failed to start server: {}", e)),
    }
}

/// POST /stop_server
pub async fn stop_server(State(state): State<Arc<AppState>>) -> Json<CommandResponse> {
    if !state.server.is_running() {
        return CommandResponse::fail("Server not running");
    }

    state.server.shutdown().await;

    // The accept loop acknowledges by flipping the running flag.
    for _ in 0..50 {
        if !state.server.is_running() {
            return CommandResponse::ok("Server stopped successfully");
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    CommandResponse::fail("Server did not stop in time")
}
