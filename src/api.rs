// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operator HTTP facade: a thin JSON translation over the dispatcher and
//! registry queries.

use crate::server::{CommandDispatcher, LockServer};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod handlers;

/// Shared application state.
pub struct AppState {
    pub server: LockServer,
    pub dispatcher: CommandDispatcher,
}

impl AppState {
    pub fn new(server: LockServer) -> Self {
        let dispatcher = server.dispatcher();
        Self { server, dispatcher }
    }
}

/// Build the operator router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// API v1 routes.
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/status", get(handlers::status))
        .route("/api/v1/devices", get(handlers::devices))
        .route("/api/v1/device_status/:serial", get(handlers::device_status))
        .route("/api/v1/device_statuses", get(handlers::device_statuses))
        .route("/api/v1/open_lock", post(handlers::open_lock))
        .route("/api/v1/close_lock", post(handlers::close_lock))
        .route("/api/v1/set_state", post(handlers::set_state))
        .route("/api/v1/restart_device", post(handlers::restart_device))
        .route("/api/v1/sync_time", post(handlers::sync_time))
        .route("/api/v1/start_server", post(handlers::start_server))
        .route("/api/v1/stop_server", post(handlers::stop_server))
        // Legacy routes (compatibility with the original operator client)
        .route("/status", get(handlers::status))
        .route("/devices", get(handlers::devices))
        .route("/device_status/:serial", get(handlers::device_status))
        .route("/device_statuses", get(handlers::device_statuses))
        .route("/open_lock", post(handlers::open_lock))
        .route("/close_lock", post(handlers::close_lock))
        .route("/set_state", post(handlers::set_state))
        .route("/restart_device", post(handlers::restart_device))
        .route("/sync_time", post(handlers::sync_time))
        .route("/start_server", post(handlers::start_server))
        .route("/stop_server", post(handlers::stop_server))
}
