// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway core: the device-facing TCP listener and its collaborators.

use crate::config::GatewayConfig;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info};

pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod webhook;

pub use dispatcher::{CommandDispatcher, DispatchError, LockState};
pub use registry::{BindOutcome, DeviceRegistry, DeviceSummary};
pub use session::DeviceSession;
pub use webhook::{StatusUpdate, WebhookSink};

/// Current unix time in whole seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time with sub-second precision.
pub(crate) fn unix_now_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Parking-lock gateway server.
///
/// Owns the device registry and the webhook sink; the accept loop runs as
/// a spawned task between [`LockServer::start`] and [`LockServer::shutdown`]
/// so the HTTP control plane can stop and restart it.
#[derive(Clone)]
pub struct LockServer {
    config: Arc<GatewayConfig>,
    registry: Arc<DeviceRegistry>,
    sink: WebhookSink,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    workers_started: Arc<AtomicBool>,
    local_addr: Arc<RwLock<Option<SocketAddr>>>,
}

impl LockServer {
    /// Create a new gateway server.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let sink = WebhookSink::new(&config).map_err(|e| ServerError::Config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(DeviceRegistry::new()),
            sink,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            workers_started: Arc::new(AtomicBool::new(false)),
            local_addr: Arc::new(RwLock::new(None)),
        })
    }

    /// Bind the device listener and spawn the accept loop. Returns the
    /// bound address (useful when the configured port is 0).
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ServerError::Bind(e.to_string()));
            }
        };
        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ServerError::Io(e.to_string()));
            }
        };

        *self.local_addr.write().await = Some(local);

        // Delivery workers live for the process, not one start/stop cycle.
        if !self.workers_started.swap(true, Ordering::SeqCst) {
            self.sink.spawn_workers(self.config.webhook_workers);
        }

        info!("Device listener on {}", local);

        let server = self.clone();
        tokio::spawn(async move { server.accept_loop(listener).await });

        Ok(local)
    }

    async fn accept_loop(&self, listener: TcpListener) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("New device connection from {}", peer_addr);
                            tokio::spawn(session::run_session(
                                stream,
                                peer_addr,
                                self.registry.clone(),
                                self.sink.clone(),
                                self.config.clone(),
                                self.shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    debug!("Device listener shutting down");
                    break;
                }
            }
        }

        self.registry.close_all().await;
        *self.local_addr.write().await = None;
        self.running.store(false, Ordering::SeqCst);
        info!("Device listener stopped");
    }

    /// Signal the accept loop and every session to terminate.
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the device listener is currently bound to.
    pub async fn device_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// A dispatcher routing into this server's registry.
    pub fn dispatcher(&self) -> CommandDispatcher {
        CommandDispatcher::new(self.registry.clone())
    }

    /// Status updates discarded due to webhook queue overflow.
    pub fn webhook_dropped(&self) -> u64 {
        self.sink.dropped()
    }
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Bind(String),
    AlreadyRunning,
    Io(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) => write!(f, "Configuration error: {}", s),
            Self::Bind(s) => write!(f, "Bind error: {}", s),
            Self::AlreadyRunning => write!(f, "Server already running"),
            Self::Io(s) => write!(f, "I/O error: {}", s),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    fn loopback_config() -> GatewayConfig {
        GatewayConfig {
            bind_address: [127, 0, 0, 1].into(),
            port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_reports_bound_addr() {
        let server = LockServer::new(loopback_config()).unwrap();
        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running());
        assert_eq!(server.device_addr().await, Some(addr));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let server = LockServer::new(loopback_config()).unwrap();
        server.start().await.unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_then_restart() {
        let server = LockServer::new(loopback_config()).unwrap();
        server.start().await.unwrap();

        server.shutdown().await;
        for _ in 0..100 {
            if !server.is_running() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(!server.is_running());
        assert_eq!(server.device_addr().await, None);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = GatewayConfig {
            webhook_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            LockServer::new(config),
            Err(ServerError::Config(_))
        ));
    }
}
