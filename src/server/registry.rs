// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device registry: serial number -> live session.
//!
//! At most one session is registered per serial at any instant. A login
//! over a new TCP connection for an already-registered serial supersedes
//! the old session: the physical device is authoritative, so the stale
//! socket (NAT rebind, device reboot) is closed and the new one installed.

use super::session::DeviceSession;
use crate::protocol::heartbeat::HeartbeatReport;
use crate::protocol::SerialNumber;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of all logged-in devices.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<SerialNumber, Arc<DeviceSession>>>,
}

/// Result of a [`DeviceRegistry::bind`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// First login for this serial.
    Registered,
    /// Retransmitted login on the already-registered socket; only the
    /// last-heartbeat time was refreshed.
    Refreshed,
    /// A previous session held this serial and has been closed.
    TookOver,
}

/// Copy of one device's state, taken under the registry lock.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub serial: SerialNumber,
    pub address: SocketAddr,
    /// Unix seconds of the last login or heartbeat.
    pub last_heartbeat: f64,
    pub report: Option<HeartbeatReport>,
}

impl DeviceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Register `session` under `serial`, superseding any existing session
    /// for the same serial. Retransmitted logins on the same socket only
    /// refresh the last-heartbeat time.
    pub async fn bind(&self, serial: SerialNumber, session: &Arc<DeviceSession>) -> BindOutcome {
        let mut devices = self.devices.write().await;

        if let Some(existing) = devices.get(&serial) {
            if Arc::ptr_eq(existing, session) {
                session.touch();
                return BindOutcome::Refreshed;
            }
            existing.close();
        }

        // A socket that re-logs-in under a different serial must not leave
        // its previous registration behind.
        if let Some(previous) = session.serial() {
            if previous != serial
                && devices
                    .get(&previous)
                    .map_or(false, |old| Arc::ptr_eq(old, session))
            {
                devices.remove(&previous);
            }
        }

        session.bind_serial(serial);
        session.touch();
        match devices.insert(serial, session.clone()) {
            Some(_) => BindOutcome::TookOver,
            None => BindOutcome::Registered,
        }
    }

    /// Remove `session` from the registry, but only while it is still the
    /// registered session for its serial. A session that was superseded by
    /// a takeover must not remove its replacement.
    pub async fn unbind(&self, session: &Arc<DeviceSession>) -> bool {
        let Some(serial) = session.serial() else {
            return false;
        };

        let mut devices = self.devices.write().await;
        let is_current = devices
            .get(&serial)
            .map_or(false, |current| Arc::ptr_eq(current, session));
        if is_current {
            devices.remove(&serial);
        }
        is_current
    }

    /// Look up the live session for a serial.
    pub async fn lookup(&self, serial: &SerialNumber) -> Option<Arc<DeviceSession>> {
        self.devices.read().await.get(serial).cloned()
    }

    /// Number of registered devices.
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Copy every device's state for operator queries.
    pub async fn snapshot(&self) -> Vec<DeviceSummary> {
        self.devices
            .read()
            .await
            .iter()
            .map(|(serial, session)| DeviceSummary {
                serial: *serial,
                address: session.peer_addr(),
                last_heartbeat: session.last_heartbeat(),
                report: session.last_report(),
            })
            .collect()
    }

    /// Close every registered session and empty the registry. Used on
    /// server shutdown.
    pub async fn close_all(&self) {
        let mut devices = self.devices.write().await;
        for session in devices.values() {
            session.close();
        }
        devices.clear();
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    const SERIAL: SerialNumber = [1, 2, 3, 4, 5, 6, 7, 8];

    /// Build a session from a real loopback socket; the client end is
    /// returned so the connection stays alive for the test's duration.
    async fn make_session() -> (Arc<DeviceSession>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let (_read, write) = stream.into_split();
        (DeviceSession::new(write, peer), client)
    }

    #[tokio::test]
    async fn test_bind_and_lookup() {
        let registry = DeviceRegistry::new();
        let (session, _client) = make_session().await;

        assert_eq!(registry.bind(SERIAL, &session).await, BindOutcome::Registered);
        assert_eq!(session.serial(), Some(SERIAL));

        let found = registry.lookup(&SERIAL).await.unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_rebind_same_session_refreshes() {
        let registry = DeviceRegistry::new();
        let (session, _client) = make_session().await;

        registry.bind(SERIAL, &session).await;
        assert_eq!(registry.bind(SERIAL, &session).await, BindOutcome::Refreshed);
        assert!(!session.is_closed());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_takeover_closes_previous_session() {
        let registry = DeviceRegistry::new();
        let (first, _c1) = make_session().await;
        let (second, _c2) = make_session().await;

        registry.bind(SERIAL, &first).await;
        assert_eq!(registry.bind(SERIAL, &second).await, BindOutcome::TookOver);

        assert!(first.is_closed());
        assert!(!second.is_closed());
        let current = registry.lookup(&SERIAL).await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn test_stale_unbind_is_a_noop() {
        let registry = DeviceRegistry::new();
        let (first, _c1) = make_session().await;
        let (second, _c2) = make_session().await;

        registry.bind(SERIAL, &first).await;
        registry.bind(SERIAL, &second).await;

        // The superseded session's cleanup must not evict its replacement.
        assert!(!registry.unbind(&first).await);
        let current = registry.lookup(&SERIAL).await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));

        assert!(registry.unbind(&second).await);
        assert!(registry.lookup(&SERIAL).await.is_none());
    }

    #[tokio::test]
    async fn test_unbind_before_login_is_a_noop() {
        let registry = DeviceRegistry::new();
        let (session, _client) = make_session().await;
        assert!(!registry.unbind(&session).await);
    }

    #[tokio::test]
    async fn test_rebind_under_new_serial_moves_entry() {
        let registry = DeviceRegistry::new();
        let (session, _client) = make_session().await;
        let other: SerialNumber = [9, 9, 9, 9, 9, 9, 9, 9];

        registry.bind(SERIAL, &session).await;
        registry.bind(other, &session).await;

        assert!(registry.lookup(&SERIAL).await.is_none());
        assert!(registry.lookup(&other).await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = DeviceRegistry::new();
        let (first, _c1) = make_session().await;
        let (second, _c2) = make_session().await;

        registry.bind(SERIAL, &first).await;
        registry.bind([2u8; 8], &second).await;

        registry.close_all().await;
        assert!(registry.is_empty().await);
        assert!(first.is_closed());
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn test_snapshot_copies_state() {
        let registry = DeviceRegistry::new();
        let (session, _client) = make_session().await;
        registry.bind(SERIAL, &session).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].serial, SERIAL);
        assert!(snapshot[0].report.is_none());
        assert!(snapshot[0].last_heartbeat > 0.0);
    }
}
