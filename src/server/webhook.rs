// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Heartbeat fan-out to the external webhook consumer.
//!
//! Sessions enqueue status updates; dedicated workers drain the queue and
//! POST each one with the shared-secret header. The queue is bounded with
//! a drop-oldest policy: under pressure the downstream consumer wants the
//! freshest lock state, and the device read path must never block on it.

use crate::config::GatewayConfig;
use crate::protocol::heartbeat::HeartbeatReport;
use crate::protocol::serial_hex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// JSON projection of a heartbeat, keyed exactly as the downstream
/// consumer expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub serial_number: String,
    pub device_status: CodeDescription,
    pub car_status: CodeDescription,
    pub control_status: CodeDescription,
    pub battery: BatteryLevels,
    pub signal_strength: u8,
    pub flow_number: u32,
    pub error: ErrorSummary,
    pub ground_sensor: GroundSensorReading,
    pub water_detection: CodeDescription,
    /// Unix seconds of the heartbeat that produced this update.
    pub last_heartbeat: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeDescription {
    pub code: u16,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryLevels {
    #[serde(rename = "3.7v")]
    pub v3_7: u8,
    #[serde(rename = "12v")]
    pub v12: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub code: u16,
    pub descriptions: Vec<String>,
    pub has_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundSensorReading {
    pub current_frequency: u32,
    pub no_car_base: u32,
    pub car_base: u32,
    pub car_ratio: u16,
    pub no_car_ratio: u16,
}

impl StatusUpdate {
    pub fn from_report(report: &HeartbeatReport, last_heartbeat: f64) -> Self {
        Self {
            serial_number: serial_hex(&report.serial),
            device_status: CodeDescription {
                code: u16::from(report.device_status),
                description: report.device_status_label(),
            },
            car_status: CodeDescription {
                code: u16::from(report.car_status),
                description: report.car_status_label(),
            },
            control_status: CodeDescription {
                code: u16::from(report.control_status),
                description: report.control_status_label(),
            },
            battery: BatteryLevels {
                v3_7: report.battery_3_7v,
                v12: report.battery_12v,
            },
            signal_strength: report.signal_strength,
            flow_number: report.flow_number,
            error: ErrorSummary {
                code: report.error_code,
                descriptions: report
                    .error_labels()
                    .into_iter()
                    .map(String::from)
                    .collect(),
                has_error: report.has_error(),
            },
            ground_sensor: GroundSensorReading {
                current_frequency: report.current_frequency,
                no_car_base: report.no_car_base,
                car_base: report.car_base,
                car_ratio: report.car_ratio,
                no_car_ratio: report.no_car_ratio,
            },
            water_detection: CodeDescription {
                code: u16::from(report.water_detection),
                description: report.water_detection_label().to_string(),
            },
            last_heartbeat,
        }
    }
}

/// Asynchronous webhook delivery with a bounded drop-oldest queue.
#[derive(Clone)]
pub struct WebhookSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    url: String,
    secret: String,
    client: reqwest::Client,
    queue: parking_lot::Mutex<VecDeque<StatusUpdate>>,
    wakeup: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl WebhookSink {
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.webhook_timeout())
            .build()?;

        Ok(Self {
            inner: Arc::new(SinkInner {
                url: config.webhook_url.clone(),
                secret: config.webhook_secret.clone(),
                client,
                queue: parking_lot::Mutex::new(VecDeque::new()),
                wakeup: Notify::new(),
                capacity: config.webhook_queue_capacity,
                dropped: AtomicU64::new(0),
            }),
        })
    }

    /// Spawn `count` delivery workers on the current runtime.
    pub fn spawn_workers(&self, count: usize) {
        for id in 0..count {
            let sink = self.clone();
            tokio::spawn(async move { sink.worker(id).await });
        }
    }

    /// Queue a status update for delivery. Never blocks; on overflow the
    /// oldest queued update is discarded and counted.
    pub fn enqueue(&self, update: StatusUpdate) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.capacity {
                queue.pop_front();
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "webhook queue full, dropped oldest update");
            }
            queue.push_back(update);
        }
        self.inner.wakeup.notify_one();
    }

    /// Total updates discarded due to queue overflow.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Updates currently waiting for delivery.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    #[cfg(test)]
    fn peek_front_flow(&self) -> Option<u32> {
        self.inner.queue.lock().front().map(|u| u.flow_number)
    }

    async fn worker(self, id: usize) {
        debug!(worker = id, "webhook worker started");
        loop {
            let next = self.inner.queue.lock().pop_front();
            match next {
                Some(update) => self.deliver(&update).await,
                None => self.inner.wakeup.notified().await,
            }
        }
    }

    /// One fire-and-forget delivery attempt. Anything but HTTP 202 is a
    /// logged failure; nothing propagates to devices or operators.
    async fn deliver(&self, update: &StatusUpdate) {
        let result = self
            .inner
            .client
            .post(&self.inner.url)
            .header("X-Webhook-Secret", &self.inner.secret)
            .json(update)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::ACCEPTED => {
                debug!(serial = %update.serial_number, "status update delivered");
            }
            Ok(response) => {
                warn!(
                    serial = %update.serial_number,
                    status = %response.status(),
                    "webhook rejected status update"
                );
            }
            Err(e) => {
                warn!(serial = %update.serial_number, error = %e, "webhook delivery failed");
            }
        }
    }
}
