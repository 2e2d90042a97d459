// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the device-facing TCP listener binds to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Device-facing TCP port (default: 11457; 0 = OS-assigned)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the operator HTTP server binds to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub http_bind_address: IpAddr,

    /// Operator HTTP port (default: 5000; 0 = OS-assigned)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// URL heartbeat status updates are POSTed to
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,

    /// Shared secret sent in the X-Webhook-Secret header
    #[serde(default = "default_webhook_secret")]
    pub webhook_secret: String,

    /// Per-delivery HTTP timeout in seconds
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,

    /// Bounded webhook queue capacity; oldest entries are dropped on overflow
    #[serde(default = "default_webhook_queue_capacity")]
    pub webhook_queue_capacity: usize,

    /// Number of webhook delivery workers
    #[serde(default = "default_webhook_workers")]
    pub webhook_workers: usize,

    /// Largest declared frame length accepted from a device (bytes)
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Per-session receive buffer ceiling (bytes); exceeding it drops the
    /// connection as abusive
    #[serde(default = "default_recv_buffer_limit")]
    pub recv_buffer_limit: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    11457
}

fn default_http_port() -> u16 {
    5000
}

fn default_webhook_url() -> String {
    "http://localhost:3002/api/parking-locks/webhook/status-update".to_string()
}

fn default_webhook_secret() -> String {
    "a_very_secret_string_for_lock_webhook".to_string()
}

fn default_webhook_timeout() -> u64 {
    5
}

fn default_webhook_queue_capacity() -> usize {
    1024
}

fn default_webhook_workers() -> usize {
    2
}

fn default_max_frame_len() -> usize {
    4096
}

fn default_recv_buffer_limit() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            http_bind_address: default_bind_address(),
            http_port: default_http_port(),
            webhook_url: default_webhook_url(),
            webhook_secret: default_webhook_secret(),
            webhook_timeout_secs: default_webhook_timeout(),
            webhook_queue_capacity: default_webhook_queue_capacity(),
            webhook_workers: default_webhook_workers(),
            max_frame_len: default_max_frame_len(),
            recv_buffer_limit: default_recv_buffer_limit(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `NODE_WEBHOOK_URL` / `LOCK_WEBHOOK_SECRET` environment
    /// overrides. Environment wins over file and CLI values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("NODE_WEBHOOK_URL") {
            self.webhook_url = url;
        }
        if let Ok(secret) = std::env::var("LOCK_WEBHOOK_SECRET") {
            self.webhook_secret = secret;
        }
    }

    /// Get the webhook delivery timeout as a Duration.
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_url.is_empty() {
            return Err(ConfigError::InvalidValue("webhook_url cannot be empty".into()));
        }
        if self.webhook_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "webhook_queue_capacity cannot be 0".into(),
            ));
        }
        if self.webhook_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "webhook_workers cannot be 0".into(),
            ));
        }
        if self.max_frame_len < crate::protocol::FRAME_OVERHEAD {
            return Err(ConfigError::InvalidValue(
                "max_frame_len smaller than the frame overhead".into(),
            ));
        }
        if self.recv_buffer_limit < self.max_frame_len {
            return Err(ConfigError::InvalidValue(
                "recv_buffer_limit smaller than max_frame_len".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {}", s),
            Self::Parse(s) => write!(f, "Parse error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 11457);
        assert_eq!(config.http_port, 5000);
        assert_eq!(config.webhook_timeout(), Duration::from_secs(5));
        assert_eq!(config.webhook_queue_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = GatewayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.port, parsed.port);
        assert_eq!(config.webhook_url, parsed.webhook_url);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 12000, "webhook_workers": 4}}"#).unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 12000);
        assert_eq!(config.webhook_workers, 4);
        assert_eq!(config.http_port, 5000);
        assert_eq!(config.max_frame_len, 4096);
    }

    #[test]
    fn test_from_file_missing_path() {
        let err = GatewayConfig::from_file(Path::new("/nonexistent/gateway.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_validation_rejects_zero_queue() {
        let config = GatewayConfig {
            webhook_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_tiny_buffer_limit() {
        let config = GatewayConfig {
            recv_buffer_limit: 100,
            max_frame_len: 4096,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("NODE_WEBHOOK_URL", "http://example.invalid/hook");
        std::env::set_var("LOCK_WEBHOOK_SECRET", "s3cret");

        let mut config = GatewayConfig::default();
        config.apply_env();
        assert_eq!(config.webhook_url, "http://example.invalid/hook");
        assert_eq!(config.webhook_secret, "s3cret");

        std::env::remove_var("NODE_WEBHOOK_URL");
        std::env::remove_var("LOCK_WEBHOOK_SECRET");
    }
}
